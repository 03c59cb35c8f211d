//! Folder repository trait and implementation

use crate::batching::Batches;
use crate::error::{LibraryError, Result};
use crate::models::{Folder, LibraryId, StoredFolder};
use crate::repositories::{get_i64, get_optional_i64, get_string, placeholders, value_rows};
use bridge_traits::database::{DatabaseAdapter, QueryRow, QueryValue};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Folder paths between `root` (exclusive) and the file at `path`, outermost
/// first
///
/// `ancestor_paths("/lib", "/lib/A/B/c.cbz")` is `["/lib/A", "/lib/A/B"]`.
/// Paths outside `root` have no ancestors.
pub fn ancestor_paths(root: &str, path: &str) -> Vec<String> {
    let Some(parent) = Path::new(path).parent() else {
        return Vec::new();
    };
    let Ok(relative) = parent.strip_prefix(root) else {
        return Vec::new();
    };

    let mut current = PathBuf::from(root);
    let mut ancestors = Vec::new();
    for component in relative.components() {
        if let Component::Normal(segment) = component {
            current.push(segment);
            ancestors.push(current.to_string_lossy().into_owned());
        }
    }
    ancestors
}

/// Final path segment, or the whole path when it has none
pub(crate) fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Parent directory of `path`, if any
pub(crate) fn parent_path(path: &str) -> Option<String> {
    Path::new(path)
        .parent()
        .map(|parent| parent.to_string_lossy().into_owned())
        .filter(|parent| !parent.is_empty())
}

/// Folder repository interface for data access operations
#[async_trait::async_trait]
pub trait FolderRepository: Send + Sync {
    /// Find folders by path, skipping paths with no row
    async fn find_by_paths(
        &self,
        paths: &[String],
        batch_size: usize,
    ) -> Result<HashMap<String, StoredFolder>>;

    /// Insert folders, refreshing name and parent of existing paths
    ///
    /// Callers insert one tree depth at a time so `parent_folder_id` is
    /// already known.
    ///
    /// # Errors
    /// Returns error if a folder fails validation or the database rejects a
    /// batch.
    async fn upsert(&self, folders: &[Folder], now: i64, batch_size: usize) -> Result<u64>;

    /// Rewrite `from` to `to`, including every descendant folder and comic
    ///
    /// # Returns
    /// Number of folder rows rewritten, zero when `from` has no row.
    async fn move_folder(&self, from: &str, to: &str, now: i64) -> Result<u64>;

    /// Delete folders by path; contained folders and comics cascade
    async fn delete_by_paths(&self, paths: &[String], batch_size: usize) -> Result<u64>;

    /// Every folder path in a library
    async fn paths_in_library(&self, library_id: LibraryId) -> Result<Vec<String>>;
}

/// SQLite implementation of FolderRepository
pub struct SqliteFolderRepository {
    adapter: Arc<dyn DatabaseAdapter>,
}

impl SqliteFolderRepository {
    /// Create a new repository using the provided database adapter.
    pub fn new(adapter: Arc<dyn DatabaseAdapter>) -> Self {
        Self { adapter }
    }

    fn validate_folder(folder: &Folder) -> Result<()> {
        if folder.path.trim().is_empty() {
            return Err(LibraryError::InvalidInput {
                field: "Folder".to_string(),
                message: "Folder path cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    fn insert_params(folder: &Folder, now: i64) -> Vec<QueryValue> {
        vec![
            QueryValue::Integer(folder.library_id.0),
            QueryValue::Text(folder.path.clone()),
            QueryValue::Text(folder.name.clone()),
            QueryValue::Text(folder.sort_name.clone()),
            QueryValue::from(folder.parent_folder_id),
            QueryValue::Integer(now),
            QueryValue::Integer(now),
        ]
    }
}

fn row_to_folder(row: &QueryRow) -> Result<StoredFolder> {
    Ok(StoredFolder {
        id: get_i64(row, "id")?,
        folder: Folder {
            library_id: LibraryId(get_i64(row, "library_id")?),
            path: get_string(row, "path")?,
            name: get_string(row, "name")?,
            sort_name: get_string(row, "sort_name")?,
            parent_folder_id: get_optional_i64(row, "parent_folder_id")?,
        },
    })
}

#[async_trait::async_trait]
impl FolderRepository for SqliteFolderRepository {
    async fn find_by_paths(
        &self,
        paths: &[String],
        batch_size: usize,
    ) -> Result<HashMap<String, StoredFolder>> {
        let mut found = HashMap::with_capacity(paths.len());
        for chunk in Batches::new(paths, batch_size) {
            let sql = format!(
                "SELECT id, library_id, path, name, sort_name, parent_folder_id \
                 FROM folders WHERE path IN ({})",
                placeholders(chunk.len())
            );
            let params: Vec<QueryValue> = chunk.iter().map(QueryValue::from).collect();
            for row in self.adapter.query(&sql, &params).await? {
                let folder = row_to_folder(&row)?;
                found.insert(folder.folder.path.clone(), folder);
            }
        }
        Ok(found)
    }

    #[instrument(skip(self, folders), fields(folders = folders.len()))]
    async fn upsert(&self, folders: &[Folder], now: i64, batch_size: usize) -> Result<u64> {
        for folder in folders {
            Self::validate_folder(folder)?;
        }

        let mut affected = 0;
        for chunk in Batches::new(folders, batch_size) {
            let sql = format!(
                "INSERT INTO folders (library_id, path, name, sort_name, parent_folder_id, \
                 created_at, updated_at) VALUES {} \
                 ON CONFLICT(path) DO UPDATE SET \
                 name = excluded.name, \
                 sort_name = excluded.sort_name, \
                 parent_folder_id = excluded.parent_folder_id, \
                 updated_at = excluded.updated_at",
                value_rows(chunk.len(), 7)
            );
            let params: Vec<QueryValue> = chunk
                .iter()
                .flat_map(|folder| Self::insert_params(folder, now))
                .collect();
            affected += self.adapter.execute(&sql, &params).await?;
        }
        Ok(affected)
    }

    #[instrument(skip(self))]
    async fn move_folder(&self, from: &str, to: &str, now: i64) -> Result<u64> {
        let prefix = format!("{}/", from.trim_end_matches('/'));
        // substr() counts characters, not bytes
        let prefix_len = prefix.chars().count() as i64;
        let from_len = from.chars().count() as i64;
        let name = file_name(to);
        let sort = crate::models::sort_name(&name);
        let new_parent = parent_path(to);

        let exists = self
            .adapter
            .query_one_optional(
                "SELECT id FROM folders WHERE path = ?",
                &[QueryValue::from(from)],
            )
            .await?;
        if exists.is_none() {
            debug!(from, "Folder to move not found");
            return Ok(0);
        }

        let rewrite_folders = [
            QueryValue::from(to),
            QueryValue::Integer(from_len + 1),
            QueryValue::Integer(now),
            QueryValue::from(from),
            QueryValue::Integer(prefix_len),
            QueryValue::from(prefix.as_str()),
        ];
        let rename = [
            QueryValue::from(name),
            QueryValue::from(sort),
            QueryValue::from(new_parent),
            QueryValue::from(to),
        ];
        let rewrite_comics = [
            QueryValue::from(to),
            QueryValue::Integer(from_len + 1),
            QueryValue::Integer(now),
            QueryValue::Integer(prefix_len),
            QueryValue::from(prefix.as_str()),
        ];

        let results = self
            .adapter
            .execute_batch(&[
                (
                    "UPDATE folders SET path = ? || substr(path, ?), updated_at = ? \
                     WHERE path = ? OR substr(path, 1, ?) = ?",
                    &rewrite_folders[..],
                ),
                (
                    "UPDATE folders SET name = ?, sort_name = ?, \
                     parent_folder_id = (SELECT p.id FROM folders p WHERE p.path = ?) \
                     WHERE path = ?",
                    &rename[..],
                ),
                (
                    "UPDATE comics SET path = ? || substr(path, ?), updated_at = ? \
                     WHERE substr(path, 1, ?) = ?",
                    &rewrite_comics[..],
                ),
            ])
            .await?;

        Ok(results.first().copied().unwrap_or(0))
    }

    async fn delete_by_paths(&self, paths: &[String], batch_size: usize) -> Result<u64> {
        let mut deleted = 0;
        for chunk in Batches::new(paths, batch_size) {
            let sql = format!(
                "DELETE FROM folders WHERE path IN ({})",
                placeholders(chunk.len())
            );
            let params: Vec<QueryValue> = chunk.iter().map(QueryValue::from).collect();
            deleted += self.adapter.execute(&sql, &params).await?;
        }
        Ok(deleted)
    }

    async fn paths_in_library(&self, library_id: LibraryId) -> Result<Vec<String>> {
        let rows = self
            .adapter
            .query(
                "SELECT path FROM folders WHERE library_id = ? ORDER BY path",
                &[QueryValue::Integer(library_id.0)],
            )
            .await?;
        rows.iter().map(|row| get_string(row, "path")).collect()
    }
}
