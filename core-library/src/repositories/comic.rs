//! Comic repository trait and implementation

use crate::batching::Batches;
use crate::error::{LibraryError, Result};
use crate::models::{Comic, ComicId, LibraryId, ReadingDirection, StoredComic};
use crate::repositories::folder::parent_path;
use crate::repositories::{
    get_i64, get_optional_f64, get_optional_i64, get_optional_string, get_string, placeholders,
    value_rows,
};
use bridge_traits::database::{DatabaseAdapter, QueryRow, QueryValue};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

const COMIC_COLUMNS: &[&str] = &[
    "library_id",
    "path",
    "parent_folder_id",
    "publisher_id",
    "imprint_id",
    "series_id",
    "volume_id",
    "age_rating_id",
    "country_id",
    "language_id",
    "original_format_id",
    "scan_info_id",
    "tagger_id",
    "name",
    "issue_number",
    "issue_suffix",
    "year",
    "month",
    "day",
    "page_count",
    "summary",
    "notes",
    "critical_rating",
    "reading_direction",
    "monochrome",
    "file_type",
    "size",
    "mtime",
    "sort_name",
];

/// Protagonist assignment for one comic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protagonists {
    pub comic_id: ComicId,
    pub main_character_id: Option<i64>,
    pub main_team_id: Option<i64>,
}

/// Comic repository interface for data access operations
#[async_trait::async_trait]
pub trait ComicRepository: Send + Sync {
    /// Find comics by path, skipping paths with no row
    async fn find_by_paths(
        &self,
        paths: &[String],
        batch_size: usize,
    ) -> Result<HashMap<String, StoredComic>>;

    /// Resolve paths to comic ids, skipping paths with no row
    async fn ids_by_paths(
        &self,
        paths: &[String],
        batch_size: usize,
    ) -> Result<HashMap<String, ComicId>>;

    /// Insert comics, overwriting every column of existing paths
    ///
    /// # Errors
    /// Returns error if a comic fails validation or the database rejects a
    /// batch.
    async fn upsert(&self, comics: &[Comic], now: i64, batch_size: usize) -> Result<u64>;

    /// Every comic path in a library
    async fn paths_in_library(&self, library_id: LibraryId) -> Result<Vec<String>>;

    /// Rewrite comic paths and re-parent each moved comic
    ///
    /// # Returns
    /// Number of comics moved. Sources with no row are ignored.
    async fn move_paths(&self, moves: &[(String, String)], now: i64) -> Result<u64>;

    /// Delete comics by path; their links and search documents cascade
    async fn delete_by_paths(&self, paths: &[String], batch_size: usize) -> Result<u64>;

    /// Write main character and team, skipping comics already up to date
    ///
    /// # Returns
    /// Ids of the comics whose protagonists changed.
    async fn set_protagonists(&self, assignments: &[Protagonists]) -> Result<Vec<ComicId>>;
}

/// SQLite implementation of ComicRepository
pub struct SqliteComicRepository {
    adapter: Arc<dyn DatabaseAdapter>,
}

impl SqliteComicRepository {
    /// Create a new repository using the provided database adapter.
    pub fn new(adapter: Arc<dyn DatabaseAdapter>) -> Self {
        Self { adapter }
    }

    fn validate_comic(comic: &Comic) -> Result<()> {
        comic.validate().map_err(|msg| LibraryError::InvalidInput {
            field: "Comic".to_string(),
            message: msg,
        })
    }

    fn insert_params(comic: &Comic) -> Vec<QueryValue> {
        vec![
            QueryValue::Integer(comic.library_id.0),
            QueryValue::Text(comic.path.clone()),
            QueryValue::from(comic.parent_folder_id),
            QueryValue::Integer(comic.publisher_id),
            QueryValue::Integer(comic.imprint_id),
            QueryValue::Integer(comic.series_id),
            QueryValue::Integer(comic.volume_id),
            QueryValue::from(comic.age_rating_id),
            QueryValue::from(comic.country_id),
            QueryValue::from(comic.language_id),
            QueryValue::from(comic.original_format_id),
            QueryValue::from(comic.scan_info_id),
            QueryValue::from(comic.tagger_id),
            QueryValue::from(comic.name.clone()),
            QueryValue::from(comic.issue_number),
            QueryValue::from(comic.issue_suffix.clone()),
            QueryValue::from(comic.year),
            QueryValue::from(comic.month),
            QueryValue::from(comic.day),
            QueryValue::Integer(comic.page_count),
            QueryValue::from(comic.summary.clone()),
            QueryValue::from(comic.notes.clone()),
            QueryValue::from(comic.critical_rating),
            QueryValue::from(comic.reading_direction.as_str()),
            QueryValue::from(comic.monochrome),
            QueryValue::from(comic.file_type.clone()),
            QueryValue::Integer(comic.size),
            QueryValue::from(comic.mtime),
            QueryValue::Text(comic.sort_name.clone()),
        ]
    }

    fn upsert_sql(rows: usize) -> String {
        let mut columns = COMIC_COLUMNS.to_vec();
        columns.push("created_at");
        columns.push("updated_at");
        let updates: Vec<String> = COMIC_COLUMNS
            .iter()
            .filter(|c| **c != "path")
            .chain(std::iter::once(&"updated_at"))
            .map(|c| format!("{c} = excluded.{c}", c = c))
            .collect();
        format!(
            "INSERT INTO comics ({}) VALUES {} ON CONFLICT(path) DO UPDATE SET {}",
            columns.join(", "),
            value_rows(rows, columns.len()),
            updates.join(", ")
        )
    }
}

fn row_to_comic(row: &QueryRow) -> Result<StoredComic> {
    let comic = Comic {
        library_id: LibraryId(get_i64(row, "library_id")?),
        path: get_string(row, "path")?,
        parent_folder_id: get_optional_i64(row, "parent_folder_id")?,
        publisher_id: get_i64(row, "publisher_id")?,
        imprint_id: get_i64(row, "imprint_id")?,
        series_id: get_i64(row, "series_id")?,
        volume_id: get_i64(row, "volume_id")?,
        age_rating_id: get_optional_i64(row, "age_rating_id")?,
        country_id: get_optional_i64(row, "country_id")?,
        language_id: get_optional_i64(row, "language_id")?,
        original_format_id: get_optional_i64(row, "original_format_id")?,
        scan_info_id: get_optional_i64(row, "scan_info_id")?,
        tagger_id: get_optional_i64(row, "tagger_id")?,
        name: get_optional_string(row, "name")?,
        issue_number: get_optional_f64(row, "issue_number")?,
        issue_suffix: get_optional_string(row, "issue_suffix")?,
        year: get_optional_i64(row, "year")?,
        month: get_optional_i64(row, "month")?,
        day: get_optional_i64(row, "day")?,
        page_count: get_i64(row, "page_count")?,
        summary: get_optional_string(row, "summary")?,
        notes: get_optional_string(row, "notes")?,
        critical_rating: get_optional_f64(row, "critical_rating")?,
        reading_direction: ReadingDirection::parse(&get_string(row, "reading_direction")?),
        monochrome: get_i64(row, "monochrome")? != 0,
        file_type: get_optional_string(row, "file_type")?,
        size: get_i64(row, "size")?,
        mtime: get_optional_i64(row, "mtime")?,
        sort_name: get_string(row, "sort_name")?,
    };
    Ok(StoredComic {
        id: ComicId(get_i64(row, "id")?),
        comic,
        main_character_id: get_optional_i64(row, "main_character_id")?,
        main_team_id: get_optional_i64(row, "main_team_id")?,
    })
}

#[async_trait::async_trait]
impl ComicRepository for SqliteComicRepository {
    async fn find_by_paths(
        &self,
        paths: &[String],
        batch_size: usize,
    ) -> Result<HashMap<String, StoredComic>> {
        let mut found = HashMap::with_capacity(paths.len());
        for chunk in Batches::new(paths, batch_size) {
            let sql = format!(
                "SELECT id, {}, main_character_id, main_team_id FROM comics WHERE path IN ({})",
                COMIC_COLUMNS.join(", "),
                placeholders(chunk.len())
            );
            let params: Vec<QueryValue> = chunk.iter().map(QueryValue::from).collect();
            for row in self.adapter.query(&sql, &params).await? {
                let stored = row_to_comic(&row)?;
                found.insert(stored.comic.path.clone(), stored);
            }
        }
        Ok(found)
    }

    async fn ids_by_paths(
        &self,
        paths: &[String],
        batch_size: usize,
    ) -> Result<HashMap<String, ComicId>> {
        let mut ids = HashMap::with_capacity(paths.len());
        for chunk in Batches::new(paths, batch_size) {
            let sql = format!(
                "SELECT id, path FROM comics WHERE path IN ({})",
                placeholders(chunk.len())
            );
            let params: Vec<QueryValue> = chunk.iter().map(QueryValue::from).collect();
            for row in self.adapter.query(&sql, &params).await? {
                ids.insert(get_string(&row, "path")?, ComicId(get_i64(&row, "id")?));
            }
        }
        Ok(ids)
    }

    #[instrument(skip(self, comics), fields(comics = comics.len()))]
    async fn upsert(&self, comics: &[Comic], now: i64, batch_size: usize) -> Result<u64> {
        for comic in comics {
            Self::validate_comic(comic)?;
        }

        let mut affected = 0;
        for chunk in Batches::new(comics, batch_size) {
            let sql = Self::upsert_sql(chunk.len());
            let params: Vec<QueryValue> = chunk
                .iter()
                .flat_map(|comic| {
                    let mut row = Self::insert_params(comic);
                    row.push(QueryValue::Integer(now));
                    row.push(QueryValue::Integer(now));
                    row
                })
                .collect();
            affected += self.adapter.execute(&sql, &params).await?;
        }
        debug!(affected, "Comics upserted");
        Ok(affected)
    }

    async fn paths_in_library(&self, library_id: LibraryId) -> Result<Vec<String>> {
        let rows = self
            .adapter
            .query(
                "SELECT path FROM comics WHERE library_id = ? ORDER BY path",
                &[QueryValue::Integer(library_id.0)],
            )
            .await?;
        rows.iter().map(|row| get_string(row, "path")).collect()
    }

    #[instrument(skip(self, moves), fields(moves = moves.len()))]
    async fn move_paths(&self, moves: &[(String, String)], now: i64) -> Result<u64> {
        if moves.is_empty() {
            return Ok(0);
        }

        let params: Vec<[QueryValue; 4]> = moves
            .iter()
            .map(|(from, to)| {
                [
                    QueryValue::from(to),
                    QueryValue::from(parent_path(to)),
                    QueryValue::Integer(now),
                    QueryValue::from(from),
                ]
            })
            .collect();
        let statements: Vec<(&str, &[QueryValue])> = params
            .iter()
            .map(|p| {
                (
                    "UPDATE comics SET path = ?, \
                     parent_folder_id = (SELECT f.id FROM folders f WHERE f.path = ?), \
                     updated_at = ? WHERE path = ?",
                    &p[..],
                )
            })
            .collect();

        let results = self.adapter.execute_batch(&statements).await?;
        Ok(results.iter().sum())
    }

    async fn delete_by_paths(&self, paths: &[String], batch_size: usize) -> Result<u64> {
        let mut deleted = 0;
        for chunk in Batches::new(paths, batch_size) {
            let sql = format!(
                "DELETE FROM comics WHERE path IN ({})",
                placeholders(chunk.len())
            );
            let params: Vec<QueryValue> = chunk.iter().map(QueryValue::from).collect();
            deleted += self.adapter.execute(&sql, &params).await?;
        }
        Ok(deleted)
    }

    async fn set_protagonists(&self, assignments: &[Protagonists]) -> Result<Vec<ComicId>> {
        if assignments.is_empty() {
            return Ok(Vec::new());
        }

        let params: Vec<[QueryValue; 5]> = assignments
            .iter()
            .map(|a| {
                [
                    QueryValue::from(a.main_character_id),
                    QueryValue::from(a.main_team_id),
                    QueryValue::Integer(a.comic_id.0),
                    QueryValue::from(a.main_character_id),
                    QueryValue::from(a.main_team_id),
                ]
            })
            .collect();
        let statements: Vec<(&str, &[QueryValue])> = params
            .iter()
            .map(|p| {
                (
                    "UPDATE comics SET main_character_id = ?, main_team_id = ? \
                     WHERE id = ? AND (main_character_id IS NOT ? OR main_team_id IS NOT ?)",
                    &p[..],
                )
            })
            .collect();

        let results = self.adapter.execute_batch(&statements).await?;
        Ok(assignments
            .iter()
            .zip(results)
            .filter(|(_, affected)| *affected > 0)
            .map(|(assignment, _)| assignment.comic_id)
            .collect())
    }
}
