//! Failed import repository trait and implementation

use crate::batching::Batches;
use crate::error::Result;
use crate::models::{FailedImport, LibraryId};
use crate::repositories::{get_i64, get_string, placeholders, value_rows};
use bridge_traits::database::{DatabaseAdapter, QueryRow, QueryValue};
use std::sync::Arc;

/// Failed import repository interface
#[async_trait::async_trait]
pub trait FailedImportRepository: Send + Sync {
    /// Every failed import recorded for a library, ordered by path
    async fn list(&self, library_id: LibraryId) -> Result<Vec<FailedImport>>;

    /// Record failures; an existing path keeps its row and gets the new
    /// reason and `updated_at`
    async fn upsert(&self, failures: &[FailedImport], batch_size: usize) -> Result<u64>;

    /// Forget recovered paths
    async fn delete_by_paths(&self, paths: &[String], batch_size: usize) -> Result<u64>;
}

/// SQLite implementation of FailedImportRepository
pub struct SqliteFailedImportRepository {
    adapter: Arc<dyn DatabaseAdapter>,
}

impl SqliteFailedImportRepository {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>) -> Self {
        Self { adapter }
    }
}

fn row_to_failed_import(row: &QueryRow) -> Result<FailedImport> {
    Ok(FailedImport {
        library_id: LibraryId(get_i64(row, "library_id")?),
        path: get_string(row, "path")?,
        reason: get_string(row, "reason")?,
        created_at: get_i64(row, "created_at")?,
        updated_at: get_i64(row, "updated_at")?,
    })
}

#[async_trait::async_trait]
impl FailedImportRepository for SqliteFailedImportRepository {
    async fn list(&self, library_id: LibraryId) -> Result<Vec<FailedImport>> {
        let rows = self
            .adapter
            .query(
                "SELECT library_id, path, reason, created_at, updated_at \
                 FROM failed_imports WHERE library_id = ? ORDER BY path",
                &[QueryValue::Integer(library_id.0)],
            )
            .await?;
        rows.iter().map(row_to_failed_import).collect()
    }

    async fn upsert(&self, failures: &[FailedImport], batch_size: usize) -> Result<u64> {
        let mut affected = 0;
        for chunk in Batches::new(failures, batch_size) {
            let sql = format!(
                "INSERT INTO failed_imports (library_id, path, reason, created_at, updated_at) \
                 VALUES {} ON CONFLICT(path) DO UPDATE SET \
                 reason = excluded.reason, updated_at = excluded.updated_at",
                value_rows(chunk.len(), 5)
            );
            let params: Vec<QueryValue> = chunk
                .iter()
                .flat_map(|f| {
                    [
                        QueryValue::Integer(f.library_id.0),
                        QueryValue::Text(f.path.clone()),
                        QueryValue::Text(f.reason.clone()),
                        QueryValue::Integer(f.created_at),
                        QueryValue::Integer(f.updated_at),
                    ]
                })
                .collect();
            affected += self.adapter.execute(&sql, &params).await?;
        }
        Ok(affected)
    }

    async fn delete_by_paths(&self, paths: &[String], batch_size: usize) -> Result<u64> {
        let mut deleted = 0;
        for chunk in Batches::new(paths, batch_size) {
            let sql = format!(
                "DELETE FROM failed_imports WHERE path IN ({})",
                placeholders(chunk.len())
            );
            let params: Vec<QueryValue> = chunk.iter().map(QueryValue::from).collect();
            deleted += self.adapter.execute(&sql, &params).await?;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_support::adapter_with_library;

    fn failure(library_id: LibraryId, path: &str, reason: &str, at: i64) -> FailedImport {
        FailedImport {
            library_id,
            path: path.to_string(),
            reason: reason.to_string(),
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_single_row_per_path() {
        let (adapter, library) = adapter_with_library().await;
        let repo = SqliteFailedImportRepository::new(adapter);

        repo.upsert(&[failure(library, "/lib/bad.cbz", "corrupt", 1)], 10)
            .await
            .unwrap();
        repo.upsert(&[failure(library, "/lib/bad.cbz", "still corrupt", 2)], 10)
            .await
            .unwrap();

        let rows = repo.list(library).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].reason, "still corrupt");
        assert_eq!(rows[0].created_at, 1);
        assert_eq!(rows[0].updated_at, 2);
    }

    #[tokio::test]
    async fn test_delete_by_paths() {
        let (adapter, library) = adapter_with_library().await;
        let repo = SqliteFailedImportRepository::new(adapter);
        repo.upsert(
            &[
                failure(library, "/lib/a.cbz", "x", 1),
                failure(library, "/lib/b.cbz", "y", 1),
            ],
            10,
        )
        .await
        .unwrap();

        assert_eq!(
            repo.delete_by_paths(&["/lib/a.cbz".to_string()], 10)
                .await
                .unwrap(),
            1
        );
        let remaining: Vec<String> = repo
            .list(library)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(remaining, vec!["/lib/b.cbz"]);
    }
}
