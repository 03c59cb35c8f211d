//! Library repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{Library, LibraryId};
use crate::repositories::{get_i64, get_string};
use bridge_traits::database::{DatabaseAdapter, QueryValue};
use std::sync::Arc;

/// Library repository interface
#[async_trait::async_trait]
pub trait LibraryRepository: Send + Sync {
    /// Find a library by its ID
    ///
    /// # Returns
    /// - `Ok(Some(library))` if found
    /// - `Ok(None)` if not found
    async fn find_by_id(&self, id: LibraryId) -> Result<Option<Library>>;

    /// Find a library by ID, failing with `NotFound` when absent
    async fn get(&self, id: LibraryId) -> Result<Library> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| LibraryError::NotFound {
                entity_type: "Library".to_string(),
                id: id.to_string(),
            })
    }
}

/// SQLite implementation of LibraryRepository
pub struct SqliteLibraryRepository {
    adapter: Arc<dyn DatabaseAdapter>,
}

impl SqliteLibraryRepository {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait::async_trait]
impl LibraryRepository for SqliteLibraryRepository {
    async fn find_by_id(&self, id: LibraryId) -> Result<Option<Library>> {
        let row = self
            .adapter
            .query_one_optional(
                "SELECT id, path, created_at, updated_at FROM libraries WHERE id = ?",
                &[QueryValue::Integer(id.0)],
            )
            .await?;
        row.map(|row| {
            Ok(Library {
                id: LibraryId(get_i64(&row, "id")?),
                path: get_string(&row, "path")?,
                created_at: get_i64(&row, "created_at")?,
                updated_at: get_i64(&row, "updated_at")?,
            })
        })
        .transpose()
    }
}
