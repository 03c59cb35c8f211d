//! # Repository Pattern Implementation
//!
//! Repository traits and SQLite implementations for catalog data access.
//!
//! ## Architecture
//!
//! - Traits define the interface for each repository
//! - SQLite implementations issue SQL through the `DatabaseAdapter` bridge
//! - Every multi-row read or write is chunked with [`Batches`](crate::batching::Batches)
//! - All operations return `Result<T>` for error handling
//!
//! ## Available Repositories
//!
//! - `RelationRepository` - Descriptor-driven existence lookups and upserts
//! - `ComicRepository` - Comic rows keyed by path
//! - `FolderRepository` - Folder tree keyed by path
//! - `LinkRepository` - Comic association tables
//! - `CoverRepository` - Custom group covers
//! - `FailedImportRepository` - Paths that could not be imported
//! - `SearchRepository` - Search document projection
//! - `LibraryRepository` - Library roots

pub mod comic;
pub mod cover;
pub mod failed_import;
pub mod folder;
pub mod library;
pub mod link;
pub mod relation;
pub mod search;

pub use comic::{ComicRepository, Protagonists, SqliteComicRepository};
pub use cover::{CoverRepository, SqliteCoverRepository};
pub use failed_import::{FailedImportRepository, SqliteFailedImportRepository};
pub use folder::{ancestor_paths, FolderRepository, SqliteFolderRepository};
pub use library::{LibraryRepository, SqliteLibraryRepository};
pub use link::{LinkPair, LinkRepository, SqliteLinkRepository};
pub use relation::{ExistingRow, RelationRepository, SqliteRelationRepository};
pub use search::{SearchRepository, SqliteSearchRepository};

use crate::error::{LibraryError, Result};
use bridge_traits::database::{QueryRow, QueryValue};

pub(crate) fn get_string(row: &QueryRow, key: &str) -> Result<String> {
    row.get(key)
        .and_then(|value| value.as_string())
        .ok_or_else(|| LibraryError::missing_column(key))
}

pub(crate) fn get_optional_string(row: &QueryRow, key: &str) -> Result<Option<String>> {
    Ok(match row.get(key) {
        Some(QueryValue::Null) | None => None,
        Some(value) => Some(
            value
                .as_string()
                .ok_or_else(|| LibraryError::missing_column(key))?,
        ),
    })
}

pub(crate) fn get_i64(row: &QueryRow, key: &str) -> Result<i64> {
    row.get(key)
        .and_then(|value| value.as_i64())
        .ok_or_else(|| LibraryError::missing_column(key))
}

pub(crate) fn get_optional_i64(row: &QueryRow, key: &str) -> Result<Option<i64>> {
    Ok(match row.get(key) {
        Some(QueryValue::Null) | None => None,
        Some(value) => Some(
            value
                .as_i64()
                .ok_or_else(|| LibraryError::missing_column(key))?,
        ),
    })
}

pub(crate) fn get_optional_f64(row: &QueryRow, key: &str) -> Result<Option<f64>> {
    Ok(match row.get(key) {
        Some(QueryValue::Null) | None => None,
        Some(value) => Some(
            value
                .as_f64()
                .ok_or_else(|| LibraryError::missing_column(key))?,
        ),
    })
}

/// `?, ?, ?` for `n` placeholders
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// `(?, ?), (?, ?)` for `rows` tuples of `width` placeholders
pub(crate) fn value_rows(rows: usize, width: usize) -> String {
    let row = format!("({})", placeholders(width));
    vec![row; rows].join(", ")
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::adapters::SqliteAdapter;
    use crate::db::{create_test_pool, insert_library};
    use crate::models::LibraryId;
    use bridge_traits::database::DatabaseAdapter;
    use std::sync::Arc;

    pub async fn adapter_with_library() -> (Arc<dyn DatabaseAdapter>, LibraryId) {
        let pool = create_test_pool().await.unwrap();
        let library = insert_library(&pool, "/lib", 1_700_000_000).await.unwrap();
        (Arc::new(SqliteAdapter::from_pool(pool)), LibraryId(library))
    }
}
