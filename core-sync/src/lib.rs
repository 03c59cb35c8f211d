//! # Import Pipeline
//!
//! Turns the filesystem changes found by a library scan into catalog writes.
//!
//! ## Overview
//!
//! One [`ImportTask`] drives one run of the [`PipelineOrchestrator`]:
//! - Moves are applied in place, without re-reading archives
//! - Created and modified archives are read and normalized
//! - Missing relation rows are found with batched existence queries
//! - New and changed rows are written in bulk
//! - Association tables are reconciled to the proposed links
//! - Failed imports are recorded and recovered paths forgotten
//! - The search index is kept in step
//!
//! ## Components
//!
//! - **Job State Machine** (`job`): run lifecycle, phases and counts
//! - **Missing Relation Resolver** (`resolver`): create/update/unchanged buckets
//! - **Value Merger** (`merger`): per-field rules for existing rows
//! - **Bulk Writer** (`writer`): relation rows in dependency order
//! - **Link Synchronizer** (`linker`): association tables and protagonists
//! - **Failed Import Tracker** (`failed_imports`): failed path bookkeeping
//! - **Search Index Synchronizer** (`search_index`): search documents
//! - **Pipeline Orchestrator** (`orchestrator`): runs the phases in order

pub mod error;
pub mod failed_imports;
pub mod job;
pub mod linker;
pub mod merger;
pub mod orchestrator;
pub mod resolver;
pub mod search_index;
pub mod status;
pub mod task;
pub mod writer;

pub use error::{LinkResolutionError, Result, RowPrepareError, SyncError};
pub use failed_imports::{failure_reason, FailedImportReport, FailedImportTracker};
pub use job::{Counts, ImportJob, ImportJobId, ImportPhase, JobStatus};
pub use linker::{LinkReport, LinkSynchronizer};
pub use merger::{merge, MergeOutcome};
pub use orchestrator::PipelineOrchestrator;
pub use resolver::{MissingRelationResolver, PendingUpdate, RelationWork, WorkBuckets};
pub use search_index::SearchIndexSynchronizer;
pub use status::{EventStatusReporter, StatusReporter};
pub use task::ImportTask;
pub use writer::{BulkWriter, WriteReport};

#[cfg(test)]
pub(crate) mod test_support {
    use bridge_traits::database::{DatabaseAdapter, QueryValue};
    use core_library::adapters::SqliteAdapter;
    use core_library::db::{create_test_pool, insert_library};
    use core_library::repositories::{
        ComicRepository, CoverRepository, FailedImportRepository, FolderRepository,
        LinkRepository, RelationRepository, SearchRepository, SqliteComicRepository,
        SqliteCoverRepository, SqliteFailedImportRepository, SqliteFolderRepository,
        SqliteLinkRepository, SqliteRelationRepository, SqliteSearchRepository,
    };
    use core_library::{ComicId, LibraryId};
    use std::sync::Arc;

    /// In-memory catalog with one library rooted at `/lib`
    pub struct Catalog {
        pub adapter: Arc<dyn DatabaseAdapter>,
        pub library_id: LibraryId,
        pub relations: Arc<dyn RelationRepository>,
        pub covers: Arc<dyn CoverRepository>,
        pub comics: Arc<dyn ComicRepository>,
        pub folders: Arc<dyn FolderRepository>,
        pub links: Arc<dyn LinkRepository>,
        pub search: Arc<dyn SearchRepository>,
        pub failed: Arc<dyn FailedImportRepository>,
    }

    pub async fn catalog() -> Catalog {
        let pool = create_test_pool().await.unwrap();
        let library = insert_library(&pool, "/lib", 1_700_000_000).await.unwrap();
        let adapter: Arc<dyn DatabaseAdapter> = Arc::new(SqliteAdapter::from_pool(pool));
        Catalog {
            library_id: LibraryId(library),
            relations: Arc::new(SqliteRelationRepository::new(adapter.clone())),
            covers: Arc::new(SqliteCoverRepository::new(adapter.clone())),
            comics: Arc::new(SqliteComicRepository::new(adapter.clone())),
            folders: Arc::new(SqliteFolderRepository::new(adapter.clone())),
            links: Arc::new(SqliteLinkRepository::new(adapter.clone())),
            search: Arc::new(SqliteSearchRepository::new(adapter.clone())),
            failed: Arc::new(SqliteFailedImportRepository::new(adapter.clone())),
            adapter,
        }
    }

    /// Bare comic under empty-named groups
    pub async fn comic_row(catalog: &Catalog, path: &str) -> ComicId {
        let adapter = &catalog.adapter;
        let group = |sql: &'static str| async move {
            adapter.execute(sql, &[]).await.unwrap();
        };
        group(
            "INSERT OR IGNORE INTO publishers (name, sort_name, created_at, updated_at) \
             VALUES ('', '', 1, 1)",
        )
        .await;
        group(
            "INSERT OR IGNORE INTO imprints (publisher_id, name, sort_name, created_at, updated_at) \
             SELECT id, '', '', 1, 1 FROM publishers WHERE name = ''",
        )
        .await;
        group(
            "INSERT OR IGNORE INTO series (imprint_id, name, sort_name, created_at, updated_at) \
             SELECT id, '', '', 1, 1 FROM imprints WHERE name = ''",
        )
        .await;
        group(
            "INSERT OR IGNORE INTO volumes (series_id, name, sort_name, created_at, updated_at) \
             SELECT id, '', '', 1, 1 FROM series WHERE name = ''",
        )
        .await;

        adapter
            .execute(
                "INSERT INTO comics (library_id, path, publisher_id, imprint_id, series_id, \
                 volume_id, sort_name, created_at, updated_at) \
                 SELECT ?, ?, p.id, i.id, s.id, v.id, '', 1, 1 \
                 FROM publishers p \
                 JOIN imprints i ON i.publisher_id = p.id AND i.name = '' \
                 JOIN series s ON s.imprint_id = i.id AND s.name = '' \
                 JOIN volumes v ON v.series_id = s.id AND v.name = '' \
                 WHERE p.name = ''",
                &[
                    QueryValue::Integer(catalog.library_id.0),
                    QueryValue::from(path),
                ],
            )
            .await
            .unwrap();
        let row = adapter
            .query_one(
                "SELECT id FROM comics WHERE path = ?",
                &[QueryValue::from(path)],
            )
            .await
            .unwrap();
        ComicId(row.get("id").and_then(QueryValue::as_i64).unwrap())
    }
}
