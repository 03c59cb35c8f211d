//! Importer façade and bootstrap helpers.
//!
//! This crate wires the catalog database, a comic extractor and the host
//! bridges into a ready-to-run [`Importer`]. Desktop hosts enable the
//! `desktop-shims` feature (on by default) and call [`bootstrap`]; other hosts
//! assemble [`ImporterDependencies`] from their own bridge implementations.

pub mod error;

pub use error::{CoreError, Result};

pub use bridge_traits;
pub use core_library;
pub use core_metadata;
pub use core_runtime;
pub use core_sync;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop;

pub use core_sync::{Counts, ImportJob, ImportTask, PipelineOrchestrator, StatusReporter};

use bridge_traits::database::DatabaseAdapter;
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::Clock;
use core_library::LibraryId;
use core_metadata::ComicExtractor;
use core_runtime::config::ImporterConfig;
use core_runtime::events::{CoreEvent, EventBus};
use std::sync::Arc;
use tokio::sync::broadcast::Receiver;
use tokio_util::sync::CancellationToken;

/// Host-provided handles the importer runs on.
pub struct ImporterDependencies {
    pub database: Arc<dyn DatabaseAdapter>,
    pub filesystem: Arc<dyn FileSystemAccess>,
    pub clock: Arc<dyn Clock>,
    pub extractor: Arc<dyn ComicExtractor>,
}

/// Primary façade exposed to host applications.
pub struct Importer {
    database: Arc<dyn DatabaseAdapter>,
    event_bus: EventBus,
    orchestrator: PipelineOrchestrator,
}

impl Importer {
    /// Create an importer from a validated configuration and explicit bridges.
    pub fn new(config: ImporterConfig, deps: ImporterDependencies) -> Result<Self> {
        config.validate()?;
        let event_bus = EventBus::new(config.event_buffer_size);
        let orchestrator = PipelineOrchestrator::new(
            config,
            deps.database.clone(),
            deps.extractor,
            deps.filesystem,
            deps.clock,
            event_bus.clone(),
        );
        Ok(Self {
            database: deps.database,
            event_bus,
            orchestrator,
        })
    }

    /// Receive import progress and library change events.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    /// Catalog database the importer writes to.
    pub fn database(&self) -> Arc<dyn DatabaseAdapter> {
        Arc::clone(&self.database)
    }

    /// Run one import task to completion or until `cancel` fires.
    pub async fn import(&self, task: &ImportTask, cancel: &CancellationToken) -> Result<ImportJob> {
        Ok(self.orchestrator.run(task, cancel).await?)
    }
}

/// Open the catalog at `config.database_path` and build a desktop importer.
///
/// Installs the `config.logging` subscriber unless the process already has
/// one, then opens the catalog and applies migrations.
///
/// ```no_run
/// # async fn example() -> panelsync::Result<()> {
/// use panelsync::core_runtime::config::ImporterConfig;
/// use panelsync::core_metadata::SidecarExtractor;
/// use std::sync::Arc;
///
/// let config = ImporterConfig::builder()
///     .database_path("/var/lib/panelsync/catalog.db")
///     .build()?;
/// let importer = panelsync::bootstrap(config, Arc::new(SidecarExtractor::new())).await?;
/// let library = panelsync::register_library(importer.database().as_ref(), "/comics", 0).await?;
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap(
    config: ImporterConfig,
    extractor: Arc<dyn ComicExtractor>,
) -> Result<Importer> {
    use bridge_traits::time::SystemClock;
    use core_library::adapters::SqliteAdapter;
    use core_library::db::DatabaseConfig;
    use tracing::{debug, info};

    config.validate()?;
    if !core_runtime::logging::init_logging(&config.logging)? {
        debug!("Global subscriber already set, keeping it");
    }
    let adapter = SqliteAdapter::new(DatabaseConfig::new(&config.database_path))
        .await
        .map_err(|err| CoreError::InitializationFailed(err.to_string()))?;
    info!(database = %config.database_path.display(), "Catalog opened");

    Importer::new(
        config,
        ImporterDependencies {
            database: Arc::new(adapter),
            filesystem: Arc::new(bridge_desktop::TokioFileSystem::new()),
            clock: Arc::new(SystemClock),
            extractor,
        },
    )
}

/// Register a library root, returning its id.
///
/// Registering a path twice returns the existing id.
pub async fn register_library(
    database: &dyn DatabaseAdapter,
    path: &str,
    now: i64,
) -> Result<LibraryId> {
    use bridge_traits::database::QueryValue;
    use core_library::LibraryError;

    database
        .execute(
            "INSERT OR IGNORE INTO libraries (path, created_at, updated_at) VALUES (?, ?, ?)",
            &[
                QueryValue::from(path),
                QueryValue::Integer(now),
                QueryValue::Integer(now),
            ],
        )
        .await
        .map_err(LibraryError::from)?;
    let row = database
        .query_one(
            "SELECT id FROM libraries WHERE path = ?",
            &[QueryValue::from(path)],
        )
        .await
        .map_err(LibraryError::from)?;
    let id = row
        .get("id")
        .and_then(QueryValue::as_i64)
        .ok_or_else(|| CoreError::InitializationFailed(format!("no id for library {}", path)))?;
    Ok(LibraryId(id))
}

#[cfg(all(test, feature = "desktop-shims"))]
mod tests {
    use super::*;
    use core_metadata::SidecarExtractor;

    #[tokio::test]
    async fn test_bootstrap_runs_empty_task() {
        let dir = tempfile::tempdir().unwrap();
        let config = ImporterConfig::builder()
            .database_path(dir.path().join("catalog.db"))
            .build()
            .unwrap();
        let importer = bootstrap(config, Arc::new(SidecarExtractor::new()))
            .await
            .unwrap();

        let root = dir.path().join("comics").to_string_lossy().to_string();
        let database = importer.database();
        let library = register_library(database.as_ref(), &root, 1).await.unwrap();
        assert_eq!(
            register_library(database.as_ref(), &root, 2).await.unwrap(),
            library
        );

        let mut events = importer.subscribe();
        let job = importer
            .import(&ImportTask::new(library), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(job.counts, Some(Counts::default()));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_bad_log_filter() {
        use core_runtime::logging::LoggingConfig;

        let dir = tempfile::tempdir().unwrap();
        let config = ImporterConfig::builder()
            .database_path(dir.path().join("catalog.db"))
            .logging(LoggingConfig::default().with_filter("core_sync=["))
            .build()
            .unwrap();
        let result = bootstrap(config, Arc::new(SidecarExtractor::new())).await;
        assert!(matches!(result, Err(CoreError::Config(_))));
        assert!(!dir.path().join("catalog.db").exists());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ImporterConfig::builder()
            .database_path("catalog.db")
            .query_batch_size(0)
            .build();
        assert!(config.is_err());
    }
}
