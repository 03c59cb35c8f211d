//! # Importer Configuration
//!
//! Provides configuration management for the library synchronization engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct an
//! `ImporterConfig`. Validation is fail-fast: `build()` rejects a missing
//! database path or a zero batch size with an actionable message.
//!
//! ## Batch sizes
//!
//! - `query_batch_size` - key tuples per existence query (the backend's OR
//!   predicate limit)
//! - `write_batch_size` - rows per upsert statement
//! - `link_batch_size` - comics per association read and rows per link write
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::config::ImporterConfig;
//!
//! let config = ImporterConfig::builder()
//!     .database_path("/var/lib/panelsync/catalog.db")
//!     .query_batch_size(500)
//!     .build()
//!     .expect("valid config");
//! assert_eq!(config.write_batch_size, 500);
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::ImporterConfig;
//!
//! // Panics: no database path
//! let config = ImporterConfig::builder().build().expect("Should fail");
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use crate::logging::LoggingConfig;
use std::path::PathBuf;

/// Default key tuples per existence query.
pub const DEFAULT_QUERY_BATCH_SIZE: usize = 1000;
/// Default rows per upsert statement.
pub const DEFAULT_WRITE_BATCH_SIZE: usize = 500;
/// Default comics per association read.
pub const DEFAULT_LINK_BATCH_SIZE: usize = 1000;
/// Default maximum stored length of a failed import reason.
pub const DEFAULT_FAILED_REASON_MAX_LEN: usize = 255;

/// Settings for an import run and the runtime around it
#[derive(Debug, Clone)]
pub struct ImporterConfig {
    pub database_path: PathBuf,
    pub query_batch_size: usize,
    pub write_batch_size: usize,
    pub link_batch_size: usize,
    pub failed_reason_max_len: usize,
    pub event_buffer_size: usize,
    pub logging: LoggingConfig,
}

impl ImporterConfig {
    /// Creates a new builder for constructing an `ImporterConfig`.
    pub fn builder() -> ImporterConfigBuilder {
        ImporterConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Database path is not empty
    /// - Every batch size is greater than zero
    /// - Failure reasons and event buffers have room for at least one entry
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        for (name, value) in [
            ("query_batch_size", self.query_batch_size),
            ("write_batch_size", self.write_batch_size),
            ("link_batch_size", self.link_batch_size),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than 0", name)));
            }
        }

        if self.failed_reason_max_len == 0 {
            return Err(Error::Config(
                "failed_reason_max_len must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "event_buffer_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for [`ImporterConfig`]
#[derive(Debug, Default)]
pub struct ImporterConfigBuilder {
    database_path: Option<PathBuf>,
    query_batch_size: Option<usize>,
    write_batch_size: Option<usize>,
    link_batch_size: Option<usize>,
    failed_reason_max_len: Option<usize>,
    event_buffer_size: Option<usize>,
    logging: Option<LoggingConfig>,
}

impl ImporterConfigBuilder {
    /// Sets the catalog database path (required).
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Key tuples per existence query.
    ///
    /// Default: 1000
    pub fn query_batch_size(mut self, size: usize) -> Self {
        self.query_batch_size = Some(size);
        self
    }

    /// Rows per upsert statement.
    ///
    /// Default: 500
    pub fn write_batch_size(mut self, size: usize) -> Self {
        self.write_batch_size = Some(size);
        self
    }

    /// Comics per association read and rows per association write.
    ///
    /// Default: 1000
    pub fn link_batch_size(mut self, size: usize) -> Self {
        self.link_batch_size = Some(size);
        self
    }

    /// Maximum stored length of a failed import reason, in characters.
    ///
    /// Default: 255
    pub fn failed_reason_max_len(mut self, len: usize) -> Self {
        self.failed_reason_max_len = Some(len);
        self
    }

    /// Buffer size of the event bus.
    ///
    /// Default: 100
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Builds the final `ImporterConfig` instance.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the database path is missing or any value
    /// fails [`ImporterConfig::validate`].
    pub fn build(self) -> Result<ImporterConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let config = ImporterConfig {
            database_path,
            query_batch_size: self.query_batch_size.unwrap_or(DEFAULT_QUERY_BATCH_SIZE),
            write_batch_size: self.write_batch_size.unwrap_or(DEFAULT_WRITE_BATCH_SIZE),
            link_batch_size: self.link_batch_size.unwrap_or(DEFAULT_LINK_BATCH_SIZE),
            failed_reason_max_len: self
                .failed_reason_max_len
                .unwrap_or(DEFAULT_FAILED_REASON_MAX_LEN),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            logging: self.logging.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;

    #[test]
    fn test_defaults() {
        let config = ImporterConfig::builder()
            .database_path("/tmp/catalog.db")
            .build()
            .unwrap();

        assert_eq!(config.query_batch_size, 1000);
        assert_eq!(config.write_batch_size, 500);
        assert_eq!(config.link_batch_size, 1000);
        assert_eq!(config.failed_reason_max_len, 255);
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
    }

    #[test]
    fn test_missing_database_path() {
        let err = ImporterConfig::builder().build().unwrap_err();
        assert!(err.to_string().contains(".database_path()"));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = ImporterConfig::builder()
            .database_path("/tmp/catalog.db")
            .query_batch_size(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("query_batch_size"));

        assert!(ImporterConfig::builder()
            .database_path("/tmp/catalog.db")
            .link_batch_size(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_empty_database_path_rejected() {
        assert!(ImporterConfig::builder().database_path("").build().is_err());
    }

    #[test]
    fn test_overrides() {
        let config = ImporterConfig::builder()
            .database_path("/tmp/catalog.db")
            .write_batch_size(50)
            .failed_reason_max_len(80)
            .logging(LoggingConfig::default().with_format(LogFormat::Json))
            .build()
            .unwrap();

        assert_eq!(config.write_batch_size, 50);
        assert_eq!(config.failed_reason_max_len, 80);
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
