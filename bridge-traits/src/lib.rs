//! # Host Bridge Traits
//!
//! Capability traits the synchronization core needs from its host.
//!
//! ## Overview
//!
//! The core never talks to SQLite or the filesystem directly. Each capability
//! is expressed as a trait here and implemented once per host:
//!
//! - [`DatabaseAdapter`](database::DatabaseAdapter) - Parameterized SQL against the catalog store
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Presence and metadata checks for library paths
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](logging::LoggerSink) - Forward structured logs to host logging
//!
//! | Capability | Implementation |
//! |------------|----------------|
//! | `DatabaseAdapter` | `core_library::adapters::SqliteAdapter` |
//! | `FileSystemAccess` | `bridge_desktop::TokioFileSystem` |
//! | `Clock` | [`SystemClock`] |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! convert their native errors and include the offending path or statement
//! where it helps.
//!
//! ## Thread Safety
//!
//! Every trait requires `Send + Sync` so a single adapter can be shared across
//! concurrent library runs behind an `Arc`.

pub mod database;
pub mod error;
pub mod logging;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use database::{DatabaseAdapter, QueryRow, QueryValue};
pub use storage::{FileMetadata, FileSystemAccess};
pub use logging::{LogEntry, LogLevel, LoggerSink};
pub use time::{Clock, FixedClock, SystemClock};
