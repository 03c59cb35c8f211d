//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the import engine:
//! - Logging and tracing infrastructure
//! - Importer configuration
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the other crates depend on. It
//! establishes the logging conventions, batch-size settings and event
//! broadcasting used by the synchronization pipeline.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{ImporterConfig, ImporterConfigBuilder};
pub use error::{Error, Result};
pub use events::{
    CoreEvent, EventBus, EventSeverity, EventStream, ImportEvent, ImportStatus, LibraryEvent,
};
