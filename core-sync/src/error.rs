use core_library::{LibraryError, Relation};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// The store rejected a batched existence query; fatal to the run
    #[error("Existence query for {relation} failed: {message}")]
    QueryBatch { relation: String, message: String },

    #[error("Import cancelled")]
    Cancelled,

    #[error("Invalid job ID: {0}")]
    InvalidJobId(String),

    #[error("Invalid job status: {0}")]
    InvalidStatus(String),

    #[error("Invalid import phase: {0}")]
    InvalidPhase(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Filesystem error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),
}

impl SyncError {
    pub fn query_batch(relation: Relation, err: LibraryError) -> Self {
        SyncError::QueryBatch {
            relation: relation.to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// A single row that could not be prepared for writing
///
/// Logged and skipped; the rest of the batch is still written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Skipping {relation} row {key}: {reason}")]
pub struct RowPrepareError {
    pub relation: String,
    pub key: String,
    pub reason: String,
}

impl RowPrepareError {
    pub fn new(relation: impl fmt::Display, key: impl fmt::Debug, reason: impl Into<String>) -> Self {
        Self {
            relation: relation.to_string(),
            key: format!("{:?}", key),
            reason: reason.into(),
        }
    }
}

/// A proposed association whose target row no longer exists
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Dropping {relation} link for {comic}: no row for {target}")]
pub struct LinkResolutionError {
    pub relation: String,
    pub comic: String,
    pub target: String,
}
