//! # Import Job State Machine
//!
//! Lifecycle of one import run with validated state transitions.
//!
//! ## Overview
//!
//! An [`ImportJob`] moves through [`JobStatus`] like any long-running job and,
//! while running, through the pipeline's [`ImportPhase`]s. Phases only ever
//! advance in pipeline order; skipping ahead is allowed (an empty task jumps
//! straight to `Finish`), going back is not.
//!
//! ## State Machine
//!
//! ```text
//! Pending → Running → Completed
//!     ↓         ↓
//!     └──────→ Failed
//!     └──────→ Cancelled
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{Counts, ImportJob, ImportPhase};
//!
//! let job = ImportJob::new(LibraryId(1), now_ms).start(now_ms)?;
//! job.advance(ImportPhase::Extract)?;
//! let job = job.complete(Counts::default(), later_ms)?;
//! ```
//!
//! Timestamps are unix milliseconds taken from the run's `Clock`.

use crate::{Result, SyncError};
use core_library::LibraryId;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for an import job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImportJobId(Uuid);

impl ImportJobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an import job ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidJobId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ImportJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ImportJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ImportJobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// Status Types
// ============================================================================

/// The current status of an import job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created but not yet started
    Pending,
    Running,
    Completed,
    /// Stopped by a fatal batch error
    Failed,
    /// Stopped by the abort signal
    Cancelled,
}

impl JobStatus {
    /// Check if this status represents a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for JobStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Phases
// ============================================================================

/// Pipeline phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Init,
    Move,
    Extract,
    Aggregate,
    QueryMissing,
    CreateFks,
    Covers,
    Comics,
    Link,
    DeleteStale,
    FailedImports,
    SearchSync,
    Finish,
}

impl ImportPhase {
    pub const ALL: [ImportPhase; 13] = [
        ImportPhase::Init,
        ImportPhase::Move,
        ImportPhase::Extract,
        ImportPhase::Aggregate,
        ImportPhase::QueryMissing,
        ImportPhase::CreateFks,
        ImportPhase::Covers,
        ImportPhase::Comics,
        ImportPhase::Link,
        ImportPhase::DeleteStale,
        ImportPhase::FailedImports,
        ImportPhase::SearchSync,
        ImportPhase::Finish,
    ];

    /// Stable status code, e.g. `import.query_missing`
    pub fn code(&self) -> &'static str {
        match self {
            ImportPhase::Init => "import.init",
            ImportPhase::Move => "import.move",
            ImportPhase::Extract => "import.extract",
            ImportPhase::Aggregate => "import.aggregate",
            ImportPhase::QueryMissing => "import.query_missing",
            ImportPhase::CreateFks => "import.create_fks",
            ImportPhase::Covers => "import.covers",
            ImportPhase::Comics => "import.comics",
            ImportPhase::Link => "import.link",
            ImportPhase::DeleteStale => "import.delete_stale",
            ImportPhase::FailedImports => "import.failed_imports",
            ImportPhase::SearchSync => "import.search_sync",
            ImportPhase::Finish => "import.finish",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ImportPhase::Init => "Preparing import",
            ImportPhase::Move => "Moving files",
            ImportPhase::Extract => "Reading comic metadata",
            ImportPhase::Aggregate => "Aggregating metadata",
            ImportPhase::QueryMissing => "Querying missing tags",
            ImportPhase::CreateFks => "Creating tags",
            ImportPhase::Covers => "Importing custom covers",
            ImportPhase::Comics => "Writing comics",
            ImportPhase::Link => "Linking comics",
            ImportPhase::DeleteStale => "Removing deleted files",
            ImportPhase::FailedImports => "Updating failed imports",
            ImportPhase::SearchSync => "Syncing search index",
            ImportPhase::Finish => "Finishing import",
        }
    }

    /// The phase after this one, `None` after `Finish`
    pub fn next(&self) -> Option<ImportPhase> {
        let index = Self::ALL.iter().position(|p| p == self)?;
        Self::ALL.get(index + 1).copied()
    }
}

impl FromStr for ImportPhase {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        ImportPhase::ALL
            .iter()
            .find(|phase| phase.code().trim_start_matches("import.") == s.to_lowercase())
            .copied()
            .ok_or_else(|| SyncError::InvalidPhase(s.to_string()))
    }
}

impl std::fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code().trim_start_matches("import."))
    }
}

// ============================================================================
// Counts
// ============================================================================

/// What an import run changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub comics_created: u64,
    pub comics_updated: u64,
    pub comics_deleted: u64,
    pub comics_moved: u64,
    /// Relation rows (every non-comic table) created
    pub tags_created: u64,
    pub tags_updated: u64,
    pub covers_created: u64,
    pub covers_updated: u64,
    pub covers_deleted: u64,
    pub covers_moved: u64,
    pub folders_created: u64,
    pub folders_deleted: u64,
    pub folders_moved: u64,
    pub links_created: u64,
    pub links_deleted: u64,
    /// Paths newly recorded as failed
    pub failed_imports_created: u64,
    /// Paths still failing, reason refreshed
    pub failed_imports_updated: u64,
    /// Failed paths that now import cleanly or vanished
    pub failed_imports_recovered: u64,
}

impl Counts {
    /// Changes to comics, relation rows, folders or links
    pub fn comic_affecting(&self) -> u64 {
        self.comics_created
            + self.comics_updated
            + self.comics_deleted
            + self.comics_moved
            + self.tags_created
            + self.tags_updated
            + self.folders_created
            + self.folders_deleted
            + self.folders_moved
            + self.links_created
            + self.links_deleted
    }

    pub fn covers(&self) -> u64 {
        self.covers_created + self.covers_updated + self.covers_deleted + self.covers_moved
    }

    /// Whether the set of failed paths changed
    pub fn failed_imports_changed(&self) -> bool {
        self.failed_imports_created + self.failed_imports_recovered > 0
    }

    pub fn total(&self) -> u64 {
        self.comic_affecting()
            + self.covers()
            + self.failed_imports_created
            + self.failed_imports_recovered
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

// ============================================================================
// Import Job Entity
// ============================================================================

/// One import run for one library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: ImportJobId,
    pub library_id: LibraryId,
    pub status: JobStatus,
    pub phase: ImportPhase,
    /// Only available when completed
    pub counts: Option<Counts>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl ImportJob {
    pub fn new(library_id: LibraryId, now: i64) -> Self {
        Self {
            id: ImportJobId::new(),
            library_id,
            status: JobStatus::Pending,
            phase: ImportPhase::Init,
            counts: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Start the job
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not in `Pending` state
    pub fn start(mut self, now: i64) -> Result<Self> {
        self.validate_transition(JobStatus::Running)?;
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        Ok(self)
    }

    /// Move to a later phase
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not running or `phase` does not come
    /// after the current phase
    pub fn advance(&mut self, phase: ImportPhase) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: phase.to_string(),
                reason: "Job must be running to change phase".to_string(),
            });
        }
        if phase <= self.phase {
            return Err(SyncError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: phase.to_string(),
                reason: "Phases only advance in pipeline order".to_string(),
            });
        }
        self.phase = phase;
        Ok(())
    }

    /// Mark the job as completed with its counts
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not in `Running` state
    pub fn complete(mut self, counts: Counts, now: i64) -> Result<Self> {
        self.validate_transition(JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.phase = ImportPhase::Finish;
        self.completed_at = Some(now);
        self.counts = Some(counts);
        Ok(self)
    }

    /// Mark the job as failed with an error message
    ///
    /// # Errors
    ///
    /// Returns an error if the job is already in a terminal state
    pub fn fail(mut self, error_message: String, now: i64) -> Result<Self> {
        self.validate_transition(JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.completed_at = Some(now);
        self.error_message = Some(error_message);
        Ok(self)
    }

    /// Cancel the job
    ///
    /// # Errors
    ///
    /// Returns an error if the job is already in a terminal state
    pub fn cancel(mut self, now: i64) -> Result<Self> {
        self.validate_transition(JobStatus::Cancelled)?;
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(now);
        Ok(self)
    }

    /// Run time in milliseconds, once the job has ended
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start).max(0) as u64),
            _ => None,
        }
    }

    fn validate_transition(&self, to: JobStatus) -> Result<()> {
        let valid = matches!(
            (self.status, to),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        );

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
