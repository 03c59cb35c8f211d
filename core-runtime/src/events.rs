//! # Event Bus System
//!
//! Provides a broadcast event bus for decoupled communication between the
//! import pipeline and whoever hosts it (a UI, a task queue, a CLI).
//!
//! ## Overview
//!
//! The event bus allows multiple subscribers to receive the same events. Events
//! are strongly typed and serializable for transmission across process
//! boundaries.
//!
//! ## Event Types
//!
//! - `ImportEvent`: Lifecycle and progress of one import run
//! - `LibraryEvent`: Notifications that a library's catalog changed
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Library(LibraryEvent::LibraryChanged { library_id: 1 }))
//!     .ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.severity(), core_runtime::events::EventSeverity::Info);
//! # }
//! ```
//!
//! ## Lagging Subscribers
//!
//! A subscriber that falls more than the buffer size behind receives
//! `RecvError::Lagged(n)` and continues from the oldest retained event.
//! Progress events are advisory, so the pipeline never blocks on slow
//! subscribers.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for event channels.
///
/// Sized for bursts of per-batch progress updates during a large scan.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum that encompasses all event types in the system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Import run lifecycle and progress
    Import(ImportEvent),
    /// Catalog change notifications
    Library(LibraryEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Import(e) => e.description(),
            CoreEvent::Library(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Import(ImportEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Import(ImportEvent::Cancelled { .. }) => EventSeverity::Warning,
            CoreEvent::Import(ImportEvent::Progress { .. }) => EventSeverity::Debug,
            CoreEvent::Library(LibraryEvent::FailedImportsChanged { .. }) => {
                EventSeverity::Warning
            }
            _ => EventSeverity::Info,
        }
    }

    /// Library the event concerns.
    pub fn library_id(&self) -> i64 {
        match self {
            CoreEvent::Import(e) => e.library_id(),
            CoreEvent::Library(e) => e.library_id(),
        }
    }
}

/// Severity level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose, typically filtered in production).
    Debug,
    /// Informational events (normal operation).
    Info,
    /// Warning events (potential issues, but operation continues).
    Warning,
    /// Error events (operation failed).
    Error,
}

// ============================================================================
// Import Events
// ============================================================================

/// Snapshot of one reported status line.
///
/// `code` is stable across runs so hosts can key progress bars on it.
/// `complete` and `total` are `None` while the phase has not sized its work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportStatus {
    pub code: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub complete: Option<u64>,
    pub total: Option<u64>,
}

impl ImportStatus {
    pub fn new(code: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            title: title.into(),
            subtitle: None,
            complete: None,
            total: None,
        }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn with_progress(mut self, complete: u64, total: u64) -> Self {
        self.complete = Some(complete);
        self.total = Some(total);
        self
    }

    /// Completion in percent, when both bounds are known.
    pub fn percent(&self) -> Option<u8> {
        match (self.complete, self.total) {
            (Some(_), Some(0)) => Some(100),
            (Some(complete), Some(total)) => {
                Some(((complete.min(total) * 100) / total) as u8)
            }
            _ => None,
        }
    }
}

/// Events about one import run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ImportEvent {
    /// Run accepted and about to process its first phase.
    Started {
        /// Unique identifier for this run.
        job_id: String,
        library_id: i64,
        status: ImportStatus,
    },
    /// A phase reported progress.
    Progress {
        job_id: String,
        library_id: i64,
        status: ImportStatus,
    },
    /// Run finished every phase.
    Completed {
        job_id: String,
        library_id: i64,
        status: ImportStatus,
        /// Total rows created, updated, deleted, moved or linked.
        changes: u64,
        duration_ms: u64,
    },
    /// A phase failed; earlier phases stay committed.
    Failed {
        job_id: String,
        library_id: i64,
        status: ImportStatus,
        /// Human-readable error message.
        message: String,
    },
    /// Abort was requested; earlier phases stay committed.
    Cancelled {
        job_id: String,
        library_id: i64,
        status: ImportStatus,
    },
}

impl ImportEvent {
    fn description(&self) -> &str {
        match self {
            ImportEvent::Started { .. } => "Import started",
            ImportEvent::Progress { .. } => "Import in progress",
            ImportEvent::Completed { .. } => "Import completed successfully",
            ImportEvent::Failed { .. } => "Import failed",
            ImportEvent::Cancelled { .. } => "Import cancelled",
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            ImportEvent::Started { job_id, .. }
            | ImportEvent::Progress { job_id, .. }
            | ImportEvent::Completed { job_id, .. }
            | ImportEvent::Failed { job_id, .. }
            | ImportEvent::Cancelled { job_id, .. } => job_id,
        }
    }

    pub fn status(&self) -> &ImportStatus {
        match self {
            ImportEvent::Started { status, .. }
            | ImportEvent::Progress { status, .. }
            | ImportEvent::Completed { status, .. }
            | ImportEvent::Failed { status, .. }
            | ImportEvent::Cancelled { status, .. } => status,
        }
    }

    fn library_id(&self) -> i64 {
        match self {
            ImportEvent::Started { library_id, .. }
            | ImportEvent::Progress { library_id, .. }
            | ImportEvent::Completed { library_id, .. }
            | ImportEvent::Failed { library_id, .. }
            | ImportEvent::Cancelled { library_id, .. } => *library_id,
        }
    }
}

// ============================================================================
// Library Events
// ============================================================================

/// Events about a library's catalog contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    /// Comics, groups, folders or covers changed.
    LibraryChanged { library_id: i64 },
    /// Search documents should be resynchronized.
    SearchIndexUpdateRequested { library_id: i64 },
    /// The set of failed imports changed.
    FailedImportsChanged { library_id: i64 },
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::LibraryChanged { .. } => "Library changed",
            LibraryEvent::SearchIndexUpdateRequested { .. } => "Search index update requested",
            LibraryEvent::FailedImportsChanged { .. } => "Failed imports changed",
        }
    }

    fn library_id(&self) -> i64 {
        match self {
            LibraryEvent::LibraryChanged { library_id }
            | LibraryEvent::SearchIndexUpdateRequested { library_id }
            | LibraryEvent::FailedImportsChanged { library_id } => *library_id,
        }
    }
}

// ============================================================================
// Event Bus Implementation
// ============================================================================

/// Central event bus for publishing and subscribing to core events.
///
/// Cloning is cheap; every clone publishes to the same channel.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut first = event_bus.subscribe();
/// let mut second = event_bus.subscribe();
///
/// let sent = event_bus
///     .emit(CoreEvent::Library(LibraryEvent::LibraryChanged { library_id: 7 }))
///     .unwrap();
/// assert_eq!(sent, 2);
/// assert!(first.try_recv().is_ok());
/// assert!(second.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// When a subscriber falls behind by more than `capacity` events, it
    /// receives a `RecvError::Lagged` error.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let library_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| event.library_id() == 3);
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn changed(library_id: i64) -> CoreEvent {
        CoreEvent::Library(LibraryEvent::LibraryChanged { library_id })
    }

    fn progress(job_id: &str, complete: u64) -> CoreEvent {
        let mut status = ImportStatus::new("import.extract", "Reading metadata").with_total(10);
        status.complete = Some(complete);
        CoreEvent::Import(ImportEvent::Progress {
            job_id: job_id.to_string(),
            library_id: 1,
            status,
        })
    }

    #[tokio::test]
    async fn test_event_bus_creation() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.emit(changed(1)).is_err());
    }

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.emit(changed(4)).unwrap(), 2);
        assert_eq!(sub1.recv().await.unwrap(), changed(4));
        assert_eq!(sub2.recv().await.unwrap(), changed(4));
    }

    #[tokio::test]
    async fn test_lagging_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        for i in 0..5 {
            bus.emit(progress("job", i)).unwrap();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(3))));
        assert_eq!(sub.recv().await.unwrap(), progress("job", 3));
    }

    #[tokio::test]
    async fn test_event_stream_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Library(_)));

        bus.emit(progress("job", 1)).unwrap();
        bus.emit(changed(2)).unwrap();

        assert_eq!(stream.recv().await.unwrap(), changed(2));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_event_stream_closed() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe());
        drop(bus);
        assert!(matches!(stream.recv().await, Err(RecvError::Closed)));
    }

    #[test]
    fn test_event_severity() {
        assert_eq!(changed(1).severity(), EventSeverity::Info);
        assert_eq!(progress("job", 0).severity(), EventSeverity::Debug);
        let failed = CoreEvent::Import(ImportEvent::Failed {
            job_id: "job".to_string(),
            library_id: 1,
            status: ImportStatus::new("import.link", "Linking"),
            message: "disk I/O error".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);
        assert_eq!(failed.description(), "Import failed");
        assert!(EventSeverity::Error > EventSeverity::Warning);
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Library(LibraryEvent::SearchIndexUpdateRequested { library_id: 9 });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Library");
        assert_eq!(json["payload"]["event"], "SearchIndexUpdateRequested");
        assert_eq!(json["payload"]["library_id"], 9);

        let back: CoreEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_status_percent() {
        let mut status = ImportStatus::new("import.comics", "Writing comics");
        assert_eq!(status.percent(), None);
        status.total = Some(4);
        status.complete = Some(1);
        assert_eq!(status.percent(), Some(25));
        status.total = Some(0);
        assert_eq!(status.percent(), Some(100));
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = EventBus::new(64);
        let mut sub = bus.subscribe();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let bus = bus.clone();
                tokio::spawn(async move {
                    for _ in 0..5 {
                        bus.emit(changed(i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let mut received = 0;
        while sub.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 20);
    }
}
