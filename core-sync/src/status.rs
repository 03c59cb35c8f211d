//! Progress reporting seam
//!
//! The orchestrator reports each phase through a [`StatusReporter`] handed to
//! it by the caller. [`EventStatusReporter`] publishes every notified update
//! as an [`ImportEvent::Progress`] on the event bus, so hosts poll or
//! subscribe without blocking the run.

use core_runtime::events::{CoreEvent, EventBus, ImportEvent, ImportStatus};
use std::sync::Mutex;
use tracing::trace;

/// Receives the status of a running import
#[cfg_attr(test, mockall::automock)]
pub trait StatusReporter: Send + Sync {
    fn start(&self, status: &ImportStatus);

    /// Record a status change; `notify` asks for it to be pushed to
    /// listeners rather than only remembered
    fn update(&self, status: &ImportStatus, notify: bool);

    fn finish(&self, status: &ImportStatus);
}

/// Publishes statuses as import progress events
pub struct EventStatusReporter {
    event_bus: EventBus,
    job_id: String,
    library_id: i64,
    latest: Mutex<Option<ImportStatus>>,
}

impl EventStatusReporter {
    pub fn new(event_bus: EventBus, job_id: impl Into<String>, library_id: i64) -> Self {
        Self {
            event_bus,
            job_id: job_id.into(),
            library_id,
            latest: Mutex::new(None),
        }
    }

    /// Most recent status, notified or not
    pub fn latest(&self) -> Option<ImportStatus> {
        self.latest.lock().ok().and_then(|latest| latest.clone())
    }

    fn remember(&self, status: &ImportStatus) {
        if let Ok(mut latest) = self.latest.lock() {
            *latest = Some(status.clone());
        }
    }

    fn publish(&self, status: &ImportStatus) {
        let event = CoreEvent::Import(ImportEvent::Progress {
            job_id: self.job_id.clone(),
            library_id: self.library_id,
            status: status.clone(),
        });
        if self.event_bus.emit(event).is_err() {
            trace!(code = %status.code, "No subscribers for import progress");
        }
    }
}

impl StatusReporter for EventStatusReporter {
    fn start(&self, status: &ImportStatus) {
        self.remember(status);
        self.publish(status);
    }

    fn update(&self, status: &ImportStatus, notify: bool) {
        self.remember(status);
        if notify {
            self.publish(status);
        }
    }

    fn finish(&self, status: &ImportStatus) {
        let mut status = status.clone();
        if let Some(total) = status.total {
            status.complete = Some(total);
        }
        self.remember(&status);
        self.publish(&status);
    }
}
