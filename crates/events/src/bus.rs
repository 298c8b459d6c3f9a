//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`PreservationEvent`]s.
//! It is shared via `Arc<EventBus>` between the fixity worker, the repair
//! coordinator and the audit runner.

use ark_core::audit::AuditStatus;
use ark_core::fixity::{EventOrigin, FixityEvent, FixityStatus};
use ark_core::types::DbId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// PreservationEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PreservationEvent {
    /// A fixity event was appended to the log.
    FixityRecorded { event: FixityEvent },
    /// A preservation record was created or refreshed.
    RecordPreserved {
        record_id: DbId,
        object_id: DbId,
        at: DateTime<Utc>,
    },
    /// A preservation record and its copies were removed.
    RecordDeleted {
        record_id: DbId,
        object_id: DbId,
        at: DateTime<Utc>,
    },
    /// An audit changed status.
    AuditTransitioned {
        audit_id: DbId,
        status: AuditStatus,
        at: DateTime<Utc>,
    },
}

impl PreservationEvent {
    /// Dot-separated event name, e.g. `"fixity.recorded"`.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::FixityRecorded { .. } => "fixity.recorded",
            Self::RecordPreserved { .. } => "record.preserved",
            Self::RecordDeleted { .. } => "record.deleted",
            Self::AuditTransitioned { .. } => "audit.transitioned",
        }
    }

    /// The event is a verification failure that should trigger repair.
    /// Failures recorded by repair itself are terminal.
    pub fn repair_candidate(&self) -> Option<&FixityEvent> {
        match self {
            Self::FixityRecorded { event }
                if event.status == FixityStatus::Failure
                    && event.origin == EventOrigin::Verification =>
            {
                Some(event)
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// When the buffer is full the oldest unconsumed events are dropped and
/// slow receivers observe `RecvError::Lagged`. Subscribers that cannot
/// afford to miss events must reconcile from durable state on lag.
pub struct EventBus {
    sender: broadcast::Sender<PreservationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers. Dropped silently when
    /// nobody is subscribed.
    pub fn publish(&self, event: PreservationEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PreservationEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
