//! Structured-log journal of preservation events.
//!
//! [`EventJournal`] subscribes to the [`EventBus`](crate::bus::EventBus) and
//! writes one log line per event. It runs as a long-lived background task
//! and stops when cancelled or when the bus is dropped.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::bus::PreservationEvent;

pub struct EventJournal;

impl EventJournal {
    pub async fn run(mut receiver: broadcast::Receiver<PreservationEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Event journal stopping");
                    break;
                }
                received = receiver.recv() => match received {
                    Ok(event) => Self::write(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Event journal lagged, some events were not logged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Event bus closed, journal shutting down");
                        break;
                    }
                },
            }
        }
    }

    fn write(event: &PreservationEvent) {
        match event {
            PreservationEvent::FixityRecorded { event: fixity } => tracing::info!(
                event_type = event.event_type(),
                node = %fixity.node,
                status = fixity.status.as_str(),
                origin = fixity.origin.as_str(),
                detail = fixity.detail.as_deref().unwrap_or(""),
                "Preservation event"
            ),
            PreservationEvent::RecordPreserved { record_id, object_id, .. }
            | PreservationEvent::RecordDeleted { record_id, object_id, .. } => tracing::info!(
                event_type = event.event_type(),
                record_id,
                object_id,
                "Preservation event"
            ),
            PreservationEvent::AuditTransitioned { audit_id, status, .. } => tracing::info!(
                event_type = event.event_type(),
                audit_id,
                status = status.as_str(),
                "Preservation event"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;

    #[tokio::test]
    async fn stops_when_bus_is_dropped() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        let handle = tokio::spawn(EventJournal::run(rx, CancellationToken::new()));
        drop(bus);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let bus = EventBus::default();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(EventJournal::run(bus.subscribe(), cancel.clone()));
        cancel.cancel();
        handle.await.unwrap();
    }
}
