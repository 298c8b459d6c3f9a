//! Notifier that writes to the structured log. Used when SMTP is not
//! configured.

use ark_core::notification::Notification;
use ark_core::ports::{Notifier, StoreResult};
use async_trait::async_trait;

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> StoreResult<()> {
        tracing::info!(
            kind = ?notification.kind,
            subject = %notification.subject,
            objects = notification.counts.objects,
            failures = notification.counts.failures,
            dead_jobs = notification.counts.dead_jobs,
            "Notification"
        );
        Ok(())
    }
}
