//! Operator-facing notifications.

use serde::{Deserialize, Serialize};

use crate::audit::{AuditStatus, PreservationAudit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AuditFinished,
    AuditComplete,
    AuditDead,
}

/// Summary counts attached to audit notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditCounts {
    pub objects: i64,
    pub failures: i64,
    pub retries_remaining: i64,
    pub dead_jobs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub subject: String,
    pub body: String,
    pub counts: AuditCounts,
}

impl Notification {
    /// Build the message for an audit that just entered `status`.
    pub fn for_audit(audit: &PreservationAudit, status: AuditStatus, counts: AuditCounts) -> Self {
        let kind = match status {
            AuditStatus::Complete => NotificationKind::AuditComplete,
            AuditStatus::Dead => NotificationKind::AuditDead,
            _ => NotificationKind::AuditFinished,
        };
        let subject = format!(
            "Preservation audit {} ({}): {}",
            audit.id,
            audit.extent.as_str(),
            status
        );
        let mut body = format!(
            "Objects checked: {}\nCheck failures: {}\nJobs awaiting retry: {}\n",
            counts.objects, counts.failures, counts.retries_remaining
        );
        if counts.dead_jobs > 0 {
            body.push_str(&format!("Dead-lettered jobs: {}\n", counts.dead_jobs));
        }
        if let Some(prev) = audit.ids_from {
            body.push_str(&format!("Rerun of audit {prev}\n"));
        }
        Self {
            kind,
            subject,
            body,
            counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditExtent;
    use chrono::Utc;

    fn audit() -> PreservationAudit {
        PreservationAudit {
            id: 8,
            status: AuditStatus::InProcess,
            extent: AuditExtent::Partial,
            ids_from: Some(3),
            batch_id: Some(1),
            skip_metadata_checksum: false,
            object_count: 4,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn subject_names_audit_and_status() {
        let n = Notification::for_audit(
            &audit(),
            AuditStatus::Failure,
            AuditCounts {
                objects: 4,
                failures: 1,
                retries_remaining: 0,
                dead_jobs: 0,
            },
        );
        assert_eq!(n.kind, NotificationKind::AuditFinished);
        assert_eq!(n.subject, "Preservation audit 8 (partial): failure");
        assert!(n.body.contains("Check failures: 1"));
        assert!(n.body.contains("Rerun of audit 3"));
        assert!(!n.body.contains("Dead-lettered"));
    }

    #[test]
    fn dead_audit_reports_dead_jobs() {
        let n = Notification::for_audit(
            &audit(),
            AuditStatus::Dead,
            AuditCounts {
                dead_jobs: 2,
                ..Default::default()
            },
        );
        assert_eq!(n.kind, NotificationKind::AuditDead);
        assert!(n.body.contains("Dead-lettered jobs: 2"));
    }
}
