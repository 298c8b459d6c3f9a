//! Preservation audits: batch-tracked verification sweeps.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    InProcess,
    /// Every job ran once and no object failed its check.
    Success,
    /// Every job ran once and at least one object failed its check.
    Failure,
    /// Every job eventually succeeded, retries included.
    Complete,
    /// The scheduler dead-lettered a job.
    Dead,
}

pub const ALL_AUDIT_STATUSES: &[AuditStatus] = &[
    AuditStatus::InProcess,
    AuditStatus::Success,
    AuditStatus::Failure,
    AuditStatus::Complete,
    AuditStatus::Dead,
];

impl AuditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProcess => "in_process",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Complete => "complete",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_AUDIT_STATUSES
            .iter()
            .copied()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown audit status: '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditExtent {
    Full,
    Partial,
}

impl AuditExtent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Partial => "partial",
        }
    }
}

impl FromStr for AuditExtent {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "partial" => Ok(Self::Partial),
            other => Err(CoreError::Validation(format!(
                "Unknown audit extent: '{other}'"
            ))),
        }
    }
}

/// What an audit run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditScope {
    Full,
    /// Only the failing resources of a previous audit.
    IdsFrom(DbId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreservationAudit {
    pub id: DbId,
    pub status: AuditStatus,
    pub extent: AuditExtent,
    pub ids_from: Option<DbId>,
    pub batch_id: Option<DbId>,
    pub skip_metadata_checksum: bool,
    pub object_count: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAudit {
    pub extent: AuditExtent,
    pub ids_from: Option<DbId>,
    pub skip_metadata_checksum: bool,
    pub object_count: i64,
}

impl NewAudit {
    pub fn for_scope(scope: AuditScope, skip_metadata_checksum: bool, object_count: i64) -> Self {
        let (extent, ids_from) = match scope {
            AuditScope::Full => (AuditExtent::Full, None),
            AuditScope::IdsFrom(id) => (AuditExtent::Partial, Some(id)),
        };
        Self {
            extent,
            ids_from,
            skip_metadata_checksum,
            object_count,
        }
    }
}

/// One object that failed its check during an audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFailure {
    pub id: DbId,
    pub audit_id: DbId,
    /// The live object id.
    pub resource_id: DbId,
    pub reason: String,
    pub created_at: Timestamp,
}
