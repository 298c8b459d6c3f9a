//! Fixity events, verification messages, and sampling arithmetic.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Status / property / origin
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixityStatus {
    Success,
    Failure,
    /// Provisional: automated repair has claimed this node.
    Repairing,
}

impl FixityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Repairing => "REPAIRING",
        }
    }
}

impl fmt::Display for FixityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FixityStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            "REPAIRING" => Ok(Self::Repairing),
            other => Err(CoreError::Validation(format!(
                "Unknown fixity status: '{other}'"
            ))),
        }
    }
}

/// Which part of a preservation record a check targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildProperty {
    MetadataNode,
    BinaryNodes,
}

impl ChildProperty {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MetadataNode => "metadata_node",
            Self::BinaryNodes => "binary_nodes",
        }
    }
}

impl fmt::Display for ChildProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChildProperty {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metadata_node" => Ok(Self::MetadataNode),
            "binary_nodes" => Ok(Self::BinaryNodes),
            other => Err(CoreError::Validation(format!(
                "Unknown child property: '{other}'"
            ))),
        }
    }
}

/// Who produced an event. Only verification failures start a repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOrigin {
    Verification,
    Repair,
}

impl EventOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::Repair => "repair",
        }
    }
}

impl FromStr for EventOrigin {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verification" => Ok(Self::Verification),
            "repair" => Ok(Self::Repair),
            other => Err(CoreError::Validation(format!(
                "Unknown event origin: '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Node reference and events
// ---------------------------------------------------------------------------

/// Identifies one preserved node: `(resource_id, child_id, child_property)`.
///
/// `child_id` is the binary node id for binaries and `None` for metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub resource_id: DbId,
    pub child_id: Option<DbId>,
    pub child_property: ChildProperty,
}

impl NodeRef {
    pub fn metadata(resource_id: DbId) -> Self {
        Self {
            resource_id,
            child_id: None,
            child_property: ChildProperty::MetadataNode,
        }
    }

    pub fn binary(resource_id: DbId, node_id: DbId) -> Self {
        Self {
            resource_id,
            child_id: Some(node_id),
            child_property: ChildProperty::BinaryNodes,
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.child_id {
            Some(child) => write!(f, "{}/{}#{child}", self.resource_id, self.child_property),
            None => write!(f, "{}/{}", self.resource_id, self.child_property),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixityEvent {
    pub id: DbId,
    pub status: FixityStatus,
    pub node: NodeRef,
    pub origin: EventOrigin,
    pub detail: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFixityEvent {
    pub status: FixityStatus,
    pub node: NodeRef,
    pub origin: EventOrigin,
    pub detail: Option<String>,
    /// When the outcome was observed. Concurrent events on one node are
    /// ordered by this, never by arrival.
    pub observed_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Channel messages
// ---------------------------------------------------------------------------

/// Ask a checker to verify one preserved node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixityRequest {
    /// SHA-256 hex digest recorded for the node.
    pub expected_checksum: String,
    pub expected_size: i64,
    pub blob_locator: String,
    pub correlation: NodeRef,
}

/// Outcome reported by a checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixityResult {
    pub status: FixityStatus,
    pub resource_id: DbId,
    pub child_id: Option<DbId>,
    pub child_property: ChildProperty,
    #[serde(default)]
    pub detail: Option<String>,
    pub observed_at: Timestamp,
}

impl FixityResult {
    pub fn node(&self) -> NodeRef {
        NodeRef {
            resource_id: self.resource_id,
            child_id: self.child_id,
            child_property: self.child_property,
        }
    }

    /// Reject shapes the event log cannot store.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.status == FixityStatus::Repairing {
            return Err(CoreError::Validation(
                "Verification results cannot report REPAIRING".into(),
            ));
        }
        match (self.child_property, self.child_id) {
            (ChildProperty::BinaryNodes, None) => Err(CoreError::Validation(
                "Binary results require a child_id".into(),
            )),
            (ChildProperty::MetadataNode, Some(_)) => Err(CoreError::Validation(
                "Metadata results must not carry a child_id".into(),
            )),
            _ => Ok(()),
        }
    }

    pub fn into_event(self) -> NewFixityEvent {
        NewFixityEvent {
            status: self.status,
            node: self.node(),
            origin: EventOrigin::Verification,
            detail: self.detail,
            observed_at: self.observed_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Sampling
// ---------------------------------------------------------------------------

/// Number of records to verify today so that `annual_percent` of the corpus
/// is covered over a year.
pub fn daily_sample_count(total: u64, annual_percent: f64) -> u64 {
    if total == 0 || annual_percent <= 0.0 {
        return 0;
    }
    let raw = (total as f64 * annual_percent / 100.0 / 365.0).ceil() as u64;
    raw.min(total)
}
