//! Object kinds, their cascade policy, and binary uses.
//!
//! Whether preserving a container also preserves its children is a declared
//! property of each kind, resolved once here rather than inferred at call
//! sites.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Cascade policy
// ---------------------------------------------------------------------------

/// How preservation of an object relates to its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadePolicy {
    /// Preserving the container also preserves its committed children.
    CascadingContainer,
    /// A grouping whose children are preserved on their own saves only.
    NonCascadingContainer,
    /// Has no children.
    Leaf,
}

// ---------------------------------------------------------------------------
// ObjectKind
// ---------------------------------------------------------------------------

/// Closed set of preservable live object types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Collection,
    Folder,
    Item,
    Component,
    Attachment,
    Target,
}

/// All kinds, in declaration order.
pub const ALL_OBJECT_KINDS: &[ObjectKind] = &[
    ObjectKind::Collection,
    ObjectKind::Folder,
    ObjectKind::Item,
    ObjectKind::Component,
    ObjectKind::Attachment,
    ObjectKind::Target,
];

impl ObjectKind {
    pub fn cascade_policy(self) -> CascadePolicy {
        match self {
            Self::Item => CascadePolicy::CascadingContainer,
            // Collection members and folder contents carry their own
            // fixity schedule.
            Self::Collection | Self::Folder => CascadePolicy::NonCascadingContainer,
            Self::Component | Self::Attachment | Self::Target => CascadePolicy::Leaf,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Collection => "collection",
            Self::Folder => "folder",
            Self::Item => "item",
            Self::Component => "component",
            Self::Attachment => "attachment",
            Self::Target => "target",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_OBJECT_KINDS
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown object kind: '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// BinaryUse
// ---------------------------------------------------------------------------

/// The role a binary file plays on its live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryUse {
    Original,
    Intermediate,
    PreservationMaster,
    StreamableMedia,
    Caption,
}

pub const ALL_BINARY_USES: &[BinaryUse] = &[
    BinaryUse::Original,
    BinaryUse::Intermediate,
    BinaryUse::PreservationMaster,
    BinaryUse::StreamableMedia,
    BinaryUse::Caption,
];

impl BinaryUse {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Intermediate => "intermediate",
            Self::PreservationMaster => "preservation_master",
            Self::StreamableMedia => "streamable_media",
            Self::Caption => "caption",
        }
    }
}

impl fmt::Display for BinaryUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BinaryUse {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_BINARY_USES
            .iter()
            .copied()
            .find(|u| u.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown binary use: '{s}'")))
    }
}
