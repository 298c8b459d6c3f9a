//! Lock tokens: opaque version markers copied from the live object.
//!
//! A token changes whenever the live object's content changes, so comparing
//! the token stored at preservation time with the current one tells us
//! whether metadata needs re-preserving without re-reading or re-hashing.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(String);

impl LockToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LockToken {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Whether the preserved copy is behind the live object.
///
/// Nothing preserved yet counts as stale.
pub fn is_stale(preserved: Option<&LockToken>, current: &LockToken) -> bool {
    preserved != Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_preserved_is_stale() {
        assert!(is_stale(None, &LockToken::from("v1")));
    }

    #[test]
    fn same_token_is_fresh() {
        let token = LockToken::from("v1");
        assert!(!is_stale(Some(&token), &LockToken::from("v1")));
    }

    #[test]
    fn changed_token_is_stale() {
        assert!(is_stale(Some(&LockToken::from("v1")), &LockToken::from("v2")));
    }

    #[test]
    fn serializes_as_bare_string() {
        let json = serde_json::to_string(&LockToken::from("v7")).unwrap();
        assert_eq!(json, "\"v7\"");
    }
}
