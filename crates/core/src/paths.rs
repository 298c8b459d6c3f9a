//! Backup-store key layout.
//!
//! Keys are sharded two levels deep by the SHA-256 of the object id so that
//! sequential ids spread evenly and no directory grows past 256 entries per
//! level.

use crate::hashing::sha256_hex;
use crate::object::BinaryUse;
use crate::types::DbId;

/// File name of the serialized metadata snapshot.
pub const METADATA_FILE: &str = "metadata.json";

/// Directory holding one blob per binary use.
pub const BINARIES_DIR: &str = "binaries";

/// Shard prefix (`ab/cd`) plus the object directory.
pub fn object_prefix(object_id: DbId) -> String {
    let digest = sha256_hex(object_id.to_string().as_bytes());
    format!("{}/{}/{object_id}", &digest[0..2], &digest[2..4])
}

pub fn metadata_key(object_id: DbId) -> String {
    format!("{}/{METADATA_FILE}", object_prefix(object_id))
}

pub fn binary_key(object_id: DbId, binary_use: BinaryUse) -> String {
    format!("{}/{BINARIES_DIR}/{binary_use}", object_prefix(object_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_two_hex_levels() {
        let prefix = object_prefix(42);
        let parts: Vec<_> = prefix.split('/').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 2);
        assert_eq!(parts[1].len(), 2);
        assert_eq!(parts[2], "42");
    }

    #[test]
    fn keys_are_stable() {
        assert_eq!(metadata_key(7), metadata_key(7));
        assert!(metadata_key(7).ends_with("/7/metadata.json"));
        assert!(binary_key(7, BinaryUse::PreservationMaster)
            .ends_with("/7/binaries/preservation_master"));
    }

    #[test]
    fn neighbouring_ids_spread_across_shards() {
        let shards: std::collections::HashSet<_> = (1..=50)
            .map(|id| object_prefix(id)[..5].to_string())
            .collect();
        assert!(shards.len() > 40);
    }
}
