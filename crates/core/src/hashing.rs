//! Multi-algorithm checksum utilities.
//!
//! Every preserved node records SHA-1, SHA-256 and SHA-512 digests. SHA-256
//! is the algorithm used for comparisons and for server-side integrity
//! verification on upload; the others are kept for external verifiers.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use tokio::io::AsyncReadExt;

/// Read buffer used when hashing files.
const READ_CHUNK: usize = 64 * 1024;

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Hex digests of one byte stream under every supported algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    pub sha1: String,
    pub sha256: String,
    pub sha512: String,
}

impl Checksums {
    /// Digest an in-memory buffer.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = ChecksumHasher::new();
        hasher.update(data);
        hasher.finalize().0
    }

    /// Digest a file from disk without loading it into memory.
    ///
    /// Returns the checksums and the number of bytes read.
    pub async fn compute_file(path: &Path) -> std::io::Result<(Self, u64)> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = ChecksumHasher::new();
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }

    /// True when the SHA-256 digest equals `sha256` (case-insensitive).
    pub fn matches_sha256(&self, sha256: &str) -> bool {
        self.sha256.eq_ignore_ascii_case(sha256)
    }
}

/// Incremental hasher feeding all algorithms at once.
pub struct ChecksumHasher {
    sha1: Sha1,
    sha256: Sha256,
    sha512: Sha512,
    len: u64,
}

impl ChecksumHasher {
    pub fn new() -> Self {
        Self {
            sha1: Sha1::new(),
            sha256: Sha256::new(),
            sha512: Sha512::new(),
            len: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.sha1.update(data);
        self.sha256.update(data);
        self.sha512.update(data);
        self.len += data.len() as u64;
    }

    /// Finish hashing, returning the digests and total byte count.
    pub fn finalize(self) -> (Checksums, u64) {
        let checksums = Checksums {
            sha1: format!("{:x}", self.sha1.finalize()),
            sha256: format!("{:x}", self.sha256.finalize()),
            sha512: format!("{:x}", self.sha512.finalize()),
        };
        (checksums, self.len)
    }
}

impl Default for ChecksumHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a hex digest into raw bytes (e.g. for base64 integrity headers).
pub fn digest_bytes(hex_digest: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(hex_digest)
}
