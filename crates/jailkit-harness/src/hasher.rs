//! Content hashing used to tag fixtures.

use std::fmt;

use sha2::{Digest, Sha256};

/// Computes a stable digest of a byte slice.
pub trait ContentHasher: fmt::Debug + Send + Sync {
    /// Returns the digest of `data` as text.
    fn hash(&self, data: &[u8]) -> String;
}

/// SHA-256 rendered as lower-case hex.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn hash(&self, data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }
}
