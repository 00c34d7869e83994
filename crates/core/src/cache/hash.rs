//! Content hashing for integrity checks and manifest identity.
//!
//! Hash-pinned resources are verified against the hex SHA-1 listed in the
//! manifest's hash table, and a manifest is identified by the SHA-1 of its
//! canonical JSON serialization.

use serde::Serialize;
use sha1::{Digest, Sha1};

use crate::Error;

/// Hex-encoded SHA-1 of raw bytes.
pub fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Identity hash of a manifest-like document.
///
/// The document is serialized with `serde_json` in declaration order, so a
/// manifest that round-trips through storage keeps the same hash.
pub fn hash_manifest<T: Serialize>(manifest: &T) -> Result<String, Error> {
    let canonical = serde_json::to_string(manifest)?;
    Ok(sha1_hex(canonical.as_bytes()))
}
