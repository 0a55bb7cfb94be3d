//! Small pure helpers shared across the pipeline.

use sha2::{Digest, Sha256};

/// Stable 64-bit hash over a (contact, campaign-instance) pair.
///
/// The spread assignment must place a contact on the same day across runs and
/// across processes, so this cannot use `DefaultHasher` (randomly seeded per
/// process). First 8 bytes of SHA-256 over the little-endian encoding.
pub fn hash64_pair(a: i64, b: i64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(a.to_le_bytes());
    hasher.update(b.to_le_bytes());
    first8(&hasher.finalize())
}

/// Stable 64-bit hash over an id, a string tag, and a year.
///
/// Used for smoothing jitter: `hash64_tagged(contact_id, "ed", year)`.
pub fn hash64_tagged(id: i64, tag: &str, year: i32) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(id.to_le_bytes());
    hasher.update(tag.as_bytes());
    hasher.update(year.to_le_bytes());
    first8(&hasher.finalize())
}

fn first8(digest: &[u8]) -> u64 {
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(out)
}
