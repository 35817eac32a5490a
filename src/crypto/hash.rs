//! Content fingerprinting and certificate hashing with domain separation
//!
//! - Image fingerprints are plain SHA-256 over the raw bytes, so any party
//!   holding the photo can recompute the ledger key.
//! - Certificate digests and ids use domain separation prefixes and
//!   length-prefixed strings so that no two preimages can collide across
//!   hash purposes.

use sha2::{Digest, Sha256};

use crate::domain::ContentHash;

/// 32-byte SHA-256 hash
pub type Hash256 = [u8; 32];

// ============================================================================
// Domain Separation Constants
// ============================================================================

/// Domain prefix for certificate digests
pub const DOMAIN_CERTIFICATE_HASH: &[u8] = b"AGRITRACE_CERTIFICATE_HASH_V1";

/// Domain prefix for certificate id derivation
pub const DOMAIN_CERTIFICATE_ID: &[u8] = b"AGRITRACE_CERTIFICATE_ID_V1";

/// Prefix of every certificate id
pub const CERTIFICATE_ID_PREFIX: &str = "CERT-";

// ============================================================================
// Binary Encoding Helpers
// ============================================================================

/// Encode a u32 as 4 bytes big-endian
#[inline]
pub fn u32_be(n: u32) -> [u8; 4] {
    n.to_be_bytes()
}

/// Encode a u64 as 8 bytes big-endian
#[inline]
pub fn u64_be(n: u64) -> [u8; 8] {
    n.to_be_bytes()
}

/// Encode a string as length-prefixed UTF-8 bytes
/// Format: U32_BE(len) || UTF8_bytes
pub fn encode_string(s: &str) -> Vec<u8> {
    let utf8_bytes = s.as_bytes();
    let mut result = Vec::with_capacity(4 + utf8_bytes.len());
    result.extend_from_slice(&u32_be(utf8_bytes.len() as u32));
    result.extend_from_slice(utf8_bytes);
    result
}

// ============================================================================
// Fingerprints
// ============================================================================

/// SHA-256 of arbitrary bytes
pub fn sha256(bytes: &[u8]) -> Hash256 {
    Sha256::digest(bytes).into()
}

/// Fingerprint raw image bytes.
///
/// Deterministic and side-effect free; byte-identical images always map to
/// the same hash.
pub fn fingerprint(content: &[u8]) -> ContentHash {
    ContentHash(sha256(content))
}

// ============================================================================
// Certificates
// ============================================================================

/// Compute the certificate digest
///
/// ```text
/// certificate_hash = SHA256(
///   b"AGRITRACE_CERTIFICATE_HASH_V1" ||
///   ENC_STR(batch_id) ||
///   U32_BE(tx_count) ||
///   ENC_STR(tx_id_0) || ... || ENC_STR(tx_id_n)
/// )
/// ```
pub fn compute_certificate_hash(batch_id: &str, transaction_ids: &[String]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_CERTIFICATE_HASH);
    hasher.update(encode_string(batch_id));
    hasher.update(u32_be(transaction_ids.len() as u32));
    for tx in transaction_ids {
        hasher.update(encode_string(tx));
    }
    hasher.finalize().into()
}

/// Derive a certificate id from the batch id and a per-batch monotonic counter
///
/// `CERT-` followed by the first 10 bytes of
/// `SHA256(DOMAIN || ENC_STR(batch_id) || U64_BE(counter))`, upper-case hex.
pub fn derive_certificate_id(batch_id: &str, counter: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_CERTIFICATE_ID);
    hasher.update(encode_string(batch_id));
    hasher.update(u64_be(counter));
    let digest: Hash256 = hasher.finalize().into();
    format!(
        "{}{}",
        CERTIFICATE_ID_PREFIX,
        hex::encode_upper(&digest[..10])
    )
}
