//! Cryptographic utilities
//!
//! Provides:
//! - Content fingerprints (SHA-256) used as the ledger idempotency key
//! - Domain-separated certificate digests and id derivation

mod hash;

pub use hash::*;
