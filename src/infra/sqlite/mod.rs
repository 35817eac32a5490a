//! SQLite implementations
//!
//! Provides the durable append-only ledger.

mod ledger;

pub use ledger::*;
