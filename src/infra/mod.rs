//! Infrastructure layer for agritrace
//!
//! Contains trait definitions and implementations for:
//! - Ledger recording (SQLite, in-memory)
//! - Circuit breaker (authenticity model protection)
//! - Retry with backoff (certificate publication)
//! - Error types

mod circuit_breaker;
mod error;
mod memory;
mod retry;
pub mod sqlite;
mod traits;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStats, CircuitState,
};
pub use error::*;
pub use memory::InMemoryLedger;
pub use retry::{Retry, RetryConfig, RetryResult};
pub use sqlite::SqliteLedger;
pub use traits::*;
