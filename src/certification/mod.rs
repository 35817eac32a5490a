//! Batch certification
//!
//! - [`locks`] - per-batch mutual exclusion
//! - [`aggregator`] - per-stage evidence counts
//! - [`state_machine`] - ledger-first recording, eligibility and minting

pub mod aggregator;
pub mod locks;
pub mod state_machine;

pub use aggregator::{CountOutcome, StageEvidenceAggregator};
pub use locks::BatchLocks;
pub use state_machine::{CertificationConfig, CertificationStateMachine, VerificationOutcome};
