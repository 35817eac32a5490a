//! agritrace
//!
//! Photo-evidence validation and provenance certification for seven-stage
//! crop production batches. Farmers submit field photos per stage; each
//! photo is approved, rejected, or flagged for an expert, and once every
//! stage carries enough verified evidence the batch receives exactly one
//! certificate recorded on an append-only ledger.
//!
//! ## Modules
//!
//! - [`domain`] - Core domain types (stages, submissions, certificates)
//! - [`crypto`] - Content fingerprinting and certificate hashing
//! - [`validation`] - Format checks, quality heuristic, decision policy
//! - [`oracle`] - Authenticity classifier client with fail-safe fallback
//! - [`certification`] - Evidence aggregation and the certification state machine
//! - [`review`] - Queue of submissions awaiting a human reviewer
//! - [`service`] - Inbound facade tying the pieces together
//! - [`infra`] - Ledger implementations, errors, circuit breaker, retry
//! - [`config`] - Environment configuration
//! - [`metrics`] - In-process metrics
//! - [`telemetry`] - Logging setup

pub mod certification;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod infra;
pub mod metrics;
pub mod migrations;
pub mod oracle;
pub mod review;
pub mod service;
pub mod telemetry;
pub mod validation;

// Re-export commonly used types
pub use domain::{
    BatchId, BatchMetadata, BatchProvenance, Certificate, CertificateIssued, CertificationState,
    ContentHash, HumanDecision, Stage, StageCounts, StageNumber, ValidationAction,
    ValidationResult,
};

pub use infra::{InMemoryLedger, LedgerRecorder, ProvenanceError, Result, SqliteLedger};
pub use service::{ProvenanceService, ServiceSettings};
