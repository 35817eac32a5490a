//! Domain models for crop provenance certification
//!
//! Submissions, validation outcomes, per-batch evidence and certificates.

mod certificate;
mod provenance;
mod submission;
mod types;
mod validation;

pub use certificate::*;
pub use provenance::*;
pub use submission::*;
pub use types::*;
pub use validation::*;
