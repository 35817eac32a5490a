//! Per-image validation
//!
//! - [`format`] - size, declared type, magic number and corruption checks
//! - [`quality`] - size-based visual quality heuristic
//! - [`policy`] - threshold routing to approve, reject or human review

pub mod format;
pub mod policy;
pub mod quality;

pub use format::{FormatLimits, FormatValidator, MAX_IMAGE_BYTES, MIN_IMAGE_BYTES};
pub use policy::{PolicyEngine, PolicyInput, PolicyThresholds, NEUTRAL_AUTHENTICITY_SCORE};
pub use quality::visual_quality_score;
