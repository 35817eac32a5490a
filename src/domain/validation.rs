//! Per-image validation outcomes

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ContentHash;

/// Routed action for a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationAction {
    AutoApprove,
    AutoReject,
    FlagForHuman,
}

impl ValidationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationAction::AutoApprove => "AUTO_APPROVE",
            ValidationAction::AutoReject => "AUTO_REJECT",
            ValidationAction::FlagForHuman => "FLAG_FOR_HUMAN",
        }
    }

    /// Metric counter name for this action
    pub fn metric_name(&self) -> &'static str {
        match self {
            ValidationAction::AutoApprove => "validation.auto_approve",
            ValidationAction::AutoReject => "validation.auto_reject",
            ValidationAction::FlagForHuman => "validation.flag_for_human",
        }
    }
}

impl fmt::Display for ValidationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural checks on raw bytes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FormatReport {
    pub format_valid: bool,
    pub integrity_valid: bool,
    /// Human-readable description of every failed check
    pub issues: Vec<String>,
}

impl FormatReport {
    pub fn is_acceptable(&self) -> bool {
        self.format_valid && self.integrity_valid
    }
}

/// Score reported by (or substituted for) the authenticity oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticityAssessment {
    /// Probability the image is synthetic/fake, in [0, 1]
    pub fake_probability: f64,
    pub model_used: String,
    /// True when no model answered and the neutral score was substituted
    pub degraded: bool,
}

/// Result of validating one submission. Written once by the policy engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub format_valid: bool,
    pub integrity_valid: bool,
    pub content_hash: ContentHash,
    /// Probability the image is synthetic/fake; lower is better
    pub authenticity_score: f64,
    pub visual_quality_score: u8,
    pub action: ValidationAction,
    pub reason: String,
    pub requires_human_review: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
}

impl ValidationResult {
    pub fn is_approved(&self) -> bool {
        self.action == ValidationAction::AutoApprove
    }

    pub fn is_rejected(&self) -> bool {
        self.action == ValidationAction::AutoReject
    }

    /// Farmer-facing outcome label
    pub fn outcome_label(&self) -> &'static str {
        match self.action {
            ValidationAction::AutoApprove => "approved",
            ValidationAction::AutoReject => "rejected",
            ValidationAction::FlagForHuman => "pending expert review",
        }
    }
}
