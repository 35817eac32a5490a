//! Validation policy engine
//!
//! Routes a submission to one of three actions. Rules are evaluated in
//! order and the first match wins:
//!
//! 1. format or integrity failure -> `AUTO_REJECT`
//! 2. fake probability above the reject threshold -> `AUTO_REJECT`
//! 3. fake probability below the approve threshold and quality above the
//!    quality threshold -> `AUTO_APPROVE`
//! 4. anything else -> `FLAG_FOR_HUMAN`
//!
//! All comparisons are strict. The engine is pure: identical inputs always
//! produce the identical result.

use crate::domain::{ContentHash, FormatReport, ValidationAction, ValidationResult};

/// Score substituted when no authenticity model produced one
pub const NEUTRAL_AUTHENTICITY_SCORE: f64 = 0.5;

/// Decision thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyThresholds {
    /// Reject when fake probability is strictly above this
    pub reject_above: f64,
    /// Approve only when fake probability is strictly below this
    pub approve_below: f64,
    /// Approve only when visual quality is strictly above this
    pub quality_above: u8,
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        Self {
            reject_above: 0.85,
            approve_below: 0.30,
            quality_above: 85,
        }
    }
}

/// Inputs to a single decision
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput<'a> {
    pub format: &'a FormatReport,
    pub content_hash: ContentHash,
    /// Probability the image is synthetic, in [0, 1]
    pub authenticity_score: f64,
    /// Heuristic quality, in [0, 100]
    pub visual_quality: u8,
}

/// Pure decision function over format, authenticity and quality
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    thresholds: PolicyThresholds,
}

impl PolicyEngine {
    pub fn new(thresholds: PolicyThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &PolicyThresholds {
        &self.thresholds
    }

    pub fn decide(&self, input: PolicyInput<'_>) -> ValidationResult {
        let authenticity = sanitize_score(input.authenticity_score);
        let quality = input.visual_quality.min(100);
        let t = &self.thresholds;

        let (action, reason) = if !input.format.is_acceptable() {
            (
                ValidationAction::AutoReject,
                format!("Rejected: {}", describe_issues(input.format)),
            )
        } else if authenticity > t.reject_above {
            (
                ValidationAction::AutoReject,
                format!(
                    "Likely synthetic/fake image, confidence {:.1}%",
                    authenticity * 100.0
                ),
            )
        } else if authenticity < t.approve_below && quality > t.quality_above {
            (
                ValidationAction::AutoApprove,
                format!(
                    "Authentic image (fake probability {:.2}) with good visual quality ({}/100)",
                    authenticity, quality
                ),
            )
        } else {
            (
                ValidationAction::FlagForHuman,
                format!(
                    "Needs expert review: fake probability {:.2}, visual quality {}/100",
                    authenticity, quality
                ),
            )
        };

        ValidationResult {
            format_valid: input.format.format_valid,
            integrity_valid: input.format.integrity_valid,
            content_hash: input.content_hash,
            authenticity_score: authenticity,
            visual_quality_score: quality,
            action,
            reason,
            requires_human_review: action == ValidationAction::FlagForHuman,
            issues: input.format.issues.clone(),
            model_used: None,
        }
    }
}

/// Clamp into [0, 1]; NaN is treated as "unknown"
fn sanitize_score(score: f64) -> f64 {
    if score.is_nan() {
        NEUTRAL_AUTHENTICITY_SCORE
    } else {
        score.clamp(0.0, 1.0)
    }
}

fn describe_issues(report: &FormatReport) -> String {
    if report.issues.is_empty() {
        if !report.format_valid {
            "invalid image format".to_string()
        } else {
            "image integrity check failed".to_string()
        }
    } else {
        report.issues.join("; ")
    }
}
