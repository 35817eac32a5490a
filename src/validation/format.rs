//! Format and integrity checks on raw upload bytes
//!
//! A failure here is terminal for the submission: the policy engine routes it
//! to `AUTO_REJECT` and the authenticity oracle is never consulted.

use crate::domain::{FormatReport, ImageFormat};

/// Smallest accepted upload (10 KiB)
pub const MIN_IMAGE_BYTES: usize = 10 * 1024;

/// Largest accepted upload (10 MiB)
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Share of zero bytes above which content is treated as corrupted
pub const MAX_NULL_BYTE_RATIO: f64 = 0.5;

/// Inclusive size bounds for uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatLimits {
    pub min_bytes: usize,
    pub max_bytes: usize,
}

impl Default for FormatLimits {
    fn default() -> Self {
        Self {
            min_bytes: MIN_IMAGE_BYTES,
            max_bytes: MAX_IMAGE_BYTES,
        }
    }
}

/// Stateless structural validator
#[derive(Debug, Clone, Default)]
pub struct FormatValidator {
    limits: FormatLimits,
}

impl FormatValidator {
    pub fn new(limits: FormatLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> FormatLimits {
        self.limits
    }

    /// Check size, declared type, magic number and gross corruption.
    ///
    /// Every failed check contributes one issue string.
    pub fn validate(&self, content: &[u8], declared_mime: &str) -> FormatReport {
        let mut report = FormatReport {
            format_valid: true,
            integrity_valid: true,
            issues: Vec::new(),
        };

        if content.is_empty() {
            report.format_valid = false;
            report.integrity_valid = false;
            report.issues.push("File is empty".to_string());
            return report;
        }

        let len = content.len();
        if len < self.limits.min_bytes {
            report.format_valid = false;
            report.issues.push(format!(
                "File too small: {} bytes (minimum {} bytes)",
                len, self.limits.min_bytes
            ));
        } else if len > self.limits.max_bytes {
            report.format_valid = false;
            report.issues.push(format!(
                "File too large: {} bytes (maximum {} bytes)",
                len, self.limits.max_bytes
            ));
        }

        let declared = ImageFormat::from_mime(declared_mime);
        if declared.is_none() {
            report.format_valid = false;
            report.issues.push(format!(
                "Unsupported file type '{}' (expected JPEG, PNG or WebP)",
                declared_mime
            ));
        }

        match (ImageFormat::detect(content), declared) {
            (None, _) => {
                report.format_valid = false;
                report
                    .issues
                    .push("File signature does not match any JPEG, PNG or WebP header".to_string());
            }
            (Some(detected), Some(declared)) if detected != declared => {
                report.format_valid = false;
                report.issues.push(format!(
                    "File content is {} but was declared as {}",
                    detected, declared
                ));
            }
            _ => {}
        }

        let ratio = null_byte_ratio(content);
        if ratio > MAX_NULL_BYTE_RATIO {
            report.integrity_valid = false;
            report.issues.push(format!(
                "File appears corrupted ({:.0}% null bytes)",
                ratio * 100.0
            ));
        }

        report
    }
}

fn null_byte_ratio(content: &[u8]) -> f64 {
    if content.is_empty() {
        return 0.0;
    }
    let nulls = content.iter().filter(|b| **b == 0).count();
    nulls as f64 / content.len() as f64
}
