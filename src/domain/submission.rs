//! Image submissions and human review decisions

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BatchId, ContentHash, StageNumber};

/// A farmer-submitted field photograph.
///
/// Immutable once created; the raw bytes are reference-counted so the
/// validator, fingerprinter and oracle can share them without copying.
#[derive(Debug, Clone)]
pub struct ImageSubmission {
    batch_id: BatchId,
    stage: StageNumber,
    content: Bytes,
    declared_mime: String,
    submitted_at: DateTime<Utc>,
}

impl ImageSubmission {
    pub fn new(
        batch_id: BatchId,
        stage: StageNumber,
        content: impl Into<Bytes>,
        declared_mime: impl Into<String>,
    ) -> Self {
        Self {
            batch_id,
            stage,
            content: content.into(),
            declared_mime: declared_mime.into(),
            submitted_at: Utc::now(),
        }
    }

    pub fn batch_id(&self) -> &BatchId {
        &self.batch_id
    }

    pub fn stage(&self) -> StageNumber {
        self.stage
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn declared_mime(&self) -> &str {
        &self.declared_mime
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// An approved image handed to the certification state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedImage {
    pub batch_id: BatchId,
    pub stage: StageNumber,
    pub content_hash: ContentHash,
    pub verified_by: Verifier,
}

/// Who approved an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verifier {
    /// Automatic approval by the validation policy
    Policy,
    /// Expert reviewer approval
    Reviewer { reviewer_id: String },
}

/// Expert decision on an image that was flagged for human review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanDecision {
    pub batch_id: BatchId,
    pub stage: StageNumber,
    /// Hex content hash of the reviewed image
    pub image_ref: String,
    pub approved: bool,
    pub reviewer_id: String,
    pub reason: String,
}
