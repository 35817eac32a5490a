//! Per-batch evidence aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::{
    BatchId, Certificate, ContentHash, StageCounts, StageNumber, MIN_IMAGES_PER_STAGE,
};

/// Descriptive batch data supplied by the web tier when the batch is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub batch_id: BatchId,
    pub farmer_id: String,
    pub crop_type: String,
    pub quantity: f64,
}

/// Certification lifecycle. Transitions are one-directional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificationState {
    Collecting,
    Eligible,
    Certified,
}

impl fmt::Display for CertificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificationState::Collecting => write!(f, "COLLECTING"),
            CertificationState::Eligible => write!(f, "ELIGIBLE"),
            CertificationState::Certified => write!(f, "CERTIFIED"),
        }
    }
}

/// Provenance aggregate for one batch.
///
/// Mutated only by the certification state machine while it holds the
/// batch lock. `certificate_issued` flips false -> true exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProvenance {
    pub batch_id: BatchId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BatchMetadata>,
    pub stages: StageCounts,
    pub certificate_issued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<String>,

    /// Content hashes already counted toward `stages`
    #[serde(skip)]
    pub(crate) counted: BTreeSet<ContentHash>,

    /// Ledger transaction ids of verified images, in recording order
    pub ledger_transactions: Vec<String>,

    /// Minted certificate awaiting ledger acknowledgement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_certificate: Option<Certificate>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BatchProvenance {
    pub fn new(batch_id: BatchId) -> Self {
        let now = Utc::now();
        Self {
            batch_id,
            metadata: None,
            stages: StageCounts::new(),
            certificate_issued: false,
            certificate_id: None,
            counted: BTreeSet::new(),
            ledger_transactions: Vec::new(),
            pending_certificate: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_metadata(mut self, metadata: Option<BatchMetadata>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Count a verified image. Returns false if this content hash was already counted.
    pub fn record_verified(
        &mut self,
        stage: StageNumber,
        content_hash: ContentHash,
        transaction_id: &str,
    ) -> bool {
        if !self.counted.insert(content_hash) {
            return false;
        }
        self.stages.increment(stage);
        self.ledger_transactions.push(transaction_id.to_string());
        self.updated_at = Utc::now();
        true
    }

    pub fn has_counted(&self, content_hash: &ContentHash) -> bool {
        self.counted.contains(content_hash)
    }

    /// Every stage has at least the required number of verified images
    pub fn is_eligible(&self) -> bool {
        self.stages.all_at_least(MIN_IMAGES_PER_STAGE)
    }

    pub fn state(&self) -> CertificationState {
        if self.certificate_issued {
            CertificationState::Certified
        } else if self.is_eligible() {
            CertificationState::Eligible
        } else {
            CertificationState::Collecting
        }
    }

    pub fn verified_total(&self) -> u64 {
        self.stages.total()
    }

    /// Stages still short of the per-stage floor
    pub fn missing_stages(&self) -> Vec<StageNumber> {
        self.stages.stages_below(MIN_IMAGES_PER_STAGE)
    }
}
