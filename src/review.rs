//! Human review queue
//!
//! Holds submissions routed to `FLAG_FOR_HUMAN` until an expert decides.
//! Entries are keyed by content hash, so a resubmitted photo does not queue
//! twice.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::certification::VerificationOutcome;
use crate::domain::{BatchId, ContentHash, HumanDecision, StageNumber, ValidationResult};

/// A flagged submission awaiting a reviewer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingReview {
    pub batch_id: BatchId,
    pub stage: StageNumber,
    pub content_hash: ContentHash,
    pub validation: ValidationResult,
    pub flagged_at: DateTime<Utc>,
}

/// Result of applying a reviewer's decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewOutcome {
    pub decision: HumanDecision,
    /// Present when the image was approved and fed to certification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certification: Option<VerificationOutcome>,
}

/// What happened when a flagged submission was offered to the queue
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    Queued,
    /// Same image, batch and stage already awaiting a reviewer
    AlreadyQueued,
    /// Same image already awaiting a reviewer for another batch or stage
    Conflict(PendingReview),
}

/// In-memory queue of flagged submissions
#[derive(Default)]
pub struct ReviewQueue {
    entries: RwLock<HashMap<ContentHash, PendingReview>>,
}

impl ReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a flagged submission. An image is queued at most once.
    pub async fn enqueue(&self, review: PendingReview) -> EnqueueOutcome {
        let mut entries = self.entries.write().await;
        match entries.get(&review.content_hash) {
            Some(existing)
                if existing.batch_id == review.batch_id && existing.stage == review.stage =>
            {
                EnqueueOutcome::AlreadyQueued
            }
            Some(existing) => EnqueueOutcome::Conflict(existing.clone()),
            None => {
                entries.insert(review.content_hash, review);
                EnqueueOutcome::Queued
            }
        }
    }

    pub async fn get(&self, content_hash: &ContentHash) -> Option<PendingReview> {
        self.entries.read().await.get(content_hash).cloned()
    }

    /// Put back an entry whose decision could not take effect
    pub async fn restore(&self, review: PendingReview) {
        self.entries.write().await.insert(review.content_hash, review);
    }

    /// Remove a decided entry
    pub async fn remove(&self, content_hash: &ContentHash) -> Option<PendingReview> {
        self.entries.write().await.remove(content_hash)
    }

    /// Pending entries, oldest first
    pub async fn list(&self) -> Vec<PendingReview> {
        let mut pending: Vec<PendingReview> = self.entries.read().await.values().cloned().collect();
        pending.sort_by(|a, b| {
            a.flagged_at
                .cmp(&b.flagged_at)
                .then_with(|| a.content_hash.cmp(&b.content_hash))
        });
        pending
    }

    /// Pending entries for one batch, oldest first
    pub async fn list_for_batch(&self, batch_id: &BatchId) -> Vec<PendingReview> {
        self.list()
            .await
            .into_iter()
            .filter(|r| &r.batch_id == batch_id)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
