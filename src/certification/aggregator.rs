//! Stage evidence aggregator
//!
//! Holds one [`BatchProvenance`] per batch. Counts only move up, and only
//! for images that were approved and acknowledged by the ledger. Callers
//! serialize writes per batch through [`super::BatchLocks`].

use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::{
    BatchId, BatchMetadata, BatchProvenance, Certificate, ContentHash, LedgerRecord, StageCounts,
    StageNumber,
};

/// Effect of counting one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountOutcome {
    /// False when the content hash was already counted for this batch
    pub counted: bool,
    pub stages: StageCounts,
    pub eligible: bool,
}

/// In-memory per-batch evidence
#[derive(Default)]
pub struct StageEvidenceAggregator {
    batches: RwLock<HashMap<BatchId, BatchProvenance>>,
    metadata: RwLock<HashMap<BatchId, BatchMetadata>>,
}

impl StageEvidenceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach descriptive metadata; applied now or when the record is created
    pub async fn register_metadata(&self, metadata: BatchMetadata) {
        if let Some(record) = self.batches.write().await.get_mut(&metadata.batch_id) {
            record.metadata = Some(metadata.clone());
        }
        self.metadata
            .write()
            .await
            .insert(metadata.batch_id.clone(), metadata);
    }

    pub async fn metadata(&self, batch_id: &BatchId) -> Option<BatchMetadata> {
        self.metadata.read().await.get(batch_id).cloned()
    }

    /// Count a verified image, creating the batch record on first write
    pub async fn record_verified(
        &self,
        batch_id: &BatchId,
        stage: StageNumber,
        content_hash: ContentHash,
        transaction_id: &str,
    ) -> CountOutcome {
        let metadata = self.metadata(batch_id).await;
        let mut batches = self.batches.write().await;
        let record = batches
            .entry(batch_id.clone())
            .or_insert_with(|| BatchProvenance::new(batch_id.clone()).with_metadata(metadata));

        let counted = record.record_verified(stage, content_hash, transaction_id);
        CountOutcome {
            counted,
            stages: record.stages,
            eligible: record.is_eligible(),
        }
    }

    pub async fn has_counted(&self, batch_id: &BatchId, content_hash: &ContentHash) -> bool {
        self.batches
            .read()
            .await
            .get(batch_id)
            .map(|record| record.has_counted(content_hash))
            .unwrap_or(false)
    }

    /// Every stage has reached the per-stage floor
    pub async fn is_eligible(&self, batch_id: &BatchId) -> bool {
        self.batches
            .read()
            .await
            .get(batch_id)
            .map(BatchProvenance::is_eligible)
            .unwrap_or(false)
    }

    pub async fn snapshot(&self, batch_id: &BatchId) -> Option<BatchProvenance> {
        self.batches.read().await.get(batch_id).cloned()
    }

    /// Park a minted certificate until the ledger acknowledges it
    pub async fn set_pending_certificate(&self, certificate: Certificate) {
        if let Some(record) = self.batches.write().await.get_mut(&certificate.batch_id) {
            record.pending_certificate = Some(certificate);
            record.updated_at = Utc::now();
        }
    }

    /// Flip `certificate_issued`. Returns false if it was already set.
    pub async fn mark_certified(&self, batch_id: &BatchId, certificate_id: &str) -> bool {
        let mut batches = self.batches.write().await;
        let Some(record) = batches.get_mut(batch_id) else {
            return false;
        };
        if record.certificate_issued {
            return false;
        }
        record.certificate_issued = true;
        record.certificate_id = Some(certificate_id.to_string());
        record.pending_certificate = None;
        record.updated_at = Utc::now();
        true
    }

    /// Batches holding a certificate that has not been acknowledged yet,
    /// or that are eligible but have not minted one
    pub async fn batches_awaiting_certificate(&self) -> Vec<BatchId> {
        let mut ids: Vec<BatchId> = self
            .batches
            .read()
            .await
            .values()
            .filter(|r| !r.certificate_issued && (r.pending_certificate.is_some() || r.is_eligible()))
            .map(|r| r.batch_id.clone())
            .collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    /// Replace a batch's state with what the ledger holds.
    ///
    /// `records` must be in recording order.
    pub async fn rebuild_from_ledger(
        &self,
        batch_id: &BatchId,
        records: &[LedgerRecord],
        certificate: Option<&Certificate>,
    ) -> BatchProvenance {
        let metadata = self.metadata(batch_id).await;
        let mut record = BatchProvenance::new(batch_id.clone()).with_metadata(metadata);

        for entry in records.iter().filter(|r| &r.batch_id == batch_id) {
            record.record_verified(entry.stage, entry.content_hash, &entry.transaction_id);
        }
        if let Some(first) = records.first() {
            record.created_at = first.recorded_at;
        }
        if let Some(certificate) = certificate {
            record.certificate_issued = true;
            record.certificate_id = Some(certificate.certificate_id.clone());
        }

        self.batches
            .write()
            .await
            .insert(batch_id.clone(), record.clone());
        record
    }

    pub async fn batch_count(&self) -> usize {
        self.batches.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::STAGE_COUNT;

    fn stage(n: u8) -> StageNumber {
        StageNumber::new(n).unwrap()
    }

    fn hash(n: u8, salt: u8) -> ContentHash {
        let mut bytes = [0u8; 32];
        bytes[0] = n;
        bytes[1] = salt;
        ContentHash(bytes)
    }

    #[tokio::test]
    async fn test_counts_and_eligibility() {
        let agg = StageEvidenceAggregator::new();
        let batch = BatchId::from("B1");

        for n in 1..=STAGE_COUNT as u8 {
            let outcome = agg.record_verified(&batch, stage(n), hash(n, 0), "tx").await;
            assert!(outcome.counted);
            assert!(!outcome.eligible);
        }
        for n in 1..STAGE_COUNT as u8 {
            agg.record_verified(&batch, stage(n), hash(n, 1), "tx").await;
        }
        assert!(!agg.is_eligible(&batch).await);

        let last = agg.record_verified(&batch, stage(7), hash(7, 1), "tx").await;
        assert!(last.eligible);
        assert_eq!(last.stages.as_array(), [2; STAGE_COUNT]);
    }

    #[tokio::test]
    async fn test_same_hash_is_counted_once() {
        let agg = StageEvidenceAggregator::new();
        let batch = BatchId::from("B1");

        assert!(agg.record_verified(&batch, stage(1), hash(1, 0), "tx-1").await.counted);
        let again = agg.record_verified(&batch, stage(1), hash(1, 0), "tx-1").await;
        assert!(!again.counted);
        assert_eq!(again.stages.get(stage(1)), 1);
    }

    #[tokio::test]
    async fn test_metadata_attached_on_creation() {
        let agg = StageEvidenceAggregator::new();
        let batch = BatchId::from("B1");
        agg.register_metadata(BatchMetadata {
            batch_id: batch.clone(),
            farmer_id: "F-9".into(),
            crop_type: "maize".into(),
            quantity: 1200.0,
        })
        .await;

        agg.record_verified(&batch, stage(2), hash(2, 0), "tx").await;
        let snapshot = agg.snapshot(&batch).await.unwrap();
        assert_eq!(snapshot.metadata.unwrap().crop_type, "maize");
    }

    #[tokio::test]
    async fn test_rebuild_replaces_state() {
        let agg = StageEvidenceAggregator::new();
        let batch = BatchId::from("B1");
        agg.record_verified(&batch, stage(1), hash(1, 0), "stale").await;

        let records: Vec<LedgerRecord> = (0..3)
            .map(|i| LedgerRecord {
                batch_id: batch.clone(),
                stage: stage(3),
                content_hash: hash(3, i),
                transaction_id: format!("tx-{i}"),
                recorded_at: Utc::now(),
            })
            .collect();

        let rebuilt = agg.rebuild_from_ledger(&batch, &records, None).await;
        assert_eq!(rebuilt.stages.get(stage(1)), 0);
        assert_eq!(rebuilt.stages.get(stage(3)), 3);
        assert_eq!(rebuilt.ledger_transactions, vec!["tx-0", "tx-1", "tx-2"]);
        assert!(agg.has_counted(&batch, &hash(3, 2)).await);
    }

    #[tokio::test]
    async fn test_mark_certified_flips_once() {
        let agg = StageEvidenceAggregator::new();
        let batch = BatchId::from("B1");
        agg.record_verified(&batch, stage(1), hash(1, 0), "tx").await;

        assert!(agg.mark_certified(&batch, "CERT-1").await);
        assert!(!agg.mark_certified(&batch, "CERT-2").await);
        assert_eq!(
            agg.snapshot(&batch).await.unwrap().certificate_id.as_deref(),
            Some("CERT-1")
        );
    }
}
