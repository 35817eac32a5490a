//! In-memory ledger for development and tests
//!
//! Honors the same idempotency contract as the SQLite ledger: one image
//! record per content hash, one certificate per certificate id and per batch.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    BatchId, Certificate, ContentHash, LedgerReceipt, LedgerRecord, StageNumber,
};

use super::{LedgerRecorder, Result};

#[derive(Default)]
struct LedgerState {
    images: HashMap<ContentHash, LedgerRecord>,
    image_order: Vec<ContentHash>,
    certificates: HashMap<String, (Certificate, LedgerReceipt)>,
    certificate_by_batch: HashMap<BatchId, String>,
}

/// Process-local append-only ledger
#[derive(Default)]
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of image records
    pub async fn image_record_count(&self) -> usize {
        self.state.read().await.images.len()
    }

    /// Number of certificate records
    pub async fn certificate_count(&self) -> usize {
        self.state.read().await.certificates.len()
    }
}

fn new_transaction_id() -> String {
    format!("tx-{}", Uuid::new_v4().simple())
}

#[async_trait]
impl LedgerRecorder for InMemoryLedger {
    async fn record_verified_image(
        &self,
        content_hash: &ContentHash,
        batch_id: &BatchId,
        stage: StageNumber,
    ) -> Result<LedgerReceipt> {
        let mut state = self.state.write().await;

        if let Some(existing) = state.images.get(content_hash) {
            return Ok(LedgerReceipt {
                transaction_id: existing.transaction_id.clone(),
                recorded_at: existing.recorded_at,
                newly_recorded: false,
            });
        }

        let record = LedgerRecord {
            batch_id: batch_id.clone(),
            stage,
            content_hash: *content_hash,
            transaction_id: new_transaction_id(),
            recorded_at: Utc::now(),
        };
        let receipt = LedgerReceipt {
            transaction_id: record.transaction_id.clone(),
            recorded_at: record.recorded_at,
            newly_recorded: true,
        };
        state.images.insert(*content_hash, record);
        state.image_order.push(*content_hash);

        Ok(receipt)
    }

    async fn record_certificate(&self, certificate: &Certificate) -> Result<LedgerReceipt> {
        let mut state = self.state.write().await;

        let existing_id = state
            .certificate_by_batch
            .get(&certificate.batch_id)
            .cloned()
            .or_else(|| {
                state
                    .certificates
                    .contains_key(&certificate.certificate_id)
                    .then(|| certificate.certificate_id.clone())
            });
        if let Some(id) = existing_id {
            if let Some((_, receipt)) = state.certificates.get(&id) {
                return Ok(LedgerReceipt {
                    newly_recorded: false,
                    ..receipt.clone()
                });
            }
        }

        let receipt = LedgerReceipt {
            transaction_id: new_transaction_id(),
            recorded_at: Utc::now(),
            newly_recorded: true,
        };
        state.certificate_by_batch.insert(
            certificate.batch_id.clone(),
            certificate.certificate_id.clone(),
        );
        state.certificates.insert(
            certificate.certificate_id.clone(),
            (certificate.clone(), receipt.clone()),
        );

        Ok(receipt)
    }

    async fn records_for_batch(&self, batch_id: &BatchId) -> Result<Vec<LedgerRecord>> {
        let state = self.state.read().await;
        Ok(state
            .image_order
            .iter()
            .filter_map(|hash| state.images.get(hash))
            .filter(|record| &record.batch_id == batch_id)
            .cloned()
            .collect())
    }

    async fn certificate_for_batch(&self, batch_id: &BatchId) -> Result<Option<Certificate>> {
        let state = self.state.read().await;
        Ok(state
            .certificate_by_batch
            .get(batch_id)
            .and_then(|id| state.certificates.get(id))
            .map(|(cert, _)| cert.clone()))
    }
}
