//! Trait definitions for external collaborators

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::domain::{BatchId, Certificate, ContentHash, LedgerReceipt, LedgerRecord, StageNumber};

use super::Result;

/// Append-only ledger that records verified images and issued certificates.
///
/// Invariants:
/// - `record_verified_image` is idempotent on `content_hash`: a second call
///   with the same hash returns the original transaction with
///   `newly_recorded = false` and writes nothing.
/// - `record_certificate` is idempotent on `certificate_id`.
///
/// Whether the backing store is a table, a message log or a distributed
/// ledger does not matter to callers.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LedgerRecorder: Send + Sync {
    /// Record an approved image
    async fn record_verified_image(
        &self,
        content_hash: &ContentHash,
        batch_id: &BatchId,
        stage: StageNumber,
    ) -> Result<LedgerReceipt>;

    /// Record a minted certificate
    async fn record_certificate(&self, certificate: &Certificate) -> Result<LedgerReceipt>;

    /// All image records for a batch, in recording order
    async fn records_for_batch(&self, batch_id: &BatchId) -> Result<Vec<LedgerRecord>>;

    /// The recorded certificate for a batch, if any
    async fn certificate_for_batch(&self, batch_id: &BatchId) -> Result<Option<Certificate>>;
}
