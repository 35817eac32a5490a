//! Ledger records and provenance certificates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{compute_certificate_hash, derive_certificate_id};

use super::{hash256_hex, BatchId, ContentHash, Hash256, StageCounts, StageNumber};

/// Append-only fact recorded for every approved image.
///
/// Write-once per `content_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub batch_id: BatchId,
    pub stage: StageNumber,
    pub content_hash: ContentHash,
    pub transaction_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// Ledger acknowledgement for a write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub transaction_id: String,
    pub recorded_at: DateTime<Utc>,
    /// False when the key was already present and the existing entry was returned
    pub newly_recorded: bool,
}

/// Immutable provenance certificate, minted at most once per batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub certificate_id: String,
    pub batch_id: BatchId,

    /// Digest over the batch id and every ledger transaction id it subsumes
    #[serde(with = "hash256_hex")]
    pub certificate_hash: Hash256,

    /// Verified image counts per stage at mint time
    pub stages_snapshot: StageCounts,

    /// Ledger transaction ids covered by `certificate_hash`
    pub ledger_transactions: Vec<String>,

    pub issued_at: DateTime<Utc>,
}

impl Certificate {
    /// Mint a certificate.
    ///
    /// `mint_sequence` is the batch's monotonic evidence counter at mint time;
    /// together with the batch id it determines the certificate id.
    pub fn mint(
        batch_id: BatchId,
        mint_sequence: u64,
        stages_snapshot: StageCounts,
        ledger_transactions: Vec<String>,
    ) -> Self {
        let certificate_id = derive_certificate_id(batch_id.as_str(), mint_sequence);
        let certificate_hash = compute_certificate_hash(batch_id.as_str(), &ledger_transactions);

        Self {
            certificate_id,
            batch_id,
            certificate_hash,
            stages_snapshot,
            ledger_transactions,
            issued_at: Utc::now(),
        }
    }

    pub fn certificate_hash_hex(&self) -> String {
        hex::encode(self.certificate_hash)
    }

    /// Recompute the hash from the recorded transaction list
    pub fn verify_hash(&self) -> bool {
        compute_certificate_hash(self.batch_id.as_str(), &self.ledger_transactions)
            == self.certificate_hash
    }
}

/// Emitted once per batch when its certificate is acknowledged by the ledger.
///
/// Consumed by the rendering and notification layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateIssued {
    pub batch_id: BatchId,
    pub certificate_id: String,
    pub qr_target_url: String,
}

impl CertificateIssued {
    pub fn new(certificate: &Certificate, verify_base_url: &str) -> Self {
        Self {
            batch_id: certificate.batch_id.clone(),
            certificate_id: certificate.certificate_id.clone(),
            qr_target_url: format!(
                "{}/{}",
                verify_base_url.trim_end_matches('/'),
                certificate.certificate_id
            ),
        }
    }
}
