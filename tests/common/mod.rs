//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use agritrace::certification::{CertificationConfig, CertificationStateMachine};
use agritrace::domain::{
    BatchId, Certificate, ContentHash, LedgerReceipt, LedgerRecord, StageNumber, VerifiedImage,
    Verifier, STAGE_COUNT,
};
use agritrace::infra::{LedgerRecorder, ProvenanceError, Result, RetryConfig};
use agritrace::metrics::MetricsRegistry;
use agritrace::oracle::{
    AuthenticityClient, AuthenticityOracle, OracleClientConfig, OracleError, OracleScore,
};
use agritrace::{InMemoryLedger, ProvenanceService, ServiceSettings};

/// Size that passes format checks and scores 100 on visual quality
pub const GOOD_IMAGE_BYTES: usize = 64 * 1024;

/// Build a JPEG-signed payload. Different seeds give different content hashes.
pub fn jpeg(len: usize, seed: u32) -> Vec<u8> {
    let mut bytes = vec![0xA5; len];
    bytes[..3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);
    bytes[3..7].copy_from_slice(&seed.to_be_bytes());
    bytes
}

/// Build a PNG-signed payload
pub fn png(len: usize, seed: u32) -> Vec<u8> {
    let mut bytes = vec![0x3C; len];
    bytes[..8].copy_from_slice(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);
    bytes[8..12].copy_from_slice(&seed.to_be_bytes());
    bytes
}

pub fn stage(n: u8) -> StageNumber {
    StageNumber::new(n).unwrap()
}

pub fn batch(id: &str) -> BatchId {
    BatchId::from(id)
}

/// A verified image with a unique hash per (stage, salt)
pub fn verified(batch_id: &str, stage_number: u8, salt: u8) -> VerifiedImage {
    let mut hash = [0u8; 32];
    hash[0] = stage_number;
    hash[1] = salt;
    hash[2..2 + batch_id.len().min(30)].copy_from_slice(&batch_id.as_bytes()[..batch_id.len().min(30)]);
    VerifiedImage {
        batch_id: BatchId::from(batch_id),
        stage: stage(stage_number),
        content_hash: ContentHash(hash),
        verified_by: Verifier::Policy,
    }
}

/// Two images for every stage: exactly enough to certify
pub fn full_evidence(batch_id: &str) -> Vec<VerifiedImage> {
    (1..=STAGE_COUNT as u8)
        .flat_map(|n| [verified(batch_id, n, 0), verified(batch_id, n, 1)])
        .collect()
}

/// Oracle that returns a fixed score and counts its calls
pub struct StubOracle {
    fake_probability: Option<f64>,
    model: String,
    calls: AtomicUsize,
}

impl StubOracle {
    pub fn scoring(fake_probability: f64) -> Arc<Self> {
        Arc::new(Self {
            fake_probability: Some(fake_probability),
            model: "stub-model".to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fake_probability: None,
            model: "stub-model".to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthenticityOracle for StubOracle {
    async fn score(&self, _content: Bytes) -> std::result::Result<OracleScore, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fake_probability {
            Some(p) => Ok(OracleScore {
                fake_probability: p,
                model_used: self.model.clone(),
            }),
            None => Err(OracleError::Transport("connection refused".to_string())),
        }
    }
}

/// Ledger wrapper that fails a configurable number of calls
pub struct FlakyLedger {
    inner: InMemoryLedger,
    image_failures: AtomicUsize,
    certificate_failures: AtomicUsize,
}

impl FlakyLedger {
    pub fn new() -> Self {
        Self {
            inner: InMemoryLedger::new(),
            image_failures: AtomicUsize::new(0),
            certificate_failures: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` image writes
    pub fn fail_images(&self, n: usize) {
        self.image_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` certificate writes
    pub fn fail_certificates(&self, n: usize) {
        self.certificate_failures.store(n, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &InMemoryLedger {
        &self.inner
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LedgerRecorder for FlakyLedger {
    async fn record_verified_image(
        &self,
        content_hash: &ContentHash,
        batch_id: &BatchId,
        stage: StageNumber,
    ) -> Result<LedgerReceipt> {
        if Self::take_failure(&self.image_failures) {
            return Err(ProvenanceError::LedgerUnavailable("injected".to_string()));
        }
        self.inner
            .record_verified_image(content_hash, batch_id, stage)
            .await
    }

    async fn record_certificate(&self, certificate: &Certificate) -> Result<LedgerReceipt> {
        if Self::take_failure(&self.certificate_failures) {
            return Err(ProvenanceError::LedgerUnavailable("injected".to_string()));
        }
        self.inner.record_certificate(certificate).await
    }

    async fn records_for_batch(&self, batch_id: &BatchId) -> Result<Vec<LedgerRecord>> {
        self.inner.records_for_batch(batch_id).await
    }

    async fn certificate_for_batch(&self, batch_id: &BatchId) -> Result<Option<Certificate>> {
        self.inner.certificate_for_batch(batch_id).await
    }
}

/// Certification settings with no publish retries
pub fn fast_certification() -> CertificationConfig {
    CertificationConfig {
        publish_retry: RetryConfig::none(),
        ..CertificationConfig::default()
    }
}

pub fn state_machine(ledger: Arc<dyn LedgerRecorder>) -> CertificationStateMachine {
    CertificationStateMachine::new(
        ledger,
        fast_certification(),
        Arc::new(MetricsRegistry::new()),
    )
}

pub fn service(oracle: Arc<dyn AuthenticityOracle>, ledger: Arc<dyn LedgerRecorder>) -> ProvenanceService {
    ProvenanceService::new(
        AuthenticityClient::new(oracle, OracleClientConfig::default()),
        ledger,
        ServiceSettings {
            certification: fast_certification(),
            ..ServiceSettings::default()
        },
        Arc::new(MetricsRegistry::new()),
    )
}
