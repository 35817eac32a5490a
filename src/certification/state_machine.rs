//! Batch certification state machine
//!
//! `COLLECTING -> ELIGIBLE -> CERTIFIED`, one direction only.
//!
//! For each verified image, under the batch lock:
//! 1. record the image on the ledger (nothing else happens if this fails)
//! 2. count it in the aggregator
//! 3. re-evaluate eligibility; when eligible and not yet certified, mint
//!    (or reuse the pending) certificate and publish it to the ledger
//! 4. only after the ledger acknowledges the certificate, flip
//!    `certificate_issued` and emit [`CertificateIssued`]
//!
//! A certificate the ledger has not acknowledged stays pending on the batch
//! and is retried on the batch's next event or by
//! [`CertificationStateMachine::publish_pending`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{BatchLocks, StageEvidenceAggregator};
use crate::domain::{
    BatchId, BatchMetadata, BatchProvenance, Certificate, CertificateIssued, CertificationState,
    ContentHash, StageCounts, StageNumber, VerifiedImage,
};
use crate::infra::{LedgerRecorder, ProvenanceError, Result, Retry, RetryConfig};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::telemetry::spans;

/// State machine settings
#[derive(Debug, Clone)]
pub struct CertificationConfig {
    /// Deadline for each ledger call
    pub ledger_timeout: Duration,
    /// Base of the public verification URL encoded in the QR code
    pub verify_base_url: String,
    /// Retry policy for certificate publication
    pub publish_retry: RetryConfig,
    /// Buffered `CertificateIssued` events per subscriber
    pub event_capacity: usize,
}

impl Default for CertificationConfig {
    fn default() -> Self {
        Self {
            ledger_timeout: Duration::from_secs(5),
            verify_base_url: "https://verify.agritrace.local/certificates".to_string(),
            publish_retry: RetryConfig::ledger(),
            event_capacity: 256,
        }
    }
}

/// Result of feeding one verified image into the state machine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationOutcome {
    pub batch_id: BatchId,
    pub stage: StageNumber,
    pub content_hash: ContentHash,
    pub transaction_id: String,
    /// Image counted toward the batch by this event
    pub counted: bool,
    /// Ledger already held this content hash
    pub duplicate: bool,
    pub stages: StageCounts,
    pub state: CertificationState,
    /// Set when this event caused the certificate to be issued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_issued: Option<CertificateIssued>,
}

/// Drives per-batch evidence to at most one certificate
pub struct CertificationStateMachine {
    ledger: Arc<dyn LedgerRecorder>,
    aggregator: StageEvidenceAggregator,
    locks: BatchLocks,
    config: CertificationConfig,
    events: broadcast::Sender<CertificateIssued>,
    metrics: Arc<MetricsRegistry>,
}

impl CertificationStateMachine {
    pub fn new(
        ledger: Arc<dyn LedgerRecorder>,
        config: CertificationConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            ledger,
            aggregator: StageEvidenceAggregator::new(),
            locks: BatchLocks::new(),
            config,
            events,
            metrics,
        }
    }

    /// Receive every `CertificateIssued` emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<CertificateIssued> {
        self.events.subscribe()
    }

    pub fn aggregator(&self) -> &StageEvidenceAggregator {
        &self.aggregator
    }

    pub async fn register_batch(&self, metadata: BatchMetadata) {
        self.aggregator.register_metadata(metadata).await;
    }

    pub async fn batch_status(&self, batch_id: &BatchId) -> Option<BatchProvenance> {
        self.aggregator.snapshot(batch_id).await
    }

    /// The acknowledged certificate for a batch, read from the ledger
    pub async fn certificate(&self, batch_id: &BatchId) -> Result<Option<Certificate>> {
        self.ledger_call(self.ledger.certificate_for_batch(batch_id))
            .await
    }

    /// Feed an approved image.
    ///
    /// Fails only when the ledger cannot record the image, in which case no
    /// batch state has changed and the caller may retry.
    pub async fn on_verified_image(&self, image: &VerifiedImage) -> Result<VerificationOutcome> {
        let span = info_span!(
            spans::VERIFIED_IMAGE,
            batch_id = %image.batch_id,
            stage = image.stage.get(),
            content_hash = %image.content_hash,
        );
        self.handle_verified_image(image).instrument(span).await
    }

    async fn handle_verified_image(&self, image: &VerifiedImage) -> Result<VerificationOutcome> {
        let _guard = self.locks.acquire(&image.batch_id).await;

        let receipt = self
            .ledger_call(self.ledger.record_verified_image(
                &image.content_hash,
                &image.batch_id,
                image.stage,
            ))
            .await?;

        let (counted, duplicate) = if receipt.newly_recorded {
            self.metrics
                .inc_counter(metric_names::LEDGER_IMAGES_RECORDED)
                .await;
            let outcome = self
                .aggregator
                .record_verified(
                    &image.batch_id,
                    image.stage,
                    image.content_hash,
                    &receipt.transaction_id,
                )
                .await;
            (outcome.counted, false)
        } else {
            self.metrics.inc_counter(metric_names::LEDGER_DUPLICATES).await;
            (self.count_duplicate(image).await?, true)
        };

        let certificate_issued = self.try_certify(&image.batch_id).await;

        let snapshot = self
            .aggregator
            .snapshot(&image.batch_id)
            .await
            .unwrap_or_else(|| BatchProvenance::new(image.batch_id.clone()));

        debug!(
            transaction_id = %receipt.transaction_id,
            counted,
            duplicate,
            state = %snapshot.state(),
            "Verified image processed"
        );

        Ok(VerificationOutcome {
            batch_id: image.batch_id.clone(),
            stage: image.stage,
            content_hash: image.content_hash,
            transaction_id: receipt.transaction_id,
            counted,
            duplicate,
            stages: snapshot.stages,
            state: snapshot.state(),
            certificate_issued,
        })
    }

    /// The ledger already held this hash. Count it only if the ledger entry
    /// belongs to this batch and the aggregator missed it (a crash between
    /// the ledger write and the count). The ledger's stage wins.
    async fn count_duplicate(&self, image: &VerifiedImage) -> Result<bool> {
        if self
            .aggregator
            .has_counted(&image.batch_id, &image.content_hash)
            .await
        {
            return Ok(false);
        }

        let records = self
            .ledger_call(self.ledger.records_for_batch(&image.batch_id))
            .await?;
        let Some(record) = records
            .iter()
            .find(|r| r.content_hash == image.content_hash)
        else {
            warn!(
                batch_id = %image.batch_id,
                content_hash = %image.content_hash,
                "Image already recorded for another batch, not counted"
            );
            return Ok(false);
        };

        info!(
            batch_id = %image.batch_id,
            transaction_id = %record.transaction_id,
            "Counting ledger entry missing from aggregator"
        );
        let outcome = self
            .aggregator
            .record_verified(
                &image.batch_id,
                record.stage,
                record.content_hash,
                &record.transaction_id,
            )
            .await;
        Ok(outcome.counted)
    }

    /// Mint and publish when eligible. Caller holds the batch lock.
    ///
    /// Publication failures are logged and leave the certificate pending.
    async fn try_certify(&self, batch_id: &BatchId) -> Option<CertificateIssued> {
        let snapshot = self.aggregator.snapshot(batch_id).await?;
        if snapshot.certificate_issued || !snapshot.is_eligible() {
            return None;
        }

        let certificate = match snapshot.pending_certificate {
            Some(pending) => pending,
            None => {
                let minted = Certificate::mint(
                    batch_id.clone(),
                    snapshot.verified_total(),
                    snapshot.stages,
                    snapshot.ledger_transactions.clone(),
                );
                info!(
                    batch_id = %batch_id,
                    certificate_id = %minted.certificate_id,
                    "Batch eligible, certificate minted"
                );
                self.aggregator.set_pending_certificate(minted.clone()).await;
                minted
            }
        };

        let span = info_span!(
            spans::PUBLISH_CERTIFICATE,
            batch_id = %batch_id,
            certificate_id = %certificate.certificate_id,
        );
        match self.publish(&certificate).instrument(span).await {
            Ok(acknowledged) => {
                if !self
                    .aggregator
                    .mark_certified(batch_id, &acknowledged.certificate_id)
                    .await
                {
                    return None;
                }
                self.refresh_pending_gauge().await;
                self.metrics.inc_counter(metric_names::CERTIFICATES_ISSUED).await;

                let event = CertificateIssued::new(&acknowledged, &self.config.verify_base_url);
                info!(
                    batch_id = %batch_id,
                    certificate_id = %event.certificate_id,
                    qr_target_url = %event.qr_target_url,
                    "Certificate issued"
                );
                // No subscribers is fine
                let _ = self.events.send(event.clone());
                Some(event)
            }
            Err(e) => {
                warn!(
                    batch_id = %batch_id,
                    certificate_id = %certificate.certificate_id,
                    error = %e,
                    "Certificate publication failed, left pending"
                );
                self.refresh_pending_gauge().await;
                None
            }
        }
    }

    /// Record the certificate on the ledger. Returns the certificate the
    /// ledger holds for the batch, which is an earlier one if the ledger
    /// already had a certificate for it.
    async fn publish(&self, certificate: &Certificate) -> Result<Certificate> {
        let receipt = Retry::new(self.config.publish_retry.clone())
            .run_with_predicate(
                "publish_certificate",
                || self.ledger_call(self.ledger.record_certificate(certificate)),
                ProvenanceError::is_retryable,
            )
            .await
            .into_result()?;

        if receipt.newly_recorded {
            return Ok(certificate.clone());
        }

        let existing = self
            .ledger_call(self.ledger.certificate_for_batch(&certificate.batch_id))
            .await?;
        match existing {
            Some(existing) => {
                if existing.certificate_id != certificate.certificate_id {
                    warn!(
                        batch_id = %certificate.batch_id,
                        existing = %existing.certificate_id,
                        discarded = %certificate.certificate_id,
                        "Ledger already holds a certificate for this batch, adopting it"
                    );
                }
                Ok(existing)
            }
            None => Ok(certificate.clone()),
        }
    }

    /// Retry publication for every batch with an unacknowledged or unminted
    /// certificate. Returns the certificates issued by this call.
    pub async fn publish_pending(&self) -> Vec<CertificateIssued> {
        let mut issued = Vec::new();
        for batch_id in self.aggregator.batches_awaiting_certificate().await {
            let _guard = self.locks.acquire(&batch_id).await;
            if let Some(event) = self.try_certify(&batch_id).await {
                issued.push(event);
            }
        }
        issued
    }

    /// Rebuild a batch from the ledger, then certify it if it qualifies
    pub async fn rebuild_from_ledger(&self, batch_id: &BatchId) -> Result<BatchProvenance> {
        let _guard = self.locks.acquire(batch_id).await;

        let records = self
            .ledger_call(self.ledger.records_for_batch(batch_id))
            .await?;
        let certificate = self
            .ledger_call(self.ledger.certificate_for_batch(batch_id))
            .await?;

        let rebuilt = self
            .aggregator
            .rebuild_from_ledger(batch_id, &records, certificate.as_ref())
            .await;
        info!(
            batch_id = %batch_id,
            records = records.len(),
            certified = rebuilt.certificate_issued,
            "Batch rebuilt from ledger"
        );

        if self.try_certify(batch_id).await.is_some() {
            if let Some(updated) = self.aggregator.snapshot(batch_id).await {
                return Ok(updated);
            }
        }
        Ok(rebuilt)
    }

    /// Run a ledger call under the configured deadline. Every failure is
    /// reported as the ledger being unavailable.
    async fn ledger_call<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let outcome = match tokio::time::timeout(self.config.ledger_timeout, call).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e @ ProvenanceError::LedgerUnavailable(_))) => e,
            Ok(Err(e)) => ProvenanceError::LedgerUnavailable(e.to_string()),
            Err(_) => ProvenanceError::LedgerTimeout(self.config.ledger_timeout),
        };
        self.metrics.inc_counter(metric_names::LEDGER_FAILURES).await;
        Err(outcome)
    }

    async fn refresh_pending_gauge(&self) {
        let pending = self.aggregator.batches_awaiting_certificate().await.len();
        self.metrics
            .set_gauge(metric_names::CERTIFICATES_PENDING, pending as u64)
            .await;
    }
}
