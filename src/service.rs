//! Provenance service
//!
//! Inbound facade over validation, human review and certification:
//!
//! ```text
//! submit_image ─► fingerprint ─► format check ─┬─► (fail) AUTO_REJECT
//!                                              └─► oracle ─► policy
//!                                                   │
//!                     AUTO_APPROVE ◄────────────────┼──► FLAG_FOR_HUMAN ─► review queue
//!                          │                        │                          │
//!                          ▼                        ▼                          ▼
//!                  certification          AUTO_REJECT          record_human_decision
//! ```

use bytes::Bytes;
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{info, info_span, warn, Instrument};

use crate::certification::{CertificationConfig, CertificationStateMachine};
use crate::config::Config;
use crate::crypto::fingerprint;
use crate::domain::{
    BatchId, BatchMetadata, BatchProvenance, Certificate, CertificateIssued, ContentHash,
    HumanDecision, ImageSubmission, StageNumber, ValidationAction, ValidationResult,
    VerifiedImage, Verifier,
};
use crate::infra::{CircuitState, LedgerRecorder, ProvenanceError, Result};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::oracle::AuthenticityClient;
use crate::review::{EnqueueOutcome, PendingReview, ReviewOutcome, ReviewQueue};
use crate::telemetry::spans;
use crate::validation::{
    visual_quality_score, FormatLimits, FormatValidator, PolicyEngine, PolicyInput,
    PolicyThresholds, NEUTRAL_AUTHENTICITY_SCORE,
};

/// Tunables for [`ProvenanceService`]
#[derive(Debug, Clone, Default)]
pub struct ServiceSettings {
    pub format: FormatLimits,
    pub thresholds: PolicyThresholds,
    pub certification: CertificationConfig,
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            format: config.format,
            thresholds: config.thresholds,
            certification: config.certification(),
        }
    }
}

/// Photo validation and batch certification
pub struct ProvenanceService {
    validator: FormatValidator,
    policy: PolicyEngine,
    oracle: AuthenticityClient,
    certification: CertificationStateMachine,
    reviews: ReviewQueue,
    metrics: Arc<MetricsRegistry>,
}

impl ProvenanceService {
    pub fn new(
        oracle: AuthenticityClient,
        ledger: Arc<dyn LedgerRecorder>,
        settings: ServiceSettings,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            validator: FormatValidator::new(settings.format),
            policy: PolicyEngine::new(settings.thresholds),
            oracle: oracle.with_metrics(metrics.clone()),
            certification: CertificationStateMachine::new(
                ledger,
                settings.certification,
                metrics.clone(),
            ),
            reviews: ReviewQueue::new(),
            metrics,
        }
    }

    /// Validate a photo and, when approved, feed it to certification.
    ///
    /// Validation rejections are returned as `AUTO_REJECT` results, not
    /// errors. Errors are input errors (`INVALID_STAGE`, `EMPTY_PAYLOAD`) or
    /// retryable dependency failures (`LEDGER_UNAVAILABLE`, and
    /// `ORACLE_UNAVAILABLE` when the fail-safe is off).
    pub async fn submit_image(
        &self,
        batch_id: BatchId,
        stage_number: i64,
        content: impl Into<Bytes>,
        declared_mime: &str,
    ) -> Result<ValidationResult> {
        let stage = StageNumber::from_i64(stage_number)?;
        let content = content.into();
        if content.is_empty() {
            return Err(ProvenanceError::EmptyPayload);
        }

        let submission = ImageSubmission::new(batch_id, stage, content, declared_mime);
        let span = info_span!(
            spans::SUBMIT_IMAGE,
            batch_id = %submission.batch_id(),
            stage = stage.get(),
            bytes = submission.len(),
        );
        self.process_submission(submission).instrument(span).await
    }

    async fn process_submission(&self, submission: ImageSubmission) -> Result<ValidationResult> {
        let started = Instant::now();
        let content_hash = fingerprint(submission.content());
        let report = self
            .validator
            .validate(submission.content(), submission.declared_mime());
        let quality = visual_quality_score(submission.len(), report.integrity_valid);

        let mut result = if report.is_acceptable() {
            let assessment = self.oracle.assess(submission.content()).await?;
            let mut result = self.policy.decide(PolicyInput {
                format: &report,
                content_hash,
                authenticity_score: assessment.fake_probability,
                visual_quality: quality,
            });
            result.model_used = Some(assessment.model_used);
            result
        } else {
            // Unreadable content is never scored
            self.policy.decide(PolicyInput {
                format: &report,
                content_hash,
                authenticity_score: NEUTRAL_AUTHENTICITY_SCORE,
                visual_quality: quality,
            })
        };

        match result.action {
            ValidationAction::AutoApprove => {
                self.certification
                    .on_verified_image(&VerifiedImage {
                        batch_id: submission.batch_id().clone(),
                        stage: submission.stage(),
                        content_hash,
                        verified_by: Verifier::Policy,
                    })
                    .await?;
            }
            ValidationAction::FlagForHuman => {
                let outcome = self
                    .reviews
                    .enqueue(PendingReview {
                        batch_id: submission.batch_id().clone(),
                        stage: submission.stage(),
                        content_hash,
                        validation: result.clone(),
                        flagged_at: Utc::now(),
                    })
                    .await;
                match outcome {
                    EnqueueOutcome::Queued => self.refresh_review_gauge().await,
                    EnqueueOutcome::AlreadyQueued => {}
                    EnqueueOutcome::Conflict(existing) => {
                        // One photo is evidence for one batch stage only
                        warn!(
                            content_hash = %content_hash,
                            queued_batch = %existing.batch_id,
                            queued_stage = existing.stage.get(),
                            "Image already awaiting review for another batch or stage"
                        );
                        reject_duplicate_review(&mut result, &existing);
                    }
                }
            }
            ValidationAction::AutoReject => {}
        }

        self.metrics.inc_counter(result.action.metric_name()).await;
        self.metrics
            .observe_histogram(
                metric_names::SUBMISSION_LATENCY,
                started.elapsed().as_secs_f64(),
            )
            .await;

        info!(
            content_hash = %content_hash,
            action = %result.action,
            authenticity = result.authenticity_score,
            quality = result.visual_quality_score,
            model = result.model_used.as_deref().unwrap_or("none"),
            "Submission validated"
        );
        Ok(result)
    }

    /// Apply an expert decision on a flagged image.
    ///
    /// Approval feeds the same certification path as an automatic approval;
    /// rejection never does. Only images awaiting review can be decided
    /// (`NOT_PENDING_REVIEW` otherwise), and the decision must name the batch
    /// and stage the image was flagged for (`REVIEW_MISMATCH`).
    pub async fn record_human_decision(&self, decision: HumanDecision) -> Result<ReviewOutcome> {
        let span = info_span!(
            spans::HUMAN_DECISION,
            batch_id = %decision.batch_id,
            reviewer_id = %decision.reviewer_id,
            approved = decision.approved,
        );
        self.apply_decision(decision).instrument(span).await
    }

    async fn apply_decision(&self, decision: HumanDecision) -> Result<ReviewOutcome> {
        let content_hash: ContentHash = decision.image_ref.parse()?;
        let not_pending = || ProvenanceError::NotPendingReview(decision.image_ref.clone());

        let pending = self.reviews.get(&content_hash).await.ok_or_else(not_pending)?;
        if pending.batch_id != decision.batch_id || pending.stage != decision.stage {
            return Err(ProvenanceError::ReviewMismatch {
                image_ref: decision.image_ref.clone(),
                message: format!(
                    "flagged for batch {} stage {}, decision names batch {} stage {}",
                    pending.batch_id, pending.stage, decision.batch_id, decision.stage
                ),
            });
        }

        // Claim the entry so a concurrent decision on the same image is refused
        let pending = self.reviews.remove(&content_hash).await.ok_or_else(not_pending)?;

        let certification = if decision.approved {
            let verified = self
                .certification
                .on_verified_image(&VerifiedImage {
                    batch_id: decision.batch_id.clone(),
                    stage: decision.stage,
                    content_hash,
                    verified_by: Verifier::Reviewer {
                        reviewer_id: decision.reviewer_id.clone(),
                    },
                })
                .await;
            match verified {
                Ok(outcome) => {
                    self.metrics.inc_counter(metric_names::REVIEW_APPROVED).await;
                    Some(outcome)
                }
                Err(e) => {
                    // Not applied, so the image stays reviewable
                    self.reviews.restore(pending).await;
                    return Err(e);
                }
            }
        } else {
            self.metrics.inc_counter(metric_names::REVIEW_REJECTED).await;
            None
        };

        self.refresh_review_gauge().await;

        info!(
            content_hash = %content_hash,
            approved = decision.approved,
            reason = %decision.reason,
            "Human decision applied"
        );
        Ok(ReviewOutcome {
            decision,
            certification,
        })
    }

    pub async fn register_batch(&self, metadata: BatchMetadata) {
        self.certification.register_batch(metadata).await;
    }

    /// Current evidence for a batch; `None` until its first verified image
    pub async fn batch_status(&self, batch_id: &BatchId) -> Option<BatchProvenance> {
        self.certification.batch_status(batch_id).await
    }

    /// Flagged submissions awaiting a reviewer, oldest first
    pub async fn pending_reviews(&self) -> Vec<PendingReview> {
        self.reviews.list().await
    }

    /// The ledger-acknowledged certificate for a batch
    pub async fn certificate(&self, batch_id: &BatchId) -> Result<Option<Certificate>> {
        self.certification.certificate(batch_id).await
    }

    pub fn subscribe_certificates(&self) -> broadcast::Receiver<CertificateIssued> {
        self.certification.subscribe()
    }

    /// Retry certificates the ledger has not acknowledged yet
    pub async fn publish_pending(&self) -> Vec<CertificateIssued> {
        self.certification.publish_pending().await
    }

    /// Reconstruct a batch from the ledger
    pub async fn rebuild_batch(&self, batch_id: &BatchId) -> Result<BatchProvenance> {
        self.certification.rebuild_from_ledger(batch_id).await
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Registry metrics plus the state of each model's circuit breaker, as JSON
    pub async fn metrics_snapshot(&self) -> serde_json::Value {
        let mut circuits = Vec::new();
        for breaker in self.oracle.breakers() {
            circuits.push(serde_json::json!({
                "model": breaker.name(),
                "state": breaker.state().await.to_string(),
                "stats": breaker.stats().to_json(),
            }));
        }

        let mut snapshot = self.metrics.to_json().await;
        snapshot["circuit_breakers"] = serde_json::Value::Array(circuits);
        snapshot
    }

    /// Prometheus text exposition of the same data
    pub async fn metrics_prometheus(&self) -> String {
        let mut output = self.metrics.to_prometheus().await;

        output.push_str("# TYPE oracle_circuit_open gauge\n");
        for breaker in self.oracle.breakers() {
            let open = breaker.state().await != CircuitState::Closed;
            output.push_str(&format!(
                "oracle_circuit_open{{model=\"{}\"}} {}\n",
                breaker.name(),
                u8::from(open)
            ));
        }
        output.push_str("# TYPE oracle_circuit_rejected_total counter\n");
        for breaker in self.oracle.breakers() {
            output.push_str(&format!(
                "oracle_circuit_rejected_total{{model=\"{}\"}} {}\n",
                breaker.name(),
                breaker.stats().rejected.load(Ordering::Relaxed)
            ));
        }
        output
    }

    async fn refresh_review_gauge(&self) {
        let depth = self.reviews.len().await as u64;
        self.metrics
            .set_gauge(metric_names::REVIEW_QUEUE_DEPTH, depth)
            .await;
    }
}

/// Turn a flag into a rejection when the photo is already queued elsewhere
fn reject_duplicate_review(result: &mut ValidationResult, existing: &PendingReview) {
    let issue = format!(
        "Image already awaiting expert review for batch {} stage {}",
        existing.batch_id, existing.stage
    );
    result.action = ValidationAction::AutoReject;
    result.requires_human_review = false;
    result.reason = format!("Rejected: {issue}");
    result.issues.push(issue);
}
