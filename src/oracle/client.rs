//! Fail-safe authenticity client
//!
//! Tries the primary model, then the fallback model. Each call runs under a
//! timeout and a per-model circuit breaker. If no model answers, the client
//! substitutes the neutral score so the policy engine flags the image for
//! human review instead of approving or rejecting it on an outage.

use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{AuthenticityOracle, OracleError};
use crate::domain::AuthenticityAssessment;
use crate::infra::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, ProvenanceError};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::validation::NEUTRAL_AUTHENTICITY_SCORE;

/// `model_used` reported when the neutral score was substituted
pub const FALLBACK_NEUTRAL_MODEL: &str = "fallback-neutral";

/// Client behavior
#[derive(Debug, Clone)]
pub struct OracleClientConfig {
    /// Deadline for each model call
    pub timeout: Duration,
    /// Substitute the neutral score when every model fails.
    /// When false, an outage surfaces as `ORACLE_UNAVAILABLE`.
    pub fail_safe: bool,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for OracleClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            fail_safe: true,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

struct ModelSlot {
    oracle: Arc<dyn AuthenticityOracle>,
    breaker: CircuitBreaker,
}

/// Primary/fallback authenticity client
pub struct AuthenticityClient {
    models: Vec<ModelSlot>,
    config: OracleClientConfig,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl AuthenticityClient {
    pub fn new(primary: Arc<dyn AuthenticityOracle>, config: OracleClientConfig) -> Self {
        let mut client = Self {
            models: Vec::with_capacity(2),
            config,
            metrics: None,
        };
        client.push_model("oracle.primary", primary);
        client
    }

    /// Add a fallback model with the same contract
    pub fn with_fallback(mut self, fallback: Arc<dyn AuthenticityOracle>) -> Self {
        self.push_model("oracle.fallback", fallback);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn push_model(&mut self, name: &str, oracle: Arc<dyn AuthenticityOracle>) {
        self.models.push(ModelSlot {
            oracle,
            breaker: CircuitBreaker::with_config(name, self.config.circuit_breaker.clone()),
        });
    }

    /// Circuit breakers in call order (primary first)
    pub fn breakers(&self) -> impl Iterator<Item = &CircuitBreaker> {
        self.models.iter().map(|slot| &slot.breaker)
    }

    /// Score an image.
    ///
    /// With the fail-safe enabled this never fails; a total outage yields
    /// the neutral score with `degraded = true`.
    pub async fn assess(&self, content: &Bytes) -> Result<AuthenticityAssessment, ProvenanceError> {
        let mut last_error: Option<OracleError> = None;

        for slot in &self.models {
            let started = Instant::now();
            let outcome = slot
                .breaker
                .call_with_timeout(slot.oracle.score(content.clone()), self.config.timeout)
                .await;

            let error = match outcome {
                Ok(score) if score.fake_probability.is_finite() => {
                    self.observe_latency(started).await;
                    debug!(
                        model = %score.model_used,
                        fake_probability = score.fake_probability,
                        "Authenticity scored"
                    );
                    return Ok(AuthenticityAssessment {
                        fake_probability: score.fake_probability.clamp(0.0, 1.0),
                        model_used: score.model_used,
                        degraded: false,
                    });
                }
                Ok(score) => OracleError::InvalidResponse(format!(
                    "non-finite probability from {}",
                    score.model_used
                )),
                Err(CircuitBreakerError::ServiceError(e)) => e,
                Err(CircuitBreakerError::Timeout(d)) => OracleError::Timeout(d),
                Err(CircuitBreakerError::CircuitOpen) => {
                    OracleError::CircuitOpen(slot.breaker.name().to_string())
                }
            };

            warn!(model = slot.breaker.name(), error = %error, "Authenticity model failed");
            last_error = Some(error);
        }

        let detail = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no authenticity model configured".to_string());

        if !self.config.fail_safe {
            return Err(ProvenanceError::OracleUnavailable(detail));
        }

        warn!(error = %detail, "All authenticity models failed, using neutral score");
        if let Some(metrics) = &self.metrics {
            metrics.inc_counter(metric_names::ORACLE_FALLBACK_NEUTRAL).await;
        }
        Ok(AuthenticityAssessment {
            fake_probability: NEUTRAL_AUTHENTICITY_SCORE,
            model_used: FALLBACK_NEUTRAL_MODEL.to_string(),
            degraded: true,
        })
    }

    async fn observe_latency(&self, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics
                .observe_histogram(metric_names::ORACLE_LATENCY, started.elapsed().as_secs_f64())
                .await;
        }
    }
}
