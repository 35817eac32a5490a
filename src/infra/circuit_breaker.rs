//! Circuit breaker for authenticity model calls
//!
//! A model that keeps failing or timing out is skipped for a cool-down
//! period so uploads fall through to the secondary model (or the neutral
//! score) immediately instead of each waiting out the full timeout.
//!
//! # States
//!
//! - **Closed**: Normal operation, calls pass through
//! - **Open**: Model considered down, calls fail fast
//! - **HalfOpen**: Cool-down elapsed, a limited number of probe calls allowed

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Successes in half-open state needed to close the circuit
    pub success_threshold: u32,
    /// How long the circuit stays open before probing
    pub open_timeout: Duration,
    /// Maximum probe calls allowed while half-open
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
            half_open_max_requests: 2,
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Default)]
pub struct CircuitBreakerStats {
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    /// Calls rejected while open
    pub rejected: AtomicU64,
    pub timeouts: AtomicU64,
    pub times_opened: AtomicU64,
}

impl CircuitBreakerStats {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "successes": self.successes.load(Ordering::Relaxed),
            "failures": self.failures.load(Ordering::Relaxed),
            "rejected": self.rejected.load(Ordering::Relaxed),
            "timeouts": self.timeouts.load(Ordering::Relaxed),
            "times_opened": self.times_opened.load(Ordering::Relaxed),
        })
    }
}

struct InternalState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    half_open_requests: u32,
}

impl Default for InternalState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            half_open_requests: 0,
        }
    }
}

/// Circuit breaker guarding one external model
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<InternalState>,
    stats: CircuitBreakerStats,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(InternalState::default()),
            stats: CircuitBreakerStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> CircuitState {
        let mut state = self.state.write().await;
        self.maybe_half_open(&mut state);
        state.state
    }

    /// Check whether a call may proceed; counts a half-open probe if so
    pub(crate) async fn is_allowed(&self) -> bool {
        let mut state = self.state.write().await;
        self.maybe_half_open(&mut state);

        let allowed = match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if state.half_open_requests < self.config.half_open_max_requests {
                    state.half_open_requests += 1;
                    true
                } else {
                    false
                }
            }
        };
        if !allowed {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
        }
        allowed
    }

    pub async fn record_success(&self) {
        self.stats.successes.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write().await;

        match state.state {
            CircuitState::Closed => state.failure_count = 0,
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    tracing::info!(circuit = %self.name, "Circuit breaker closed");
                    *state = InternalState::default();
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write().await;

        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    self.open(&mut state);
                }
            }
            // A failed probe re-opens immediately
            CircuitState::HalfOpen => self.open(&mut state),
            CircuitState::Open => {}
        }
    }

    /// Run `f` under the breaker with a deadline.
    ///
    /// A timeout counts as a failure.
    pub async fn call_with_timeout<F, T, E>(
        &self,
        f: F,
        timeout: Duration,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        if !self.is_allowed().await {
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match tokio::time::timeout(timeout, f).await {
            Ok(Ok(value)) => {
                self.record_success().await;
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure().await;
                Err(CircuitBreakerError::ServiceError(e))
            }
            Err(_) => {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                self.record_failure().await;
                Err(CircuitBreakerError::Timeout(timeout))
            }
        }
    }

    pub fn stats(&self) -> &CircuitBreakerStats {
        &self.stats
    }

    fn maybe_half_open(&self, state: &mut InternalState) {
        if state.state != CircuitState::Open {
            return;
        }
        if let Some(opened_at) = state.opened_at {
            if opened_at.elapsed() >= self.config.open_timeout {
                tracing::info!(circuit = %self.name, "Circuit breaker half-open, probing");
                state.state = CircuitState::HalfOpen;
                state.success_count = 0;
                state.half_open_requests = 0;
            }
        }
    }

    fn open(&self, state: &mut InternalState) {
        tracing::warn!(
            circuit = %self.name,
            failures = state.failure_count,
            open_for = ?self.config.open_timeout,
            "Circuit breaker opened"
        );
        state.state = CircuitState::Open;
        state.opened_at = Some(Instant::now());
        state.success_count = 0;
        state.half_open_requests = 0;
        self.stats.times_opened.fetch_add(1, Ordering::Relaxed);
    }
}

/// Error type for circuit breaker protected calls
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, call rejected without running
    CircuitOpen,
    /// Underlying call failed
    ServiceError(E),
    /// Call exceeded its deadline
    Timeout(Duration),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "circuit breaker is open"),
            CircuitBreakerError::ServiceError(e) => write!(f, "service error: {}", e),
            CircuitBreakerError::Timeout(d) => write!(f, "timed out after {:?}", d),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CircuitBreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CircuitBreakerError::ServiceError(e) => Some(e),
            _ => None,
        }
    }
}
