//! Runtime configuration
//!
//! Loaded from environment variables. Every setting has a default, so an
//! empty environment yields a working in-memory setup with the standard
//! decision thresholds.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::certification::CertificationConfig;
use crate::infra::{ProvenanceError, Result, RetryConfig};
use crate::oracle::{
    AuthenticityClient, AuthenticityOracle, HttpClassifier, HttpClassifierConfig,
    OracleClientConfig,
};
use crate::validation::{FormatLimits, PolicyThresholds};

/// Authenticity model endpoints
#[derive(Debug, Clone, PartialEq)]
pub struct OracleSettings {
    pub primary_url: Option<String>,
    pub primary_model: String,
    pub fallback_url: Option<String>,
    pub fallback_model: String,
    pub api_token: Option<String>,
    pub timeout: Duration,
    /// Substitute the neutral score when every model fails
    pub fail_safe: bool,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            primary_url: None,
            primary_model: "primary".to_string(),
            fallback_url: None,
            fallback_model: "fallback".to_string(),
            api_token: None,
            timeout: Duration::from_secs(10),
            fail_safe: true,
        }
    }
}

/// Ledger connection
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSettings {
    /// SQLite URL; in-memory ledger when unset
    pub database_url: Option<String>,
    pub timeout: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub format: FormatLimits,
    pub thresholds: PolicyThresholds,
    pub oracle: OracleSettings,
    pub ledger: LedgerSettings,
    /// Base of the certificate verification URL
    pub verify_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            format: FormatLimits::default(),
            thresholds: PolicyThresholds::default(),
            oracle: OracleSettings::default(),
            ledger: LedgerSettings::default(),
            verify_base_url: CertificationConfig::default().verify_base_url,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Boolean switch; anything other than a recognized spelling is an error
fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(default),
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ProvenanceError::Configuration(format!(
            "{key} must be true or false, got {raw:?}"
        ))),
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();

        let config = Self {
            format: FormatLimits {
                min_bytes: parsed(&lookup, "AGRITRACE_MIN_IMAGE_BYTES", defaults.format.min_bytes),
                max_bytes: parsed(&lookup, "AGRITRACE_MAX_IMAGE_BYTES", defaults.format.max_bytes),
            },
            thresholds: PolicyThresholds {
                reject_above: parsed(
                    &lookup,
                    "AGRITRACE_REJECT_THRESHOLD",
                    defaults.thresholds.reject_above,
                ),
                approve_below: parsed(
                    &lookup,
                    "AGRITRACE_APPROVE_THRESHOLD",
                    defaults.thresholds.approve_below,
                ),
                quality_above: parsed(
                    &lookup,
                    "AGRITRACE_QUALITY_THRESHOLD",
                    defaults.thresholds.quality_above,
                ),
            },
            oracle: OracleSettings {
                primary_url: non_empty(&lookup, "ORACLE_PRIMARY_URL"),
                primary_model: non_empty(&lookup, "ORACLE_PRIMARY_MODEL")
                    .unwrap_or(defaults.oracle.primary_model),
                fallback_url: non_empty(&lookup, "ORACLE_FALLBACK_URL"),
                fallback_model: non_empty(&lookup, "ORACLE_FALLBACK_MODEL")
                    .unwrap_or(defaults.oracle.fallback_model),
                api_token: non_empty(&lookup, "ORACLE_API_TOKEN"),
                timeout: Duration::from_millis(parsed(
                    &lookup,
                    "ORACLE_TIMEOUT_MS",
                    defaults.oracle.timeout.as_millis() as u64,
                )),
                fail_safe: flag(&lookup, "ORACLE_FAIL_SAFE", defaults.oracle.fail_safe)?,
            },
            ledger: LedgerSettings {
                database_url: non_empty(&lookup, "LEDGER_DATABASE_URL"),
                timeout: Duration::from_millis(parsed(
                    &lookup,
                    "LEDGER_TIMEOUT_MS",
                    defaults.ledger.timeout.as_millis() as u64,
                )),
            },
            verify_base_url: non_empty(&lookup, "CERTIFICATE_VERIFY_BASE_URL")
                .unwrap_or(defaults.verify_base_url),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break the decision policy
    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        for (name, value) in [("reject", t.reject_above), ("approve", t.approve_below)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ProvenanceError::Configuration(format!(
                    "{name} threshold {value} outside [0, 1]"
                )));
            }
        }
        if t.approve_below > t.reject_above {
            return Err(ProvenanceError::Configuration(format!(
                "approve threshold {} above reject threshold {}",
                t.approve_below, t.reject_above
            )));
        }
        if t.quality_above > 100 {
            return Err(ProvenanceError::Configuration(format!(
                "quality threshold {} above 100",
                t.quality_above
            )));
        }
        if self.format.min_bytes > self.format.max_bytes {
            return Err(ProvenanceError::Configuration(format!(
                "minimum image size {} above maximum {}",
                self.format.min_bytes, self.format.max_bytes
            )));
        }
        if self.oracle.timeout.is_zero() || self.ledger.timeout.is_zero() {
            return Err(ProvenanceError::Configuration(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn certification(&self) -> CertificationConfig {
        CertificationConfig {
            ledger_timeout: self.ledger.timeout,
            verify_base_url: self.verify_base_url.clone(),
            publish_retry: RetryConfig::ledger(),
            ..CertificationConfig::default()
        }
    }

    pub fn oracle_client(&self) -> OracleClientConfig {
        OracleClientConfig {
            timeout: self.oracle.timeout,
            fail_safe: self.oracle.fail_safe,
            ..OracleClientConfig::default()
        }
    }

    /// Build the HTTP authenticity client. Fails when no primary endpoint is set.
    pub fn build_oracle(&self) -> Result<AuthenticityClient> {
        let primary_url = self.oracle.primary_url.as_ref().ok_or_else(|| {
            ProvenanceError::Configuration("ORACLE_PRIMARY_URL is not set".to_string())
        })?;

        let classifier = |url: &str, model: &str| -> Result<Arc<dyn AuthenticityOracle>> {
            let classifier = HttpClassifier::new(
                HttpClassifierConfig::new(url, model)
                    .with_api_token(self.oracle.api_token.clone())
                    .with_request_timeout(self.oracle.timeout),
            )?;
            Ok(Arc::new(classifier))
        };

        let mut client = AuthenticityClient::new(
            classifier(primary_url, &self.oracle.primary_model)?,
            self.oracle_client(),
        );
        if let Some(fallback_url) = &self.oracle.fallback_url {
            client = client.with_fallback(classifier(fallback_url, &self.oracle.fallback_model)?);
        }
        Ok(client)
    }
}
