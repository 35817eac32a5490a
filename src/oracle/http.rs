//! HTTP image classifier
//!
//! Speaks the Hugging Face inference shape: raw image bytes are POSTed and
//! the response is a list of `{ "label": ..., "score": ... }` entries
//! (sometimes wrapped in an outer list).

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{AuthenticityOracle, OracleError, OracleScore};
use crate::infra::ProvenanceError;

/// Label tokens that denote a synthetic image
const SYNTHETIC_TOKENS: &[&str] = &[
    "fake",
    "ai",
    "aigenerated",
    "generated",
    "artificial",
    "synthetic",
    "deepfake",
];

/// Label tokens that denote a camera photo
const AUTHENTIC_TOKENS: &[&str] = &["real", "human", "authentic", "natural", "photo"];

const MAX_ERROR_BODY: usize = 256;

/// One classifier output entry
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClassifierLabel {
    pub label: String,
    pub score: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClassifierResponse {
    Flat(Vec<ClassifierLabel>),
    Nested(Vec<Vec<ClassifierLabel>>),
}

impl ClassifierResponse {
    fn into_labels(self) -> Vec<ClassifierLabel> {
        match self {
            ClassifierResponse::Flat(labels) => labels,
            ClassifierResponse::Nested(outer) => outer.into_iter().flatten().collect(),
        }
    }
}

/// HTTP classifier configuration
#[derive(Debug, Clone)]
pub struct HttpClassifierConfig {
    /// Inference endpoint for the model
    pub endpoint: String,
    /// Model identifier reported in `model_used`
    pub model: String,
    /// Bearer token, if the endpoint requires one
    pub api_token: Option<String>,
    pub request_timeout: Duration,
}

impl HttpClassifierConfig {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_token: None,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_api_token(mut self, token: Option<String>) -> Self {
        self.api_token = token;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Classifier reached over HTTP
pub struct HttpClassifier {
    config: HttpClassifierConfig,
    http_client: reqwest::Client,
}

impl HttpClassifier {
    /// Build the classifier. Fails when the TLS backend cannot be initialized.
    pub fn new(config: HttpClassifierConfig) -> Result<Self, ProvenanceError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("agritrace/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                ProvenanceError::Configuration(format!(
                    "HTTP client for model {}: {e}",
                    config.model
                ))
            })?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl AuthenticityOracle for HttpClassifier {
    async fn score(&self, content: Bytes) -> Result<OracleScore, OracleError> {
        let mut request = self
            .http_client
            .post(&self.config.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content);
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout(self.config.request_timeout)
            } else {
                OracleError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body: truncate_chars(&body, MAX_ERROR_BODY),
            });
        }

        let parsed: ClassifierResponse = response
            .json()
            .await
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;
        let labels = parsed.into_labels();

        let fake_probability = synthetic_probability(&labels).ok_or(OracleError::NoUsableLabels)?;
        debug!(
            model = %self.config.model,
            fake_probability,
            labels = labels.len(),
            "Classifier responded"
        );

        Ok(OracleScore {
            fake_probability,
            model_used: self.config.model.clone(),
        })
    }
}

/// At most `max` characters of `text`, cut on a character boundary
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

fn label_tokens(label: &str) -> Vec<String> {
    let lower = label.to_ascii_lowercase();
    let mut tokens: Vec<String> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    // "AI-generated" also matches as one word
    tokens.push(lower.chars().filter(char::is_ascii_alphanumeric).collect());
    tokens
}

fn has_token(label: &str, vocabulary: &[&str]) -> bool {
    label_tokens(label)
        .iter()
        .any(|t| vocabulary.contains(&t.as_str()))
}

/// Probability mass assigned to synthetic labels, clamped to [0, 1].
///
/// When only authentic labels are present the complement of their mass is
/// used. Returns `None` when no label is recognized or a score is not finite.
pub fn synthetic_probability(labels: &[ClassifierLabel]) -> Option<f64> {
    if labels.iter().any(|l| !l.score.is_finite()) {
        return None;
    }

    let synthetic: Vec<f64> = labels
        .iter()
        .filter(|l| has_token(&l.label, SYNTHETIC_TOKENS))
        .map(|l| l.score)
        .collect();
    if !synthetic.is_empty() {
        return Some(synthetic.iter().sum::<f64>().clamp(0.0, 1.0));
    }

    let authentic: Vec<f64> = labels
        .iter()
        .filter(|l| has_token(&l.label, AUTHENTIC_TOKENS))
        .map(|l| l.score)
        .collect();
    if !authentic.is_empty() {
        return Some((1.0 - authentic.iter().sum::<f64>()).clamp(0.0, 1.0));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(label: &str, score: f64) -> ClassifierLabel {
        ClassifierLabel {
            label: label.to_string(),
            score,
        }
    }

    #[test]
    fn test_sums_synthetic_labels() {
        let labels = vec![label("artificial", 0.6), label("AI-Generated", 0.2), label("human", 0.2)];
        let p = synthetic_probability(&labels).unwrap();
        assert!((p - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_complement_of_authentic_labels() {
        let labels = vec![label("real", 0.9)];
        let p = synthetic_probability(&labels).unwrap();
        assert!((p - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_unrelated_words_do_not_match() {
        // "plain" contains "ai" but is not the token "ai"
        assert_eq!(synthetic_probability(&[label("plain field", 0.7)]), None);
        assert_eq!(synthetic_probability(&[]), None);
    }

    #[test]
    fn test_mass_is_clamped() {
        let labels = vec![label("fake", 0.8), label("deepfake", 0.7)];
        assert_eq!(synthetic_probability(&labels), Some(1.0));
    }

    #[test]
    fn test_non_finite_scores_are_unusable() {
        assert_eq!(synthetic_probability(&[label("fake", f64::NAN)]), None);
    }

    #[test]
    fn test_error_body_truncation_respects_char_boundaries() {
        let body = "€".repeat(300);
        let cut = truncate_chars(&body, MAX_ERROR_BODY);
        assert_eq!(cut.chars().count(), MAX_ERROR_BODY);
        assert!(cut.chars().all(|c| c == '€'));

        assert_eq!(truncate_chars("short", MAX_ERROR_BODY), "short");
        assert_eq!(truncate_chars("aé", 1), "a");
    }

    #[test]
    fn test_nested_response_shape() {
        let parsed: ClassifierResponse =
            serde_json::from_str(r#"[[{"label":"fake","score":0.4},{"label":"real","score":0.6}]]"#)
                .unwrap();
        let labels = parsed.into_labels();
        assert_eq!(labels.len(), 2);
        assert_eq!(synthetic_probability(&labels), Some(0.4));
    }
}
