//! Authenticity oracle
//!
//! The oracle is an external image classifier that estimates the
//! probability that a photo is synthetic or AI-generated. This module holds
//! the narrow contract ([`AuthenticityOracle`]), an HTTP implementation
//! ([`HttpClassifier`]) and the fail-safe client ([`AuthenticityClient`])
//! that chains a primary and a fallback model.

mod client;
mod http;

use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)]
use mockall::automock;
use std::time::Duration;
use thiserror::Error;

pub use client::{AuthenticityClient, OracleClientConfig, FALLBACK_NEUTRAL_MODEL};
pub use http::{synthetic_probability, ClassifierLabel, HttpClassifier, HttpClassifierConfig};

/// Answer from one model
#[derive(Debug, Clone, PartialEq)]
pub struct OracleScore {
    /// Probability mass on synthetic/fake labels, in [0, 1]
    pub fake_probability: f64,
    pub model_used: String,
}

/// Failure of a single model call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid classifier response: {0}")]
    InvalidResponse(String),

    #[error("classifier returned no usable labels")]
    NoUsableLabels,

    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("circuit open for model {0}")]
    CircuitOpen(String),
}

/// Image authenticity classifier
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AuthenticityOracle: Send + Sync {
    /// Score one image
    async fn score(&self, content: Bytes) -> Result<OracleScore, OracleError>;
}
