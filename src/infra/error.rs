//! Error types for provenance certification

use std::time::Duration;

use thiserror::Error;

use crate::domain::{InvalidContentHash, InvalidStageNumber};

/// Errors surfaced by the provenance core.
///
/// Validation rejections are not errors; they are returned as a
/// `ValidationResult` with `AUTO_REJECT`.
#[derive(Error, Debug)]
pub enum ProvenanceError {
    /// Stage number outside 1..=7
    #[error("invalid stage: {0}")]
    InvalidStage(#[from] InvalidStageNumber),

    /// Submission carried no bytes
    #[error("empty image payload")]
    EmptyPayload,

    /// Human decision referenced something that is not a content hash
    #[error("invalid image reference: {0}")]
    InvalidImageRef(#[from] InvalidContentHash),

    /// Human decision does not match the flagged submission it references
    #[error("review mismatch for image {image_ref}: {message}")]
    ReviewMismatch { image_ref: String, message: String },

    /// Human decision names an image that is not awaiting review
    #[error("image {0} is not awaiting expert review")]
    NotPendingReview(String),

    /// Every authenticity model failed and the fail-safe is disabled
    #[error("authenticity oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// Ledger write failed
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// Ledger write did not complete in time
    #[error("ledger timed out after {0:?}")]
    LedgerTimeout(Duration),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProvenanceError {
    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            ProvenanceError::InvalidStage(_) => "INVALID_STAGE",
            ProvenanceError::EmptyPayload => "EMPTY_PAYLOAD",
            ProvenanceError::InvalidImageRef(_) => "INVALID_IMAGE_REF",
            ProvenanceError::ReviewMismatch { .. } => "REVIEW_MISMATCH",
            ProvenanceError::NotPendingReview(_) => "NOT_PENDING_REVIEW",
            ProvenanceError::OracleUnavailable(_) => "ORACLE_UNAVAILABLE",
            ProvenanceError::LedgerUnavailable(_) | ProvenanceError::LedgerTimeout(_) => {
                "LEDGER_UNAVAILABLE"
            }
            ProvenanceError::Database(_) | ProvenanceError::Migration(_) => "DATABASE_ERROR",
            ProvenanceError::Serialization(_) => "SERIALIZATION_ERROR",
            ProvenanceError::Configuration(_) => "CONFIGURATION_ERROR",
            ProvenanceError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Transient dependency failure; the caller may retry with backoff.
    ///
    /// Input errors are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProvenanceError::OracleUnavailable(_)
            | ProvenanceError::LedgerUnavailable(_)
            | ProvenanceError::LedgerTimeout(_) => true,
            ProvenanceError::Database(e) => is_retryable_db_error(e),
            _ => false,
        }
    }

    /// Input error rejected synchronously (never retried, never recorded)
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ProvenanceError::InvalidStage(_)
                | ProvenanceError::EmptyPayload
                | ProvenanceError::InvalidImageRef(_)
                | ProvenanceError::ReviewMismatch { .. }
                | ProvenanceError::NotPendingReview(_)
        )
    }

    /// Message safe to show a farmer. Never includes dependency details.
    pub fn user_message(&self) -> &'static str {
        match self {
            ProvenanceError::InvalidStage(_) => "The production stage must be between 1 and 7.",
            ProvenanceError::EmptyPayload => "The uploaded file is empty.",
            ProvenanceError::InvalidImageRef(_)
            | ProvenanceError::ReviewMismatch { .. }
            | ProvenanceError::NotPendingReview(_) => {
                "The referenced image could not be matched to a pending review."
            }
            _ if self.is_retryable() => {
                "We could not process your photo right now. Please try again shortly."
            }
            _ => "Something went wrong while processing your photo.",
        }
    }
}

/// Check if a database error is transient
pub fn is_retryable_db_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) => true,
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::PoolClosed => false,
        sqlx::Error::Database(db_err) => {
            // SQLITE_BUSY (5) and SQLITE_LOCKED (6) clear once the writer finishes
            matches!(db_err.code().as_deref(), Some("5") | Some("6"))
        }
        _ => false,
    }
}

/// Result type for provenance operations
pub type Result<T> = std::result::Result<T, ProvenanceError>;
