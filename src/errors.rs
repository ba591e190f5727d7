//! Structured error types for the memory engine
//!
//! Every failure the engine can report maps to one variant with a stable,
//! machine-readable code. Internal helpers use `anyhow` for context and are
//! converted at component boundaries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error payload for collaborators that forward errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Machine-readable error code
    pub code: String,

    /// Human-readable error message
    pub message: String,
}

/// Engine error types
#[derive(Debug)]
pub enum EngineError {
    // I/O or transaction failure after retries were exhausted
    Storage(String),

    // Lookup miss. Public lookups return `Option` instead; this variant is
    // used where a miss makes the requested operation impossible.
    NotFound(String),

    // Malformed input: empty content, out-of-range confidence,
    // mismatched embedding dimension, duplicate id
    RejectedInput { field: String, reason: String },

    // Embedding backend failed; callers fall back to lexical search
    EmbeddingUnavailable(String),

    // Too few fragments for an analysis
    InsufficientData { found: usize, required: usize },

    // Cooperative cancellation of a long-running operation
    Cancelled,

    Internal(anyhow::Error),
}

impl EngineError {
    /// Shorthand for [`EngineError::RejectedInput`]
    pub fn rejected(field: &str, reason: impl Into<String>) -> Self {
        Self::RejectedInput {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Get error code for client identification
    pub fn code(&self) -> &'static str {
        match self {
            Self::Storage(_) => "STORAGE_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::RejectedInput { .. } => "REJECTED_INPUT",
            Self::EmbeddingUnavailable(_) => "EMBEDDING_UNAVAILABLE",
            Self::InsufficientData { .. } => "INSUFFICIENT_DATA",
            Self::Cancelled => "CANCELLED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get detailed error message
    pub fn message(&self) -> String {
        match self {
            Self::Storage(msg) => format!("Storage error: {msg}"),
            Self::NotFound(what) => format!("Not found: {what}"),
            Self::RejectedInput { field, reason } => {
                format!("Rejected input for field '{field}': {reason}")
            }
            Self::EmbeddingUnavailable(msg) => format!("Embedding unavailable: {msg}"),
            Self::InsufficientData { found, required } => {
                format!("Insufficient data: {found} fragments (need {required})")
            }
            Self::Cancelled => "Operation cancelled".to_string(),
            Self::Internal(err) => format!("Internal error: {err}"),
        }
    }

    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::EmbeddingUnavailable(_))
    }

    /// Convert to structured error payload
    pub fn to_report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code().to_string(),
            message: self.message(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for EngineError {}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

/// Helper trait to convert validation errors
pub trait ValidationErrorExt<T> {
    fn map_validation_err(self, field: &str) -> Result<T>;
}

impl<T> ValidationErrorExt<T> for anyhow::Result<T> {
    fn map_validation_err(self, field: &str) -> Result<T> {
        self.map_err(|e| EngineError::RejectedInput {
            field: field.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Type alias for Results using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(EngineError::Storage("io".into()).code(), "STORAGE_ERROR");
        assert_eq!(
            EngineError::rejected("content", "empty").code(),
            "REJECTED_INPUT"
        );
        assert_eq!(EngineError::Cancelled.code(), "CANCELLED");
    }

    #[test]
    fn test_transient_classification() {
        assert!(EngineError::Storage("busy".into()).is_transient());
        assert!(!EngineError::rejected("confidence", "1.5").is_transient());
        assert!(!EngineError::InsufficientData {
            found: 1,
            required: 3
        }
        .is_transient());
    }

    #[test]
    fn test_insufficient_data_report() {
        let report = EngineError::InsufficientData {
            found: 1,
            required: 2,
        }
        .to_report();
        assert_eq!(report.code, "INSUFFICIENT_DATA");
        assert_eq!(report.message, "Insufficient data: 1 fragments (need 2)");
    }

    #[test]
    fn test_validation_mapping() {
        let res: anyhow::Result<()> = Err(anyhow::anyhow!("content cannot be empty"));
        let err = res.map_validation_err("content").unwrap_err();
        let report = err.to_report();
        assert_eq!(report.code, "REJECTED_INPUT");
        assert!(report.message.contains("content cannot be empty"));
    }
}
