//! services/client/src/error.rs
//!
//! Defines the error types for the coordination layer: the structured
//! `ServiceError` surfaced to callers and the top-level `ClientError`
//! for the binary.

use crate::config::ConfigError;
use mcq_core::ports::PortError;
use serde::{Deserialize, Serialize};

/// Error codes the UI layer branches on without string-matching.
pub const GENERATION_FAILED: &str = "GENERATION_FAILED";
pub const GENERATION_TIMEOUT: &str = "GENERATION_TIMEOUT";
pub const GENERATION_CANCELLED: &str = "GENERATION_CANCELLED";
pub const INVALID_FILE: &str = "INVALID_FILE";
pub const FILE_PROCESSING_FAILED: &str = "FILE_PROCESSING_FAILED";
pub const FILE_PROCESSING_TIMEOUT: &str = "FILE_PROCESSING_TIMEOUT";

/// The structured error every user-facing operation fails with.
///
/// Server-supplied structured errors pass through verbatim; unstructured
/// failures are wrapped under `GENERATION_FAILED` with the original error
/// attached as `details`.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{message} ({code})")]
pub struct ServiceError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ServiceError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(GENERATION_TIMEOUT, message)
    }

    pub fn generation_failed(details: impl Into<String>) -> Self {
        Self {
            code: GENERATION_FAILED.to_string(),
            message: "An error occurred while generating questions".to_string(),
            details: Some(serde_json::Value::String(details.into())),
        }
    }
}

impl From<PortError> for ServiceError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Api {
                code,
                message,
                details,
            } => Self {
                code,
                message,
                details,
            },
            PortError::Timeout => Self::timeout("The request timed out"),
            other => Self::generation_failed(other.to_string()),
        }
    }
}

/// The primary error type for the `client` binary.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// A structured failure from the coordination layer.
    #[error("Service Error: {0}")]
    Service(#[from] ServiceError),

    /// Represents an error from the underlying HTTP client library.
    #[error("HTTP Error: {0}")]
    Http(#[from] reqwest::Error),

    /// Represents a standard Input/Output error (e.g., reading a document).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_api_errors_pass_through_verbatim() {
        let err = ServiceError::from(PortError::Api {
            code: "QUOTA_EXCEEDED".to_string(),
            message: "Daily generation quota exhausted".to_string(),
            details: Some(serde_json::json!({ "limit": 20 })),
        });
        assert_eq!(err.code, "QUOTA_EXCEEDED");
        assert_eq!(err.message, "Daily generation quota exhausted");
        assert_eq!(err.details, Some(serde_json::json!({ "limit": 20 })));
    }

    #[test]
    fn unstructured_failures_wrap_as_generation_failed() {
        let err = ServiceError::from(PortError::Unexpected("connection reset".to_string()));
        assert_eq!(err.code, GENERATION_FAILED);
        assert_eq!(
            err.details,
            Some(serde_json::Value::String(
                "An unexpected error occurred: connection reset".to_string()
            ))
        );
    }
}
