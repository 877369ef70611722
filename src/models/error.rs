//! Error types for rankwise.
//!
//! Epistemic taxonomy:
//! - I^B materialized, local: transport and parse failures. Absorbed by the
//!   stage that produced them, replaced by a stage-specific default.
//! - I^B materialized, fatal: the service is down or the run was cancelled.
//!   These are the only errors a run surfaces to its caller.
//! - K_i violated: internal invariant violations (bugs)

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for rankwise.
#[derive(Debug, Error)]
pub enum RankError {
    // ═══════════════════════════════════════════════════════════════════
    // TRANSPORT — network/protocol failure, recovered per document
    // ═══════════════════════════════════════════════════════════════════
    #[error("Model API error: {0}")]
    Api(#[from] ApiError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    // ═══════════════════════════════════════════════════════════════════
    // PARSE — non-conforming response body, recovered via fallback
    // ═══════════════════════════════════════════════════════════════════
    #[error("Parse error: {0}")]
    Parse(String),

    // ═══════════════════════════════════════════════════════════════════
    // FATAL — stops the run before (or while) work is scheduled
    // ═══════════════════════════════════════════════════════════════════
    #[error("Service unavailable ({endpoint}): {reason}")]
    ServiceUnavailable { endpoint: String, reason: String },

    #[error("Run cancelled")]
    Cancelled,

    // ═══════════════════════════════════════════════════════════════════
    // LOCAL — configuration, files, invariants
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Model endpoint specific errors.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Rate limited (status 429): {0}")]
    RateLimited(String),

    #[error("API error (status {status}): {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RankError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Errors that must stop the run instead of falling back to a default.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ServiceUnavailable { .. } | Self::Cancelled)
    }

    /// Check if this error is worth another attempt at document granularity.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::Network(_)
                | Self::Parse(_)
                | Self::Api(ApiError::RateLimited(_))
                | Self::Api(ApiError::Status { .. })
                | Self::Api(ApiError::InvalidResponse(_))
        )
    }
}

/// Result type alias for rankwise.
pub type Result<T> = std::result::Result<T, RankError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_service_unavailable_and_cancel_are_fatal() {
        let down = RankError::ServiceUnavailable {
            endpoint: "primary".to_string(),
            reason: "HTTP 503".to_string(),
        };
        assert!(down.is_fatal());
        assert!(RankError::Cancelled.is_fatal());
        assert!(!RankError::Parse("bad json".to_string()).is_fatal());
        assert!(!RankError::Timeout(Duration::from_secs(5)).is_fatal());
        assert!(!RankError::Api(ApiError::AuthenticationFailed).is_fatal());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(RankError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(RankError::Api(ApiError::RateLimited("slow down".into())).is_retryable());
        assert!(!RankError::Api(ApiError::AuthenticationFailed).is_retryable());
        assert!(!RankError::Cancelled.is_retryable());
    }
}
