//! Error types for the hydration engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a hydration run or a persistence step.
///
/// Per-ID and per-batch problems never surface here; they are demoted to
/// [`FetchOutcome::Failed`](crate::tweet::FetchOutcome) by the hydration client.
#[derive(Debug, Error)]
pub enum HydrateError {
    /// A required credential is missing from the environment.
    #[error("{0} environment variable not set")]
    MissingCredential(&'static str),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The input folder holds no export files for the selected categories.
    #[error("No JSONL export files found in {}", .0.display())]
    NoInputs(PathBuf),

    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors from a single batch lookup request.
#[derive(Debug, Error)]
pub enum LookupError {
    /// Transport failure (connect, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API signalled a rate limit (HTTP 429).
    #[error("Rate limited by lookup API")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The API rejected the request.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The response body could not be understood.
    #[error("Malformed API response: {0}")]
    Malformed(String),
}

impl LookupError {
    /// Whether the same batch may be retried after a backoff.
    ///
    /// Rate limits, transport failures, server errors and malformed bodies are
    /// transient; any other API rejection (bad key, bad request) is not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::RateLimited { .. } | Self::Malformed(_) => true,
            Self::Api { status, .. } => *status >= 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LookupError::RateLimited {
            retry_after_secs: None
        }
        .is_retryable());
        assert!(LookupError::Malformed("eof".to_string()).is_retryable());
        assert!(LookupError::Api {
            status: 503,
            message: "unavailable".to_string()
        }
        .is_retryable());
        assert!(!LookupError::Api {
            status: 401,
            message: "bad key".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_no_inputs_message() {
        let err = HydrateError::NoInputs(PathBuf::from("/tmp/export"));
        assert_eq!(
            err.to_string(),
            "No JSONL export files found in /tmp/export"
        );
    }
}
