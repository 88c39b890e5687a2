//! # Domain Errors
//!
//! Typed failures crossing the collaborator boundaries.

use thiserror::Error;

/// Failure of a single generation call.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation timed out after {0}s")]
    Timeout(u64),
    /// The provider answered with an error. `raw` is what it said.
    #[error("{raw}")]
    Provider {
        raw: String,
        error_type: Option<String>,
    },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected provider output: {0}")]
    InvalidOutput(String),
}

impl GenerationError {
    /// Text used for failure categorization.
    pub fn raw(&self) -> String {
        match self {
            GenerationError::Provider { raw, .. } => raw.clone(),
            other => other.to_string(),
        }
    }

    pub fn error_type(&self) -> &str {
        match self {
            GenerationError::Timeout(_) => "Timeout",
            GenerationError::Provider { error_type, .. } => {
                error_type.as_deref().unwrap_or("ProviderError")
            }
            GenerationError::Transport(_) => "TransportError",
            GenerationError::InvalidOutput(_) => "InvalidOutput",
        }
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GenerationError::Provider {
                raw: format!("Request timed out: {e}"),
                error_type: Some("Timeout".to_string()),
            }
        } else {
            GenerationError::Transport(e.to_string())
        }
    }
}

/// Failure talking to the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed document '{id}': {reason}")]
    Malformed { id: String, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}
