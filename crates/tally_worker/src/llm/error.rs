//! LLM error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while calling the model
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM features are disabled (set [llm] provider in config.toml)")]
    Disabled,

    #[error("Unknown LLM provider: '{0}'. Supported: openai, disabled")]
    UnknownProvider(String),

    #[error("API key not set: export {0}")]
    MissingApiKey(String),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Transient failures a later explicit retry may get past.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } | LlmError::Network(_) | LlmError::Timeout(_) => true,
            LlmError::ApiError { status, .. } => *status >= 500,
            LlmError::Disabled
            | LlmError::UnknownProvider(_)
            | LlmError::MissingApiKey(_)
            | LlmError::InvalidResponse(_)
            | LlmError::Json(_) => false,
        }
    }
}
