//! Error types for the huddle domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all huddle operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Provider overloaded (status: {status_code})")]
    Overloaded { status_code: u16 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Credential refresh failed: {0}")]
    CredentialRefresh(String),
}

impl ProviderError {
    /// Map an HTTP status from a backend into the matching error variant.
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        match status_code {
            429 => Self::RateLimited { retry_after_secs: 5 },
            503 | 529 => Self::Overloaded { status_code },
            401 | 403 => Self::AuthenticationFailed(message.into()),
            _ => Self::ApiError {
                status_code,
                message: message.into(),
            },
        }
    }

    /// Whether the fallback chain should move on to the next entry.
    ///
    /// Only rate-limit/overload signals, transport-level failures and an
    /// unusable credential qualify. Every other status is returned to the
    /// caller untouched.
    pub fn triggers_fallback(&self) -> bool {
        match self {
            Self::RateLimited { .. }
            | Self::Overloaded { .. }
            | Self::StreamInterrupted(_)
            | Self::NotConfigured(_)
            | Self::Timeout(_)
            | Self::Network(_)
            | Self::CredentialRefresh(_) => true,
            Self::ApiError { status_code, .. } => matches!(status_code, 429 | 503),
            Self::AuthenticationFailed(_) | Self::ModelNotFound(_) => false,
        }
    }

    /// The HTTP status behind this error, when there was one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ApiError { status_code, .. } | Self::Overloaded { status_code } => {
                Some(*status_code)
            }
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),
}
