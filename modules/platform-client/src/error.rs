use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlatformError>;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// HTTP 429. `retry_after_secs` is taken from the `Retry-After` header when present.
    #[error("Rate limited by platform (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl PlatformError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, PlatformError::RateLimited { .. })
    }

    /// Network failures and 5xx responses are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::Network(_) => true,
            PlatformError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        PlatformError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for PlatformError {
    fn from(err: serde_json::Error) -> Self {
        PlatformError::Parse(err.to_string())
    }
}
