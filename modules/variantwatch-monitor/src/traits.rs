//! Collaborator seams. The platform client implements the first three;
//! tests substitute fakes.

use async_trait::async_trait;
use thiserror::Error;

use variantwatch_common::{RawComment, VariantPerformance};

use crate::rate_limiter::{CallError, RateLimitSignal};

/// Failure talking to an external source.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SourceError {
    /// The source asked us to slow down (HTTP 429).
    #[error("rate limited")]
    RateLimited,

    /// Network trouble or a 5xx. Worth another attempt.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("request failed: {0}")]
    Failed(String),
}

impl RateLimitSignal for SourceError {
    fn is_rate_limited(&self) -> bool {
        matches!(self, SourceError::RateLimited)
    }
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

/// True when a rate-limited call failed for a reason worth retrying at the call site.
pub fn is_transient_call(err: &CallError<SourceError>) -> bool {
    matches!(err, CallError::Call(e) if e.is_transient())
}

#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn get_post_performance(&self, post_id: &str) -> Result<VariantPerformance, SourceError>;
}

#[async_trait]
pub trait CommentSource: Send + Sync {
    async fn get_comments(&self, post_id: &str) -> Result<Vec<RawComment>, SourceError>;
}

#[async_trait]
pub trait PostDeleter: Send + Sync {
    /// Returns false if the post no longer exists.
    async fn delete_post(&self, post_id: &str) -> Result<bool, SourceError>;
}

/// Controls which variants are served.
#[async_trait]
pub trait VariantRotation: Send + Sync {
    async fn remove_from_rotation(&self, variant_id: &str) -> anyhow::Result<()>;
}
