//! `PlatformClient` as the metrics, comment, and deletion source.

use async_trait::async_trait;
use chrono::Utc;
use platform_client::{PlatformClient, PlatformComment, PlatformError};

use variantwatch_common::{RawComment, VariantPerformance};

use crate::traits::{CommentSource, MetricsSource, PostDeleter, SourceError};

impl From<PlatformError> for SourceError {
    fn from(err: PlatformError) -> Self {
        if err.is_rate_limited() {
            SourceError::RateLimited
        } else if err.is_transient() {
            SourceError::Transient(err.to_string())
        } else {
            SourceError::Failed(err.to_string())
        }
    }
}

fn raw_comment(c: PlatformComment) -> RawComment {
    RawComment {
        id: c.id,
        post_id: c.post_id,
        text: c.text,
        author: c.author,
        timestamp: c.timestamp,
    }
}

#[async_trait]
impl MetricsSource for PlatformClient {
    async fn get_post_performance(&self, post_id: &str) -> Result<VariantPerformance, SourceError> {
        let metrics = PlatformClient::get_post_performance(self, post_id).await?;
        Ok(VariantPerformance {
            views: metrics.views,
            total_interactions: metrics.interactions,
            engagement_rate: metrics.effective_engagement_rate(),
            last_updated: Utc::now(),
        })
    }
}

#[async_trait]
impl CommentSource for PlatformClient {
    async fn get_comments(&self, post_id: &str) -> Result<Vec<RawComment>, SourceError> {
        let comments = PlatformClient::get_comments(self, post_id).await?;
        Ok(comments.into_iter().map(raw_comment).collect())
    }
}

#[async_trait]
impl PostDeleter for PlatformClient {
    async fn delete_post(&self, post_id: &str) -> Result<bool, SourceError> {
        Ok(PlatformClient::delete_post(self, post_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_errors_map_to_source_errors() {
        assert_eq!(
            SourceError::from(PlatformError::RateLimited {
                retry_after_secs: Some(3)
            }),
            SourceError::RateLimited
        );
        assert!(SourceError::from(PlatformError::Network("reset".into())).is_transient());
        assert!(matches!(
            SourceError::from(PlatformError::Api {
                status: 403,
                message: "forbidden".into()
            }),
            SourceError::Failed(_)
        ));
    }
}
