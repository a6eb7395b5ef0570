use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Wrapper for platform API responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

/// Engagement counters for a single published post.
#[derive(Debug, Clone, Deserialize)]
pub struct PostMetrics {
    #[serde(default)]
    pub views: i64,
    #[serde(default, alias = "interactionCount")]
    pub interactions: i64,
    #[serde(default, alias = "engagementRate")]
    pub engagement_rate: Option<f64>,
}

impl PostMetrics {
    /// The platform's own rate when it reports one, otherwise interactions / views.
    pub fn effective_engagement_rate(&self) -> f64 {
        match self.engagement_rate {
            Some(rate) => rate,
            None if self.views > 0 => self.interactions as f64 / self.views as f64,
            None => 0.0,
        }
    }
}

/// A comment as the platform returns it. Every field is optional on the wire;
/// validation happens downstream.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformComment {
    pub id: Option<String>,
    #[serde(alias = "postId")]
    pub post_id: Option<String>,
    pub text: Option<String>,
    #[serde(alias = "username")]
    pub author: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}
