pub mod error;
pub mod types;

pub use error::{PlatformError, Result};
pub use types::{PlatformComment, PostMetrics};

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use types::ApiResponse;

pub struct PlatformClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl PlatformClient {
    pub fn new(base_url: impl Into<String>, token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Current engagement counters for a published post.
    pub async fn get_post_performance(&self, post_id: &str) -> Result<PostMetrics> {
        let url = format!("{}/posts/{}/metrics", self.base_url, post_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let metrics: PostMetrics = read_data(resp).await?;
        tracing::debug!(
            post_id,
            views = metrics.views,
            interactions = metrics.interactions,
            "Fetched post metrics"
        );
        Ok(metrics)
    }

    /// Delete a post. Returns false when the platform no longer knows the post.
    pub async fn delete_post(&self, post_id: &str) -> Result<bool> {
        let url = format!("{}/posts/{}", self.base_url, post_id);
        let resp = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            tracing::info!(post_id, "Deleted post");
            return Ok(true);
        }
        if status == StatusCode::NOT_FOUND {
            tracing::warn!(post_id, "Post already gone");
            return Ok(false);
        }
        Err(error_for(resp).await)
    }

    /// All comments currently visible on a post.
    pub async fn get_comments(&self, post_id: &str) -> Result<Vec<PlatformComment>> {
        let url = format!("{}/posts/{}/comments", self.base_url, post_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        // Elements are parsed one at a time; an unparseable record is skipped.
        let records: Vec<serde_json::Value> = read_data(resp).await?;
        let total = records.len();
        let comments: Vec<PlatformComment> = records
            .into_iter()
            .enumerate()
            .filter_map(|(index, record)| match serde_json::from_value(record) {
                Ok(comment) => Some(comment),
                Err(e) => {
                    tracing::warn!(post_id, index, error = %e, "Skipping unparseable comment");
                    None
                }
            })
            .collect();
        tracing::info!(
            post_id,
            count = comments.len(),
            skipped = total - comments.len(),
            "Fetched comments"
        );
        Ok(comments)
    }
}

async fn read_data<T: DeserializeOwned>(resp: Response) -> Result<T> {
    if !resp.status().is_success() {
        return Err(error_for(resp).await);
    }
    let body = resp.text().await?;
    let api_resp: ApiResponse<T> = serde_json::from_str(&body)?;
    Ok(api_resp.data)
}

async fn error_for(resp: Response) -> PlatformError {
    let status = resp.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        return PlatformError::RateLimited { retry_after_secs };
    }
    let body = resp.text().await.unwrap_or_default();
    PlatformError::Api {
        status: status.as_u16(),
        message: body,
    }
}
