use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::traits::VariantRotation;

/// Tells the content service to stop serving a variant, via an HTTP webhook.
pub struct RotationWebhook {
    webhook_url: String,
    http: reqwest::Client,
}

impl RotationWebhook {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl VariantRotation for RotationWebhook {
    async fn remove_from_rotation(&self, variant_id: &str) -> anyhow::Result<()> {
        let payload = json!({
            "variant_id": variant_id,
            "action": "remove_from_rotation",
        });

        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Rotation webhook returned non-success");
            anyhow::bail!("Rotation webhook returned {status}");
        }

        Ok(())
    }
}

/// Rotation backend for deployments without a rotation service.
pub struct NoopRotation;

#[async_trait]
impl VariantRotation for NoopRotation {
    async fn remove_from_rotation(&self, _variant_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The webhook if a URL is configured, otherwise a no-op.
pub fn rotation_from_config(webhook_url: Option<String>) -> Arc<dyn VariantRotation> {
    match webhook_url {
        Some(url) => Arc::new(RotationWebhook::new(url)),
        None => Arc::new(NoopRotation),
    }
}
