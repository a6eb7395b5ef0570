//! Side effects of a kill: pull the variant from rotation, then try to delete
//! the post. The kill itself is already final, so nothing here propagates.

use std::sync::Arc;

use tracing::{info, warn};

use variantwatch_common::MonitoringSession;

use crate::rate_limiter::{BackoffPolicy, RateLimiter};
use crate::traits::{PostDeleter, VariantRotation};

pub struct KillCleanup {
    rotation: Arc<dyn VariantRotation>,
    deleter: Arc<dyn PostDeleter>,
    limiter: RateLimiter,
    backoff: BackoffPolicy,
}

impl KillCleanup {
    pub fn new(
        rotation: Arc<dyn VariantRotation>,
        deleter: Arc<dyn PostDeleter>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            rotation,
            deleter,
            limiter,
            backoff: BackoffPolicy::default(),
        }
    }

    pub async fn run(&self, session: &MonitoringSession) {
        let variant_id = session.variant_id.as_str();

        if let Err(e) = self.rotation.remove_from_rotation(variant_id).await {
            warn!(error = %e, variant_id, "Failed to remove variant from rotation");
        }

        let deleter = &self.deleter;
        let post_id = session.post_id.as_str();
        match self
            .limiter
            .call_with_backoff(&self.backoff, move || deleter.delete_post(post_id))
            .await
        {
            Ok(true) => info!(variant_id, post_id, "Deleted killed variant's post"),
            Ok(false) => info!(variant_id, post_id, "Post already gone"),
            Err(e) => warn!(error = %e, variant_id, post_id, "Failed to delete post"),
        }
    }
}
