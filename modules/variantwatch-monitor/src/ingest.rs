//! Comment ingestion: fetch a post's comments, keep only the ones never seen
//! before, queue each for intent analysis, and persist the ones queued.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use tracing::{info, warn};

use variantwatch_common::{Comment, IngestReport};
use variantwatch_store::CommentStore;

use crate::queue::{QueuedTask, TaskQueue};
use crate::rate_limiter::{retry_with, BackoffPolicy, RateLimiter};
use crate::traits::CommentSource;

/// Drop repeats within one batch. First occurrence wins; order is preserved.
pub fn dedupe_in_batch(comments: Vec<Comment>) -> Vec<Comment> {
    let mut seen = HashSet::with_capacity(comments.len());
    comments
        .into_iter()
        .filter(|c| seen.insert(c.comment_id.clone()))
        .collect()
}

pub struct IngestionPipeline {
    source: Arc<dyn CommentSource>,
    comments: Arc<dyn CommentStore>,
    queue: Arc<dyn TaskQueue>,
    limiter: RateLimiter,
    backoff: BackoffPolicy,
    transient: BackoffPolicy,
}

impl IngestionPipeline {
    pub fn new(
        source: Arc<dyn CommentSource>,
        comments: Arc<dyn CommentStore>,
        queue: Arc<dyn TaskQueue>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            source,
            comments,
            queue,
            limiter,
            backoff: BackoffPolicy::default(),
            transient: BackoffPolicy::transient(),
        }
    }

    /// The comments that are neither repeated earlier in the batch nor already
    /// stored. Issues one existence query for the whole batch, retried on failure.
    pub async fn deduplicate(&self, comments: Vec<Comment>) -> anyhow::Result<Vec<Comment>> {
        let batch = dedupe_in_batch(comments);
        if batch.is_empty() {
            return Ok(batch);
        }

        let ids: Vec<String> = batch.iter().map(|c| c.comment_id.clone()).collect();
        let store = &self.comments;
        let existing = retry_with(&self.transient, |_: &anyhow::Error| true, || {
            store.existing_ids(&ids)
        })
        .await?;

        Ok(batch
            .into_iter()
            .filter(|c| !existing.contains(&c.comment_id))
            .collect())
    }

    /// Persist in one bulk write, falling back to row-by-row inserts when the
    /// bulk write fails. Returns how many rows were written.
    pub async fn store(&self, comments: &[Comment], post_id: &str) -> usize {
        if comments.is_empty() {
            return 0;
        }

        match self.comments.insert_batch(comments).await {
            Ok(inserted) => inserted as usize,
            Err(e) => {
                warn!(error = %e, post_id, count = comments.len(), "Bulk insert failed, inserting individually");
                let mut stored = 0;
                for comment in comments {
                    match self.comments.insert_one(comment).await {
                        Ok(true) => stored += 1,
                        Ok(false) => {}
                        Err(e) => warn!(
                            error = %e,
                            post_id,
                            comment_id = %comment.comment_id,
                            "Skipping comment that failed to insert"
                        ),
                    }
                }
                stored
            }
        }
    }

    /// Queue one analysis task per comment, retrying each on failure. Returns
    /// the comments the queue accepted, in input order.
    pub async fn enqueue_for_analysis(&self, comments: &[Comment], post_id: &str) -> Vec<Comment> {
        let queue = &self.queue;
        let mut accepted = Vec::with_capacity(comments.len());
        for comment in comments {
            let task = QueuedTask::analyze_comment(comment, post_id);
            let result = retry_with(&self.transient, |_: &anyhow::Error| true, || {
                queue.enqueue(task.clone())
            })
            .await;
            match result {
                Ok(()) => accepted.push(comment.clone()),
                Err(e) => warn!(
                    error = %e,
                    post_id,
                    comment_id = %comment.comment_id,
                    "Failed to queue comment for analysis, leaving it for the next run"
                ),
            }
        }
        accepted
    }

    /// Run the whole pipeline for one post. Never fails; errors come back
    /// inside the report.
    pub async fn process(&self, post_id: &str) -> IngestReport {
        match self.run(post_id).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, post_id, "Comment ingestion failed");
                IngestReport::Error {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn run(&self, post_id: &str) -> anyhow::Result<IngestReport> {
        let source = &self.source;
        let raw = self
            .limiter
            .call_with_backoff(&self.backoff, move || source.get_comments(post_id))
            .await
            .map_err(|e| anyhow!("failed to fetch comments for post {post_id}: {e}"))?;
        let processed_count = raw.len();

        let received_at = Utc::now();
        let valid: Vec<Comment> = raw
            .into_iter()
            .filter_map(|r| match Comment::from_raw(r, post_id, received_at) {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!(error = %e, post_id, "Skipping malformed comment");
                    None
                }
            })
            .collect();

        let unique = self.deduplicate(valid).await?;
        // Only queued comments are stored; the rest stay unseen and are
        // picked up again by the next run.
        let queued = self.enqueue_for_analysis(&unique, post_id).await;
        let queued_count = queued.len();
        let stored_count = self.store(&queued, post_id).await;

        info!(
            post_id,
            processed_count,
            unique = unique.len(),
            queued_count,
            stored_count,
            "Comment ingestion complete"
        );
        Ok(IngestReport::Success {
            processed_count,
            queued_count,
            stored_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: &str) -> Comment {
        Comment {
            comment_id: id.to_string(),
            post_id: "p1".to_string(),
            text: format!("text {id}"),
            author: "a".to_string(),
            timestamp: Utc::now(),
        }
    }

    fn ids(comments: &[Comment]) -> Vec<&str> {
        comments.iter().map(|c| c.comment_id.as_str()).collect()
    }

    #[test]
    fn first_occurrence_wins_in_order() {
        let mut dup = comment("a");
        dup.text = "second copy".to_string();
        let out = dedupe_in_batch(vec![comment("c"), comment("a"), comment("b"), dup, comment("c")]);
        assert_eq!(ids(&out), ["c", "a", "b"]);
        assert_eq!(out[1].text, "text a");
    }

    #[test]
    fn dedupe_is_idempotent_over_concatenation() {
        let batch = vec![comment("x"), comment("y"), comment("x"), comment("z")];
        let once = dedupe_in_batch(batch.clone());
        let mut again = once.clone();
        again.extend(batch);
        assert_eq!(ids(&dedupe_in_batch(again)), ids(&once));
    }
}
