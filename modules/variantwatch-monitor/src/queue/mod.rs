//! Background task queue handoff. Ingested comments go onto the queue for
//! intent analysis; the queue's consumers live elsewhere.

mod memory;
mod noop;
mod pg;

pub use memory::MemoryTaskQueue;
pub use noop::NoopTaskQueue;
pub use pg::PgTaskQueue;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use variantwatch_common::Comment;

/// Task name consumers dispatch on for comment intent analysis.
pub const ANALYZE_COMMENT_TASK: &str = "analyze_comment_intent";

/// Queue priority. Higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPriority {
    Analysis = 3,
    Generation = 9,
}

impl TaskPriority {
    pub fn value(self) -> i16 {
        self as i16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    /// Three retries, backoff capped at ten minutes.
    pub fn analysis() -> Self {
        Self {
            max_retries: 3,
            backoff_max: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedTask {
    pub id: Uuid,
    pub task_name: String,
    pub args: serde_json::Value,
    pub priority: TaskPriority,
    pub retry: RetryPolicy,
}

impl QueuedTask {
    /// An intent-analysis task for one comment. Args are `[comment, post_id]`.
    pub fn analyze_comment(comment: &Comment, post_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_name: ANALYZE_COMMENT_TASK.to_string(),
            args: json!([comment, post_id]),
            priority: TaskPriority::Analysis,
            retry: RetryPolicy::analysis(),
        }
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: QueuedTask) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn analysis_runs_below_generation() {
        assert!(TaskPriority::Analysis < TaskPriority::Generation);
        assert_eq!(TaskPriority::Analysis.value(), 3);
        assert_eq!(TaskPriority::Generation.value(), 9);
    }

    #[test]
    fn analyze_comment_carries_comment_and_post() {
        let comment = Comment {
            comment_id: "c1".into(),
            post_id: "p1".into(),
            text: "love it".into(),
            author: "ann".into(),
            timestamp: Utc::now(),
        };
        let task = QueuedTask::analyze_comment(&comment, "p1");
        assert_eq!(task.task_name, ANALYZE_COMMENT_TASK);
        assert_eq!(task.args[0]["comment_id"], "c1");
        assert_eq!(task.args[1], "p1");
        assert_eq!(task.retry.max_retries, 3);
    }
}
