use async_trait::async_trait;

use super::{QueuedTask, TaskQueue};

/// Drops every task.
pub struct NoopTaskQueue;

#[async_trait]
impl TaskQueue for NoopTaskQueue {
    async fn enqueue(&self, _task: QueuedTask) -> anyhow::Result<()> {
        Ok(())
    }
}
