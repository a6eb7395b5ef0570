use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;

use super::{QueuedTask, TaskQueue};

/// Writes tasks to the `task_queue` table and pokes listeners.
#[derive(Clone)]
pub struct PgTaskQueue {
    pool: PgPool,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn enqueue(&self, task: QueuedTask) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_queue
                (id, task_name, args, priority, max_retries, retry_backoff_max_secs)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(task.id)
        .bind(&task.task_name)
        .bind(&task.args)
        .bind(task.priority.value())
        .bind(task.retry.max_retries as i32)
        .bind(task.retry.backoff_max.as_secs() as i32)
        .execute(&self.pool)
        .await?;

        notify(&self.pool, &task).await;
        Ok(())
    }
}

async fn notify(pool: &PgPool, task: &QueuedTask) {
    let result = sqlx::query("SELECT pg_notify('task_queue', $1::text)")
        .bind(task.id.to_string())
        .execute(pool)
        .await;

    if let Err(e) = result {
        warn!(error = %e, task_id = %task.id, "PG NOTIFY failed (non-fatal)");
    }
}
