//! Comment persistence. Existence checks are one bulk query per batch.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use variantwatch_common::Comment;

#[async_trait]
pub trait CommentStore: Send + Sync {
    /// Which of `ids` are already persisted. Must issue a single query regardless of `ids.len()`.
    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>>;

    /// Insert every comment in one write. Conflicting IDs are skipped.
    /// Returns the number of rows actually inserted.
    async fn insert_batch(&self, comments: &[Comment]) -> Result<u64>;

    /// Insert a single comment, skipping on conflict. Returns true if a row was written.
    async fn insert_one(&self, comment: &Comment) -> Result<bool>;
}

#[derive(Clone)]
pub struct PgCommentStore {
    pool: PgPool,
}

impl PgCommentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommentStore for PgCommentStore {
    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let rows = sqlx::query_scalar::<_, String>(
            "SELECT comment_id FROM comments WHERE comment_id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn insert_batch(&self, comments: &[Comment]) -> Result<u64> {
        if comments.is_empty() {
            return Ok(0);
        }

        let mut ids = Vec::with_capacity(comments.len());
        let mut post_ids = Vec::with_capacity(comments.len());
        let mut texts = Vec::with_capacity(comments.len());
        let mut authors = Vec::with_capacity(comments.len());
        let mut timestamps: Vec<DateTime<Utc>> = Vec::with_capacity(comments.len());
        for c in comments {
            ids.push(c.comment_id.as_str());
            post_ids.push(c.post_id.as_str());
            texts.push(c.text.as_str());
            authors.push(c.author.as_str());
            timestamps.push(c.timestamp);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO comments (comment_id, post_id, text, author, timestamp)
            SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::timestamptz[])
            ON CONFLICT (comment_id) DO NOTHING
            "#,
        )
        .bind(&ids)
        .bind(&post_ids)
        .bind(&texts)
        .bind(&authors)
        .bind(&timestamps)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_one(&self, comment: &Comment) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO comments (comment_id, post_id, text, author, timestamp)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (comment_id) DO NOTHING
            "#,
        )
        .bind(&comment.comment_id)
        .bind(&comment.post_id)
        .bind(&comment.text)
        .bind(&comment.author)
        .bind(comment.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
