//! Monitoring session persistence (`variant_monitoring`).
//!
//! The partial unique index on `variant_id WHERE is_active` enforces one
//! active session per variant. Terminal transitions lock the active row and
//! write status + final snapshot in the same transaction, so a session is never
//! observed inactive without its final metrics.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use variantwatch_common::{FinalSnapshot, MonitoringSession, SessionOutcome, SessionStatus};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new active session. Returns false if the variant already has one.
    async fn create_if_absent(&self, session: &MonitoringSession) -> Result<bool>;

    /// The active session for a variant, or its most recent terminal one.
    async fn get(&self, variant_id: &str) -> Result<Option<MonitoringSession>>;

    async fn list_active(&self) -> Result<Vec<MonitoringSession>>;

    /// Record the latest observation. Ignored once the session is terminal.
    async fn record_observation(
        &self,
        variant_id: &str,
        observation: &FinalSnapshot,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Move the active session to a terminal state. Returns the finalized
    /// session, or None if there was no active session to finalize.
    async fn finalize(
        &self,
        variant_id: &str,
        outcome: &SessionOutcome,
    ) -> Result<Option<MonitoringSession>>;
}

const SESSION_COLUMNS: &str = "id, variant_id, persona_id, post_id, expected_engagement_rate, \
     started_at, ended_at, is_active, was_killed, kill_reason, end_reason, \
     final_engagement_rate, final_interaction_count, final_view_count, \
     last_engagement_rate, last_interaction_count, last_view_count, last_checked_at, checks_run";

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: i64,
    variant_id: String,
    persona_id: String,
    post_id: String,
    expected_engagement_rate: f64,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    is_active: bool,
    was_killed: bool,
    kill_reason: Option<String>,
    end_reason: Option<String>,
    final_engagement_rate: Option<f64>,
    final_interaction_count: Option<i64>,
    final_view_count: Option<i64>,
    last_engagement_rate: Option<f64>,
    last_interaction_count: Option<i64>,
    last_view_count: Option<i64>,
    last_checked_at: Option<DateTime<Utc>>,
    checks_run: i32,
}

fn snapshot(rate: Option<f64>, interactions: Option<i64>, views: Option<i64>) -> Option<FinalSnapshot> {
    Some(FinalSnapshot {
        engagement_rate: rate?,
        interaction_count: interactions?,
        view_count: views?,
    })
}

impl From<SessionRow> for MonitoringSession {
    fn from(row: SessionRow) -> Self {
        let status = if row.is_active {
            SessionStatus::Active
        } else {
            SessionStatus::from_end_reason(row.end_reason.as_deref())
        };
        Self {
            variant_id: row.variant_id,
            persona_id: row.persona_id,
            post_id: row.post_id,
            expected_engagement_rate: row.expected_engagement_rate,
            started_at: row.started_at,
            ended_at: row.ended_at,
            is_active: row.is_active,
            was_killed: row.was_killed,
            kill_reason: row.kill_reason,
            status,
            final_snapshot: snapshot(
                row.final_engagement_rate,
                row.final_interaction_count,
                row.final_view_count,
            ),
            last_observation: snapshot(
                row.last_engagement_rate,
                row.last_interaction_count,
                row.last_view_count,
            ),
            last_checked_at: row.last_checked_at,
            checks_run: row.checks_run,
        }
    }
}

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create_if_absent(&self, session: &MonitoringSession) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO variant_monitoring
                (variant_id, persona_id, post_id, expected_engagement_rate, started_at, is_active)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            ON CONFLICT (variant_id) WHERE is_active DO NOTHING
            "#,
        )
        .bind(&session.variant_id)
        .bind(&session.persona_id)
        .bind(&session.post_id)
        .bind(session.expected_engagement_rate)
        .bind(session.started_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, variant_id: &str) -> Result<Option<MonitoringSession>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM variant_monitoring
             WHERE variant_id = $1
             ORDER BY is_active DESC, id DESC
             LIMIT 1"
        );
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(variant_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn list_active(&self) -> Result<Vec<MonitoringSession>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM variant_monitoring
             WHERE is_active
             ORDER BY started_at ASC"
        );
        let rows = sqlx::query_as::<_, SessionRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn record_observation(
        &self,
        variant_id: &str,
        observation: &FinalSnapshot,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE variant_monitoring
            SET last_engagement_rate = $2,
                last_interaction_count = $3,
                last_view_count = $4,
                last_checked_at = $5,
                checks_run = checks_run + 1
            WHERE variant_id = $1 AND is_active
            "#,
        )
        .bind(variant_id)
        .bind(observation.engagement_rate)
        .bind(observation.interaction_count)
        .bind(observation.view_count)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn finalize(
        &self,
        variant_id: &str,
        outcome: &SessionOutcome,
    ) -> Result<Option<MonitoringSession>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM variant_monitoring
             WHERE variant_id = $1 AND is_active
             FOR UPDATE"
        );
        let Some(row) = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(variant_id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        let id = row.id;
        let mut session = MonitoringSession::from(row);
        session.apply_outcome(outcome);
        let snap = session.final_snapshot;

        sqlx::query(
            r#"
            UPDATE variant_monitoring
            SET is_active = FALSE,
                ended_at = $2,
                was_killed = $3,
                kill_reason = $4,
                end_reason = $5,
                final_engagement_rate = $6,
                final_interaction_count = $7,
                final_view_count = $8
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(session.ended_at)
        .bind(session.was_killed)
        .bind(&session.kill_reason)
        .bind(session.status.end_reason())
        .bind(snap.map(|s| s.engagement_rate))
        .bind(snap.map(|s| s.interaction_count))
        .bind(snap.map(|s| s.view_count))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            variant_id,
            status = %session.status,
            "Monitoring session finalized"
        );
        Ok(Some(session))
    }
}
