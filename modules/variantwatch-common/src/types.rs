use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::VariantWatchError;

// --- Comments ---

/// A comment as received from the comment source. Nothing is guaranteed yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawComment {
    pub id: Option<String>,
    pub post_id: Option<String>,
    pub text: Option<String>,
    pub author: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A validated, externally-sourced comment. Never mutated once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// External comment ID; unique across all persisted comments.
    pub comment_id: String,
    pub post_id: String,
    pub text: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

impl Comment {
    /// Validate a raw record. Records without an ID or text are data errors.
    /// A missing post ID falls back to the post being ingested.
    pub fn from_raw(
        raw: RawComment,
        post_id: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Self, VariantWatchError> {
        let comment_id = raw
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| VariantWatchError::Validation("comment has no id".into()))?;
        let text = raw.text.ok_or_else(|| {
            VariantWatchError::Validation(format!("comment {comment_id} has no text"))
        })?;

        Ok(Self {
            comment_id,
            post_id: raw
                .post_id
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| post_id.to_string()),
            text,
            author: raw
                .author
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| "unknown".to_string()),
            timestamp: raw.timestamp.unwrap_or(received_at),
        })
    }
}

/// Outcome of one ingestion run. Serialized with a `status` tag so callers in
/// webhook contexts can always respond with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestReport {
    Success {
        processed_count: usize,
        queued_count: usize,
        stored_count: usize,
    },
    Error {
        error: String,
    },
}

impl IngestReport {
    pub fn is_success(&self) -> bool {
        matches!(self, IngestReport::Success { .. })
    }
}

// --- Monitoring ---

/// Lifecycle of a monitoring session. Everything but `Active` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Killed,
    TimedOut,
    ManuallyStopped,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }

    /// Value of the `end_reason` column. `None` while active.
    pub fn end_reason(&self) -> Option<&'static str> {
        match self {
            Self::Active => None,
            Self::Killed => Some("killed"),
            Self::TimedOut => Some("timed_out"),
            Self::ManuallyStopped => Some("manually_stopped"),
        }
    }

    pub fn from_end_reason(reason: Option<&str>) -> Self {
        match reason {
            None => Self::Active,
            Some("killed") => Self::Killed,
            Some("timed_out") => Self::TimedOut,
            Some(_) => Self::ManuallyStopped,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.end_reason().unwrap_or("active"))
    }
}

/// Engagement counters captured at the end of monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinalSnapshot {
    pub engagement_rate: f64,
    pub interaction_count: i64,
    pub view_count: i64,
}

impl From<&VariantPerformance> for FinalSnapshot {
    fn from(p: &VariantPerformance) -> Self {
        Self {
            engagement_rate: p.engagement_rate,
            interaction_count: p.total_interactions,
            view_count: p.views,
        }
    }
}

/// One variant under evaluation. At most one active session per variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSession {
    pub variant_id: String,
    pub persona_id: String,
    pub post_id: String,
    pub expected_engagement_rate: f64,
    /// Post time. The timeout window is anchored here, not at first observation.
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub was_killed: bool,
    pub kill_reason: Option<String>,
    pub status: SessionStatus,
    pub final_snapshot: Option<FinalSnapshot>,
    pub last_observation: Option<FinalSnapshot>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub checks_run: i32,
}

impl MonitoringSession {
    pub fn new(
        variant_id: &str,
        persona_id: &str,
        post_id: &str,
        expected_engagement_rate: f64,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            variant_id: variant_id.to_string(),
            persona_id: persona_id.to_string(),
            post_id: post_id.to_string(),
            expected_engagement_rate,
            started_at,
            ended_at: None,
            is_active: true,
            was_killed: false,
            kill_reason: None,
            status: SessionStatus::Active,
            final_snapshot: None,
            last_observation: None,
            last_checked_at: None,
            checks_run: 0,
        }
    }

    /// Apply a terminal outcome in place. No-op if the session is already terminal.
    pub fn apply_outcome(&mut self, outcome: &SessionOutcome) -> bool {
        if !self.is_active {
            return false;
        }
        self.is_active = false;
        self.status = outcome.status;
        self.ended_at = Some(outcome.ended_at);
        self.was_killed = outcome.status == SessionStatus::Killed;
        self.kill_reason = outcome.kill_reason.clone();
        self.final_snapshot = outcome.final_snapshot.or(self.last_observation);
        true
    }
}

/// The terminal transition written in one commit: status + final snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub status: SessionStatus,
    pub ended_at: DateTime<Utc>,
    pub kill_reason: Option<String>,
    /// When absent, the last recorded observation becomes the final snapshot.
    pub final_snapshot: Option<FinalSnapshot>,
}

impl SessionOutcome {
    pub fn killed(reason: &str, snapshot: FinalSnapshot, at: DateTime<Utc>) -> Self {
        Self {
            status: SessionStatus::Killed,
            ended_at: at,
            kill_reason: Some(reason.to_string()),
            final_snapshot: Some(snapshot),
        }
    }

    pub fn timed_out(at: DateTime<Utc>) -> Self {
        Self {
            status: SessionStatus::TimedOut,
            ended_at: at,
            kill_reason: None,
            final_snapshot: None,
        }
    }

    pub fn manually_stopped(at: DateTime<Utc>) -> Self {
        Self {
            status: SessionStatus::ManuallyStopped,
            ended_at: at,
            kill_reason: None,
            final_snapshot: None,
        }
    }
}

/// Point-in-time engagement for a variant. Passed into evaluation, never stored directly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariantPerformance {
    pub views: i64,
    pub total_interactions: i64,
    pub engagement_rate: f64,
    pub last_updated: DateTime<Utc>,
}

/// A decision to kill a variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillDecision {
    pub reason: String,
    pub engagement_rate: f64,
    pub expected_rate: f64,
}

/// Where a session stands relative to its fixed monitoring window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeoutStatus {
    pub timed_out: bool,
    pub elapsed_secs: i64,
    pub remaining_secs: i64,
}
