//! Early-kill decisions for monitored variants.
//!
//! A session stays `Active` until it is killed for underperforming, its
//! ten-minute window closes, or an operator stops it. The store's `finalize`
//! is the only terminal transition; the first caller wins and later ones are no-ops.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use variantwatch_common::{
    FinalSnapshot, KillDecision, MonitoringSession, SessionOutcome, TimeoutStatus,
    VariantPerformance,
};
use variantwatch_store::SessionStore;

use crate::cleanup::KillCleanup;
use crate::clock::Clock;

/// Length of the monitoring window, anchored at post time.
pub const MONITORING_WINDOW_SECS: i64 = 600;

/// Below this many interactions the sample is too small to judge.
pub const MIN_INTERACTIONS: i64 = 10;

pub const KILL_THRESHOLD_RATIO: f64 = 0.5;

pub const KILL_REASON: &str = "Below 50% of expected engagement rate";

/// Kill if the sample is large enough and engagement is strictly below half of expectation.
pub fn kill_decision(expected_rate: f64, performance: &VariantPerformance) -> Option<KillDecision> {
    if performance.total_interactions < MIN_INTERACTIONS {
        return None;
    }
    if performance.engagement_rate < KILL_THRESHOLD_RATIO * expected_rate {
        return Some(KillDecision {
            reason: KILL_REASON.to_string(),
            engagement_rate: performance.engagement_rate,
            expected_rate,
        });
    }
    None
}

/// Elapsed time is clamped at zero, so a post timestamp in the future never times out early.
pub fn timeout_status(started_at: DateTime<Utc>, now: DateTime<Utc>) -> TimeoutStatus {
    let elapsed_secs = (now - started_at).num_seconds().max(0);
    TimeoutStatus {
        timed_out: elapsed_secs > MONITORING_WINDOW_SECS,
        elapsed_secs,
        remaining_secs: (MONITORING_WINDOW_SECS - elapsed_secs).max(0),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartMonitoring {
    pub variant_id: String,
    pub persona_id: String,
    pub post_id: String,
    pub expected_engagement_rate: f64,
    /// When the post went live. Defaults to now.
    #[serde(default)]
    pub post_timestamp: Option<DateTime<Utc>>,
}

impl StartMonitoring {
    fn validate(&self) -> Result<(), MonitorError> {
        for (field, value) in [
            ("variant_id", &self.variant_id),
            ("persona_id", &self.persona_id),
            ("post_id", &self.post_id),
        ] {
            if value.trim().is_empty() {
                return Err(MonitorError::InvalidRequest(format!("{field} is required")));
            }
        }
        let rate = self.expected_engagement_rate;
        if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
            return Err(MonitorError::InvalidRequest(format!(
                "expected_engagement_rate must be between 0 and 1, got {rate}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("variant {0} is already being monitored")]
    AlreadyMonitoring(String),

    #[error("no monitoring session for variant {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

pub struct EarlyKillMonitor {
    sessions: Arc<dyn SessionStore>,
    cleanup: KillCleanup,
    clock: Arc<dyn Clock>,
}

impl EarlyKillMonitor {
    pub fn new(sessions: Arc<dyn SessionStore>, cleanup: KillCleanup, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions,
            cleanup,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn start_monitoring(
        &self,
        request: StartMonitoring,
    ) -> Result<MonitoringSession, MonitorError> {
        request.validate()?;

        let started_at = request.post_timestamp.unwrap_or_else(|| self.clock.now());
        let session = MonitoringSession::new(
            &request.variant_id,
            &request.persona_id,
            &request.post_id,
            request.expected_engagement_rate,
            started_at,
        );

        if !self.sessions.create_if_absent(&session).await? {
            return Err(MonitorError::AlreadyMonitoring(request.variant_id));
        }

        info!(
            variant_id = %session.variant_id,
            post_id = %session.post_id,
            expected_rate = session.expected_engagement_rate,
            "Started monitoring"
        );
        Ok(session)
    }

    /// Record an observation and decide. `None` means keep monitoring, or that
    /// the session is no longer active.
    pub async fn evaluate_performance(
        &self,
        variant_id: &str,
        performance: &VariantPerformance,
    ) -> Result<Option<KillDecision>, MonitorError> {
        let Some(session) = self.sessions.get(variant_id).await? else {
            return Err(MonitorError::NotFound(variant_id.to_string()));
        };
        if !session.is_active {
            debug!(variant_id, status = %session.status, "Ignoring evaluation of terminal session");
            return Ok(None);
        }

        let recorded = self
            .sessions
            .record_observation(variant_id, &FinalSnapshot::from(performance), self.clock.now())
            .await?;
        if !recorded {
            return Ok(None);
        }

        let decision = kill_decision(session.expected_engagement_rate, performance);
        debug!(
            variant_id,
            engagement_rate = performance.engagement_rate,
            interactions = performance.total_interactions,
            kill = decision.is_some(),
            "Evaluated performance"
        );
        Ok(decision)
    }

    /// Times the session out if its window has closed. Terminal sessions are
    /// reported as of their end and left untouched.
    pub async fn check_timeout(&self, variant_id: &str) -> Result<TimeoutStatus, MonitorError> {
        let Some(session) = self.sessions.get(variant_id).await? else {
            return Err(MonitorError::NotFound(variant_id.to_string()));
        };

        let now = self.clock.now();
        if !session.is_active {
            return Ok(timeout_status(
                session.started_at,
                session.ended_at.unwrap_or(now),
            ));
        }

        let status = timeout_status(session.started_at, now);
        if status.timed_out
            && self
                .sessions
                .finalize(variant_id, &SessionOutcome::timed_out(now))
                .await?
                .is_some()
        {
            info!(variant_id, elapsed_secs = status.elapsed_secs, "Monitoring window closed");
        }
        Ok(status)
    }

    /// Finalize a kill and run cleanup. Returns `None` if the session had
    /// already ended, in which case no cleanup runs.
    pub async fn kill(
        &self,
        variant_id: &str,
        decision: &KillDecision,
        performance: &VariantPerformance,
    ) -> Result<Option<MonitoringSession>, MonitorError> {
        let outcome = SessionOutcome::killed(
            &decision.reason,
            FinalSnapshot::from(performance),
            self.clock.now(),
        );
        let Some(session) = self.sessions.finalize(variant_id, &outcome).await? else {
            return Ok(None);
        };

        info!(
            variant_id,
            engagement_rate = decision.engagement_rate,
            expected_rate = decision.expected_rate,
            reason = %decision.reason,
            "Variant killed"
        );
        self.cleanup.run(&session).await;
        Ok(Some(session))
    }

    /// Operator stop. Always wins over pending checks.
    pub async fn stop_monitoring(&self, variant_id: &str) -> Result<MonitoringSession, MonitorError> {
        let outcome = SessionOutcome::manually_stopped(self.clock.now());
        match self.sessions.finalize(variant_id, &outcome).await? {
            Some(session) => {
                info!(variant_id, "Monitoring stopped by operator");
                Ok(session)
            }
            None => Err(MonitorError::NotFound(variant_id.to_string())),
        }
    }

    pub async fn get_status(&self, variant_id: &str) -> Result<MonitoringSession, MonitorError> {
        self.sessions
            .get(variant_id)
            .await?
            .ok_or_else(|| MonitorError::NotFound(variant_id.to_string()))
    }

    pub async fn list_active(&self) -> Result<Vec<MonitoringSession>, MonitorError> {
        Ok(self.sessions.list_active().await?)
    }

    pub async fn is_active(&self, variant_id: &str) -> Result<bool, MonitorError> {
        Ok(self
            .sessions
            .get(variant_id)
            .await?
            .is_some_and(|s| s.is_active))
    }
}
