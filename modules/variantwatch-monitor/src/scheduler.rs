//! Drives each monitored variant through timed check cycles.
//!
//! Every active variant gets one Tokio task. A cycle re-reads the session from
//! the store first, so a session that ended in the meantime turns the cycle
//! into a no-op and the task exits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use variantwatch_common::{Config, KillDecision, MonitoringSession};

use crate::monitor::{EarlyKillMonitor, MonitorError, StartMonitoring};
use crate::rate_limiter::{retry_with, BackoffPolicy, RateLimiter};
use crate::traits::{is_transient_call, MetricsSource};

/// Upper bound on one evaluation; it gates the next tick.
pub const EVALUATION_BUDGET: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    /// Before the first check after monitoring starts.
    pub initial_delay: Duration,
    /// Between checks that ended without a decision.
    pub interval: Duration,
    /// After a check that failed on a transient error.
    pub error_backoff: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            interval: Duration::from_secs(30),
            error_backoff: Duration::from_secs(60),
        }
    }
}

impl PollIntervals {
    pub fn from_config(config: &Config) -> Self {
        Self {
            initial_delay: Duration::from_secs(config.monitor_initial_delay_secs),
            interval: Duration::from_secs(config.monitor_interval_secs),
            error_backoff: Duration::from_secs(config.monitor_error_backoff_secs),
        }
    }
}

/// Result of one check cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// The session had already ended.
    Inactive,
    TimedOut,
    Killed(KillDecision),
    /// No decision yet.
    Continue,
    /// The cycle was skipped on an error; the session is untouched.
    Retry(String),
}

impl CheckOutcome {
    /// Delay before the next cycle, or `None` once monitoring is over.
    pub fn next_delay(&self, intervals: &PollIntervals) -> Option<Duration> {
        match self {
            CheckOutcome::Continue => Some(intervals.interval),
            CheckOutcome::Retry(_) => Some(intervals.error_backoff),
            CheckOutcome::Inactive | CheckOutcome::TimedOut | CheckOutcome::Killed(_) => None,
        }
    }
}

struct Poller {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct MonitorScheduler {
    monitor: Arc<EarlyKillMonitor>,
    metrics: Arc<dyn MetricsSource>,
    limiter: RateLimiter,
    backoff: BackoffPolicy,
    transient: BackoffPolicy,
    intervals: PollIntervals,
    pollers: Mutex<HashMap<String, Poller>>,
    generations: AtomicU64,
}

impl MonitorScheduler {
    pub fn new(
        monitor: Arc<EarlyKillMonitor>,
        metrics: Arc<dyn MetricsSource>,
        limiter: RateLimiter,
        intervals: PollIntervals,
    ) -> Self {
        Self {
            monitor,
            metrics,
            limiter,
            backoff: BackoffPolicy::default(),
            transient: BackoffPolicy::transient(),
            intervals,
            pollers: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    pub fn monitor(&self) -> &Arc<EarlyKillMonitor> {
        &self.monitor
    }

    fn pollers(&self) -> MutexGuard<'_, HashMap<String, Poller>> {
        self.pollers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start monitoring and schedule the first check. Returns without waiting for it.
    pub async fn start(
        self: &Arc<Self>,
        request: StartMonitoring,
    ) -> Result<MonitoringSession, MonitorError> {
        let session = self.monitor.start_monitoring(request).await?;
        self.spawn(&session.variant_id, self.intervals.initial_delay);
        Ok(session)
    }

    /// Run check cycles for `variant_id` on a new task, replacing any existing one.
    pub fn spawn(self: &Arc<Self>, variant_id: &str, first_delay: Duration) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let scheduler = Arc::clone(self);
        let id = variant_id.to_string();

        // Held across spawn so the task cannot deregister before it is registered.
        let mut pollers = self.pollers();
        let handle = tokio::spawn(async move {
            scheduler.poll(&id, first_delay).await;
            scheduler.forget(&id, generation);
        });
        if let Some(previous) = pollers.insert(variant_id.to_string(), Poller { generation, handle }) {
            previous.handle.abort();
        }
    }

    async fn poll(&self, variant_id: &str, first_delay: Duration) {
        let mut delay = first_delay;
        loop {
            tokio::time::sleep(delay).await;
            let outcome = self.run_check(variant_id).await;
            match outcome.next_delay(&self.intervals) {
                Some(next) => delay = next,
                None => {
                    debug!(variant_id, ?outcome, "Polling finished");
                    return;
                }
            }
        }
    }

    fn forget(&self, variant_id: &str, generation: u64) {
        let mut pollers = self.pollers();
        if pollers
            .get(variant_id)
            .is_some_and(|p| p.generation == generation)
        {
            pollers.remove(variant_id);
        }
    }

    /// Operator stop: finalize the session, then cancel its poller.
    pub async fn stop(&self, variant_id: &str) -> Result<MonitoringSession, MonitorError> {
        let session = self.monitor.stop_monitoring(variant_id).await?;
        if let Some(poller) = self.pollers().remove(variant_id) {
            poller.handle.abort();
        }
        Ok(session)
    }

    /// Re-spawn pollers for sessions left active by a previous process.
    /// Their windows stay anchored at post time, so overdue ones time out on the first check.
    pub async fn resume_active(self: &Arc<Self>) -> Result<usize, MonitorError> {
        let sessions = self.monitor.list_active().await?;
        let mut resumed = 0;
        for session in &sessions {
            if self.is_polling(&session.variant_id) {
                continue;
            }
            self.spawn(&session.variant_id, Duration::ZERO);
            resumed += 1;
        }
        if resumed > 0 {
            info!(resumed, "Resumed monitoring for active sessions");
        }
        Ok(resumed)
    }

    /// One check cycle: liveness, then timeout, then fetch and evaluate.
    pub async fn run_check(&self, variant_id: &str) -> CheckOutcome {
        let session = match self.monitor.get_status(variant_id).await {
            Ok(s) if s.is_active => s,
            Ok(_) | Err(MonitorError::NotFound(_)) => return CheckOutcome::Inactive,
            Err(e) => {
                warn!(error = %e, variant_id, "Failed to load session, skipping check");
                return CheckOutcome::Retry(e.to_string());
            }
        };

        match self.monitor.check_timeout(variant_id).await {
            Ok(status) if status.timed_out => return CheckOutcome::TimedOut,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, variant_id, "Timeout check failed, skipping check");
                return CheckOutcome::Retry(e.to_string());
            }
        }

        let metrics = &self.metrics;
        let limiter = &self.limiter;
        let backoff = &self.backoff;
        let post_id = session.post_id.as_str();
        let fetched = retry_with(&self.transient, is_transient_call, move || {
            limiter.call_with_backoff(backoff, move || metrics.get_post_performance(post_id))
        })
        .await;
        let performance = match fetched {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, variant_id, post_id, "Metrics fetch failed, skipping check");
                return CheckOutcome::Retry(e.to_string());
            }
        };

        let evaluation = tokio::time::timeout(
            EVALUATION_BUDGET,
            self.monitor.evaluate_performance(variant_id, &performance),
        )
        .await;
        let decision = match evaluation {
            Ok(Ok(Some(decision))) => decision,
            Ok(Ok(None)) => return CheckOutcome::Continue,
            Ok(Err(MonitorError::NotFound(_))) => return CheckOutcome::Inactive,
            Ok(Err(e)) => {
                warn!(error = %e, variant_id, "Evaluation failed, skipping check");
                return CheckOutcome::Retry(e.to_string());
            }
            Err(_) => {
                warn!(variant_id, "Evaluation exceeded its time budget, skipping check");
                return CheckOutcome::Retry("evaluation timed out".to_string());
            }
        };

        match self.monitor.kill(variant_id, &decision, &performance).await {
            Ok(Some(_)) => CheckOutcome::Killed(decision),
            Ok(None) => CheckOutcome::Inactive,
            Err(e) => {
                warn!(error = %e, variant_id, "Failed to finalize kill, will retry");
                CheckOutcome::Retry(e.to_string())
            }
        }
    }

    pub fn is_polling(&self, variant_id: &str) -> bool {
        self.pollers()
            .get(variant_id)
            .is_some_and(|p| !p.handle.is_finished())
    }

    /// Number of variants with a live poller.
    pub fn active_pollers(&self) -> usize {
        self.pollers()
            .values()
            .filter(|p| !p.handle.is_finished())
            .count()
    }
}
