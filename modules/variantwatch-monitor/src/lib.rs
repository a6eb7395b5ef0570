//! Variant monitoring core: rate-limited platform access, comment ingestion,
//! and the early-kill state machine with its scheduler.

pub mod cleanup;
pub mod clock;
pub mod ingest;
pub mod monitor;
pub mod platform;
pub mod queue;
pub mod rate_limiter;
pub mod rotation;
pub mod scheduler;
pub mod traits;

pub use cleanup::KillCleanup;
pub use clock::{Clock, ManualClock, SystemClock};
pub use ingest::IngestionPipeline;
pub use monitor::{EarlyKillMonitor, MonitorError, StartMonitoring};
pub use queue::{MemoryTaskQueue, NoopTaskQueue, PgTaskQueue, QueuedTask, TaskPriority, TaskQueue};
pub use rate_limiter::{BackoffPolicy, CallError, RateLimitError, RateLimiter};
pub use rotation::{rotation_from_config, NoopRotation, RotationWebhook};
pub use scheduler::{CheckOutcome, MonitorScheduler, PollIntervals};
pub use traits::{CommentSource, MetricsSource, PostDeleter, SourceError, VariantRotation};
