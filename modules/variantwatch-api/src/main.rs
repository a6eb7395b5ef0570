use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

use platform_client::PlatformClient;
use variantwatch_api::{build_router, AppState};
use variantwatch_common::Config;
use variantwatch_monitor::{
    rotation_from_config, EarlyKillMonitor, IngestionPipeline, KillCleanup, MonitorScheduler,
    PgTaskQueue, PollIntervals, RateLimiter, SystemClock,
};
use variantwatch_store::{PgCommentStore, PgSessionStore, SCHEMA_SQL};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("variantwatch=info".parse()?)
                .add_directive("platform_client=info".parse()?),
        )
        .init();

    let config = Config::from_env()?;
    config.log_redacted();

    let pool = PgPool::connect(&config.database_url).await?;
    sqlx::raw_sql(SCHEMA_SQL).execute(&pool).await?;

    // One bucket for every platform call this process makes.
    let limiter = RateLimiter::per_minute(config.platform_calls_per_minute);
    let platform = Arc::new(PlatformClient::new(
        config.platform_api_url.clone(),
        config.platform_api_token.clone(),
    ));

    let cleanup = KillCleanup::new(
        rotation_from_config(config.rotation_webhook_url.clone()),
        platform.clone(),
        limiter.clone(),
    );
    let monitor = Arc::new(EarlyKillMonitor::new(
        Arc::new(PgSessionStore::new(pool.clone())),
        cleanup,
        Arc::new(SystemClock),
    ));
    let scheduler = Arc::new(MonitorScheduler::new(
        monitor,
        platform.clone(),
        limiter.clone(),
        PollIntervals::from_config(&config),
    ));
    scheduler.resume_active().await?;

    let ingestion = IngestionPipeline::new(
        platform,
        Arc::new(PgCommentStore::new(pool.clone())),
        Arc::new(PgTaskQueue::new(pool)),
        limiter,
    );

    let app = build_router(Arc::new(AppState {
        scheduler,
        ingestion,
    }));

    let addr = format!("{}:{}", config.web_host, config.web_port);
    info!("variantwatch API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
