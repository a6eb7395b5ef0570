use std::env;
use std::str::FromStr;

use crate::error::VariantWatchError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Social platform API
    pub platform_api_url: String,
    pub platform_api_token: String,
    /// Per-minute call quota. Sets both bucket capacity and steady refill rate.
    pub platform_calls_per_minute: u32,

    // Kill cleanup
    pub rotation_webhook_url: Option<String>,

    // Poller cadence
    pub monitor_initial_delay_secs: u64,
    pub monitor_interval_secs: u64,
    pub monitor_error_backoff_secs: u64,

    // Web server
    pub web_host: String,
    pub web_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, VariantWatchError> {
        Ok(Self {
            database_url: required_env("DATABASE_URL")?,
            platform_api_url: required_env("PLATFORM_API_URL")?,
            platform_api_token: required_env("PLATFORM_API_TOKEN")?,
            platform_calls_per_minute: parsed_env("PLATFORM_CALLS_PER_MINUTE", 200)?,
            rotation_webhook_url: env::var("ROTATION_WEBHOOK_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            monitor_initial_delay_secs: parsed_env("MONITOR_INITIAL_DELAY_SECS", 30)?,
            monitor_interval_secs: parsed_env("MONITOR_INTERVAL_SECS", 30)?,
            monitor_error_backoff_secs: parsed_env("MONITOR_ERROR_BACKOFF_SECS", 60)?,
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: parsed_env("WEB_PORT", 3000)?,
        })
    }

    pub fn log_redacted(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  DATABASE_URL: {}", preview(&self.database_url));
        tracing::info!("  PLATFORM_API_URL: {}", self.platform_api_url);
        tracing::info!("  PLATFORM_API_TOKEN: {}", preview(&self.platform_api_token));
        tracing::info!("  PLATFORM_CALLS_PER_MINUTE: {}", self.platform_calls_per_minute);
        tracing::info!(
            "  ROTATION_WEBHOOK_URL: {}",
            self.rotation_webhook_url
                .as_deref()
                .map(preview)
                .unwrap_or_else(|| "<not set>".to_string())
        );
        tracing::info!(
            "  MONITOR cadence: initial={}s interval={}s error_backoff={}s",
            self.monitor_initial_delay_secs,
            self.monitor_interval_secs,
            self.monitor_error_backoff_secs
        );
        tracing::info!("  WEB: {}:{}", self.web_host, self.web_port);
    }
}

fn preview(val: &str) -> String {
    let n = val.char_indices().nth(5).map(|(i, _)| i).unwrap_or(val.len());
    format!("{}...({} chars)", &val[..n], val.len())
}

fn required_env(key: &str) -> Result<String, VariantWatchError> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| VariantWatchError::Config(format!("{key} environment variable is required")))
}

fn parsed_env<T: FromStr>(key: &str, default: T) -> Result<T, VariantWatchError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| VariantWatchError::Config(format!("{key} must be a number, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}
