//! Configuration loader for the `greenfield-advisor` service.
//!
//! All runtime settings come from environment variables (optionally seeded
//! from a `.env` file by the caller). Decision thresholds are not configured
//! here: they start at their defaults and change only through
//! `system-settings` patches.
//!
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

/// Parse an optional numeric environment variable with a default value.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Read an optional, non-empty string environment variable.
macro_rules! optional_env {
    ($var_name:expr) => {
        env::var($var_name).ok().filter(|v| !v.trim().is_empty())
    };
}

/// Strongly typed application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Port for the HTTP ingress.
    pub http_port: u16,

    /// Bounded wait on each bus poll.
    pub bus_poll: Duration,

    /// JSON Lines dataset the models are trained on at startup.
    pub training_data_path: Option<PathBuf>,

    /// Dataset replayed onto `sensor-data` as a simulated live sensor.
    pub replay_data_path: Option<PathBuf>,

    /// Pause between replayed readings.
    pub replay_interval: Duration,

    /// Notifications are POSTed here when set, logged otherwise.
    pub notify_webhook_url: Option<String>,
}

/// Load configuration from environment variables with defaults.
///
/// Optional:
/// - `HTTP_PORT` – ingress port (default: 8080)
/// - `BUS_POLL_MS` – bus poll timeout in ms (default: 100)
/// - `TRAINING_DATA_PATH` – training dataset; models stay untrained without it
/// - `REPLAY_DATA_PATH` – dataset to replay onto `sensor-data`
/// - `REPLAY_INTERVAL_MS` – replay pacing in ms (default: 5000)
/// - `NOTIFY_WEBHOOK_URL` – webhook for alert reports
///
/// Returns an error if any variable is present but invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let http_port = parse_env!("HTTP_PORT", u16, 8080);
    let bus_poll_ms = parse_env!("BUS_POLL_MS", u64, 100);
    let replay_interval_ms = parse_env!("REPLAY_INTERVAL_MS", u64, 5000);

    if bus_poll_ms == 0 {
        return Err(anyhow!("Invalid BUS_POLL_MS: must be greater than zero"));
    }

    Ok(Config {
        http_port,
        bus_poll: Duration::from_millis(bus_poll_ms),
        training_data_path: optional_env!("TRAINING_DATA_PATH").map(PathBuf::from),
        replay_data_path: optional_env!("REPLAY_DATA_PATH").map(PathBuf::from),
        replay_interval: Duration::from_millis(replay_interval_ms),
        notify_webhook_url: optional_env!("NOTIFY_WEBHOOK_URL"),
    })
}

/// Hide the query string of a URL, where tokens usually live.
pub fn mask_url(url: &str) -> String {
    // ---
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?****"),
        None => url.to_string(),
    }
}

impl Config {
    /// Log the loaded configuration, masking webhook credentials.
    pub fn log_config(&self) {
        // ---
        let show = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".to_string())
        };
        let webhook = self
            .notify_webhook_url
            .as_deref()
            .map(mask_url)
            .unwrap_or_else(|| "(log only)".to_string());

        tracing::info!("Configuration loaded:");
        tracing::info!("  HTTP_PORT          : {}", self.http_port);
        tracing::info!("  BUS_POLL_MS        : {}", self.bus_poll.as_millis());
        tracing::info!("  TRAINING_DATA_PATH : {}", show(&self.training_data_path));
        tracing::info!("  REPLAY_DATA_PATH   : {}", show(&self.replay_data_path));
        tracing::info!("  REPLAY_INTERVAL_MS : {}", self.replay_interval.as_millis());
        tracing::info!("  NOTIFY_WEBHOOK_URL : {}", webhook);
    }
}
