use std::time::Duration;

use crate::monitor::MonitorConfig;

/// Gateway configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// Delay between backend polls, in milliseconds (default: `500`).
    pub poll_interval_ms: u64,
    /// Consecutive poll failures before a job is reported failed
    /// (default: `6`).
    pub poll_max_failures: u32,
    /// Interval between heartbeat pings, in seconds (default: `30`).
    pub heartbeat_interval_secs: u64,
    /// Base URL of a remote job service. Unset means jobs execute in the
    /// local in-process backend.
    pub backend_url: Option<String>,
    /// Progress-step cadence of the local backend, in milliseconds
    /// (default: `1000`).
    pub local_step_delay_ms: u64,
}

impl GatewayConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                    |
    /// |---------------------------|----------------------------|
    /// | `HOST`                    | `0.0.0.0`                  |
    /// | `PORT`                    | `3000`                     |
    /// | `CORS_ORIGINS`            | `http://localhost:5173`    |
    /// | `POLL_INTERVAL_MS`        | `500`                      |
    /// | `POLL_MAX_FAILURES`       | `6`                        |
    /// | `HEARTBEAT_INTERVAL_SECS` | `30`                       |
    /// | `BACKEND_URL`             | (unset, local executor)    |
    /// | `LOCAL_STEP_DELAY_MS`     | `1000`                     |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let poll_interval_ms: u64 = std::env::var("POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "500".into())
            .parse()
            .expect("POLL_INTERVAL_MS must be a valid u64");

        let poll_max_failures: u32 = std::env::var("POLL_MAX_FAILURES")
            .unwrap_or_else(|_| "6".into())
            .parse()
            .expect("POLL_MAX_FAILURES must be a valid u32");

        let heartbeat_interval_secs: u64 = std::env::var("HEARTBEAT_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("HEARTBEAT_INTERVAL_SECS must be a valid u64");

        let backend_url = std::env::var("BACKEND_URL").ok().filter(|s| !s.is_empty());

        let local_step_delay_ms: u64 = std::env::var("LOCAL_STEP_DELAY_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("LOCAL_STEP_DELAY_MS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            poll_interval_ms,
            poll_max_failures,
            heartbeat_interval_secs,
            backend_url,
            local_step_delay_ms,
        }
    }

    /// Monitor parameters derived from this configuration.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_poll_failures: self.poll_max_failures,
        }
    }
}
