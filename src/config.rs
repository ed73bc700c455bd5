use std::{env, time::Duration};

use crate::error::{AppErr, AppResult};

/// Server settings, read from the environment (and `.env` via dotenvy).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub bind_addr: String,
    pub static_dir: String,
    pub flush_interval: Duration,
    pub metadata_timeout: Duration,
    pub oembed_base: Option<String>,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Ok(Config {
            database_url: var_or("DATABASE_URL", "sqlite://roomsync.db?mode=rwc"),
            jwt_secret: env::var("JWT_SECRET").map_err(|_| AppErr::Config("JWT_SECRET is not set".into()))?,
            bind_addr: var_or("BIND_ADDR", "0.0.0.0:3000"),
            static_dir: var_or("STATIC_DIR", "static"),
            flush_interval: Duration::from_secs(parse_or("FLUSH_INTERVAL_SECS", 10)?),
            metadata_timeout: Duration::from_millis(parse_or("METADATA_TIMEOUT_MS", 3_000)?),
            oembed_base: env::var("OEMBED_BASE").ok().filter(|s| !s.is_empty()),
        })
    }
}

/// Client-side sync tuning.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Position gap that triggers a corrective seek.
    pub drift_threshold: Duration,
    /// How long a corrective seek suppresses outgoing reports (1.0–1.5s).
    pub guard_timeout: Duration,
    pub poll_interval: Duration,
    /// Minimum movement between two position reports.
    pub min_report_delta: Duration,
    pub command_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            drift_threshold: Duration::from_millis(2_000),
            guard_timeout: Duration::from_millis(1_200),
            poll_interval: Duration::from_millis(1_000),
            min_report_delta: Duration::from_millis(500),
            command_timeout: Duration::from_millis(5_000),
        }
    }
}

impl SyncConfig {
    pub fn with_guard_timeout(mut self, timeout: Duration) -> Self {
        self.guard_timeout = timeout.clamp(Duration::from_millis(1_000), Duration::from_millis(1_500));
        self
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).ok().filter(|s| !s.is_empty()).unwrap_or_else(|| default.to_string())
}

fn parse_or(key: &str, default: u64) -> AppResult<u64> {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v.parse().map_err(|e| AppErr::Config(format!("{key}={v}: {e}"))),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_timeout_stays_in_bounds() {
        let c = SyncConfig::default().with_guard_timeout(Duration::from_secs(10));
        assert_eq!(c.guard_timeout, Duration::from_millis(1_500));
        let c = SyncConfig::default().with_guard_timeout(Duration::from_millis(10));
        assert_eq!(c.guard_timeout, Duration::from_millis(1_000));
    }

    #[test]
    fn defaults_match_protocol_constants() {
        let c = SyncConfig::default();
        assert_eq!(c.drift_threshold.as_millis(), 2_000);
        assert!(c.guard_timeout >= Duration::from_millis(1_000) && c.guard_timeout <= Duration::from_millis(1_500));
        assert_eq!(c.min_report_delta.as_millis(), 500);
    }
}
