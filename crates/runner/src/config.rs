//! Runner configuration loaded from environment variables.

use orchestrator::SweeperConfig;

/// Runner configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `SWEEP_INTERVAL_SECS` — seconds between sweeper runs (default: `30`)
/// - `RETENTION_DAYS` — days terminal sagas are kept (default: `7`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub sweep_interval_secs: u64,
    pub retention_days: i64,
    pub log_level: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            sweep_interval_secs: std::env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            retention_days: std::env::var("RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(7),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// Translates the runner settings into a sweeper configuration.
    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval: std::time::Duration::from_secs(self.sweep_interval_secs),
            retention: chrono::Duration::days(self.retention_days),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
            retention_days: 7,
            log_level: "info".to_string(),
        }
    }
}
