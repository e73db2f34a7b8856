//! Loader configuration.

use std::time::Duration;

use modload_types::{env_duration_ms, env_name_or, env_parse_or};

/// Default period of the cycle watchdog.
pub const DEFAULT_WATCH_INTERVAL_MS: u64 = 25;

/// Default identifier module bodies use for the module API.
pub const DEFAULT_API_NAME: &str = "module";

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// How often the watchdog scans pending loads for cycles and timeouts.
    pub watch_interval: Duration,
    /// Reject entries still unresolved this long after they were first enabled.
    /// `None` waits forever.
    pub wait_interval: Option<Duration>,
    /// API identifier handed to the analyzer for fetched module bodies.
    pub api_name: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            watch_interval: Duration::from_millis(DEFAULT_WATCH_INTERVAL_MS),
            wait_interval: None,
            api_name: DEFAULT_API_NAME.to_string(),
        }
    }
}

impl LoaderConfig {
    /// Defaults overridden by `MODLOAD_WATCH_INTERVAL_MS`, `MODLOAD_WAIT_INTERVAL_MS`
    /// and `MODLOAD_API_NAME`.
    pub fn from_env() -> Self {
        let watch_ms: u64 = env_parse_or("MODLOAD_WATCH_INTERVAL_MS", DEFAULT_WATCH_INTERVAL_MS);
        Self {
            watch_interval: Duration::from_millis(watch_ms.max(1)),
            wait_interval: env_duration_ms("MODLOAD_WAIT_INTERVAL_MS"),
            api_name: env_name_or("MODLOAD_API_NAME", DEFAULT_API_NAME),
        }
    }

    pub fn with_watch_interval(mut self, interval: Duration) -> Self {
        self.watch_interval = interval;
        self
    }

    pub fn with_wait_interval(mut self, interval: Duration) -> Self {
        self.wait_interval = Some(interval);
        self
    }

    pub fn with_api_name(mut self, name: impl Into<String>) -> Self {
        self.api_name = name.into();
        self
    }
}
