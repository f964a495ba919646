//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Lowest accepted concurrency bound for task windows.
pub const MIN_CONCURRENT: usize = 1;
/// Highest accepted concurrency bound for task windows.
pub const MAX_CONCURRENT: usize = 5;
/// Default concurrency bound for task windows.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Runtime configuration for the task execution core.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Maximum number of task windows running at once, in `[1, 5]`.
    pub max_concurrent: usize,
    /// How long to wait after aborting runs before force-closing a window.
    pub close_grace_period: Duration,
    /// Capacity of the task event broadcast channel.
    pub event_capacity: usize,
    /// Optional JSON file of persisted task descriptors loaded at init.
    pub task_source_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            close_grace_period: Duration::from_secs(1),
            event_capacity: 256,
            task_source_path: None,
        }
    }
}

impl RuntimeConfig {
    /// Build configuration from `TASK_*` environment variables.
    ///
    /// Unparseable or out-of-range values fall back to the default with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_concurrent = match std::env::var("TASK_MAX_CONCURRENT") {
            Ok(raw) => match parse_max_concurrent(&raw) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!("{}; using {}", e, defaults.max_concurrent);
                    defaults.max_concurrent
                }
            },
            Err(_) => defaults.max_concurrent,
        };

        let close_grace_period = std::env::var("TASK_CLOSE_GRACE_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.close_grace_period);

        let event_capacity = std::env::var("TASK_EVENT_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.event_capacity);

        let task_source_path = std::env::var("TASK_SOURCE_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Self {
            max_concurrent,
            close_grace_period,
            event_capacity,
            task_source_path,
        }
    }
}

/// Check a concurrency bound against `[MIN_CONCURRENT, MAX_CONCURRENT]`.
pub fn validate_max_concurrent(value: usize) -> bool {
    (MIN_CONCURRENT..=MAX_CONCURRENT).contains(&value)
}

fn parse_max_concurrent(raw: &str) -> Result<usize, ConfigError> {
    let value = raw
        .trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::InvalidValue {
            key: "TASK_MAX_CONCURRENT".to_string(),
            message: e.to_string(),
        })?;

    if !validate_max_concurrent(value) {
        return Err(ConfigError::InvalidValue {
            key: "TASK_MAX_CONCURRENT".to_string(),
            message: format!("{value} is outside {MIN_CONCURRENT}..={MAX_CONCURRENT}"),
        });
    }

    Ok(value)
}
