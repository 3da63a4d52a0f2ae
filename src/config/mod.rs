/// Configuration management for the assetflow engine
///
/// Handles executor concurrency and logging parameters.

use serde::{Deserialize, Serialize};

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Step scheduler configuration
    pub executor: ExecutorConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Step scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum number of steps RUNNING at once (values below 1 act as 1)
    pub max_concurrent_steps: usize,
}

/// Tracing subscriber configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Max level: "trace", "debug", "info", "warn", "error" or "off"
    pub level: String,
    /// Include thread ids on each line
    pub thread_ids: bool,
    /// Include the event target (module path) on each line
    pub with_target: bool,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            max_concurrent_steps: std::env::var("ASSETFLOW_MAX_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(parallelism),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("ASSETFLOW_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            thread_ids: std::env::var("ASSETFLOW_LOG_THREAD_IDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            with_target: false,
        }
    }
}

impl ExecutorConfig {
    /// Executor limited to `max_concurrent_steps`
    pub fn with_concurrency(max_concurrent_steps: usize) -> Self {
        Self { max_concurrent_steps }
    }

    /// Concurrency limit actually applied, never below 1
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrent_steps.max(1)
    }
}
