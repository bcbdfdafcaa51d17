//! Engine configuration types.
//!
//! `EngineConfig` represents the `ordo.toml` file in the data directory. Every
//! field has a default, so an empty or missing file yields a working engine.

use serde::{Deserialize, Serialize};

/// Top-level configuration for an Ordo engine process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of the engine's start/resume message queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Capacity of the broadcast channel carrying engine events.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Delivered correlation ids remembered to drop duplicate notifies.
    #[serde(default = "default_notify_retention")]
    pub notify_retention: usize,

    /// SQLite database URL. Defaults to `{data_dir}/ordo.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// Export tracing spans through OpenTelemetry.
    #[serde(default)]
    pub enable_otel: bool,

    /// In-process task executor settings.
    #[serde(default)]
    pub local_executor: LocalExecutorConfig,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_event_capacity() -> usize {
    1024
}

fn default_notify_retention() -> usize {
    4096
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            event_capacity: default_event_capacity(),
            notify_retention: default_notify_retention(),
            database_url: None,
            enable_otel: false,
            local_executor: LocalExecutorConfig::default(),
        }
    }
}

/// Settings for the in-process task executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalExecutorConfig {
    /// Capabilities this process advertises to delegated tasks.
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Upper bound applied to every task timeout, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_timeout_secs: Option<u64>,
}
