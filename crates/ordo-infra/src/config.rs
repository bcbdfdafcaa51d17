//! Engine configuration loader.
//!
//! Reads `ordo.toml` from the data directory (`~/.ordo/` unless
//! `ORDO_DATA_DIR` is set) and deserializes it into [`EngineConfig`]. Falls
//! back to defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use ordo_types::config::EngineConfig;

use crate::sqlite::pool::database_url_in;

/// Name of the configuration file inside the data directory.
pub const CONFIG_FILE_NAME: &str = "ordo.toml";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "ORDO_DATA_DIR";

/// Resolve the data directory: `$ORDO_DATA_DIR`, else `~/.ordo`, else `./.ordo`.
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .map(|home| home.join(".ordo"))
        .unwrap_or_else(|| PathBuf::from(".ordo"))
}

/// Load engine configuration from `{data_dir}/ordo.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join(CONFIG_FILE_NAME);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE_NAME} found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

/// Database URL for an engine: the configured one, or `{data_dir}/ordo.db`.
pub fn resolve_database_url(config: &EngineConfig, data_dir: &Path) -> String {
    config
        .database_url
        .clone()
        .unwrap_or_else(|| database_url_in(data_dir))
}
