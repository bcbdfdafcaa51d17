//! Application state shared by the commands that touch the database.

use std::path::PathBuf;

use anyhow::Context;
use ordo_infra::config::resolve_database_url;
use ordo_infra::sqlite::pool::DatabasePool;
use ordo_types::config::EngineConfig;

/// Resolved data directory, configuration and database pool.
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: EngineConfig,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Create the data directory if needed and open the database.
    pub async fn init(data_dir: PathBuf, config: EngineConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let database_url = resolve_database_url(&config, &data_dir);
        let db_pool = DatabasePool::new(&database_url)
            .await
            .with_context(|| format!("failed to open database {database_url}"))?;

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");
        Ok(Self {
            data_dir,
            config,
            db_pool,
        })
    }
}
