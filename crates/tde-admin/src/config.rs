//! Configuration loading and validation for the admin tool.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;
use tde::TdeSettings;

/// Validated admin-tool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path of the SQLite database file. **Required.**
    pub database_path: PathBuf,

    /// Tracing log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Encryption-layer settings, read from the same environment.
    #[serde(flatten)]
    pub tde: TdeSettings,
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build tde-admin configuration")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise tde-admin configuration")?;

        c.validate()?;
        Ok(c)
    }

    fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            anyhow::bail!("DATABASE_PATH is required and must not be empty");
        }
        self.tde.validate()
    }
}
