//! Runtime settings for the encryption layer.
//!
//! All values are read from environment variables. Binaries call
//! [`TdeSettings::from_env`] at startup and fail fast with a clear message if
//! anything is invalid.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Validated encryption-layer settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TdeSettings {
    /// Path of the master key store file.
    #[serde(default = "default_master_key_file")]
    pub master_key_file: PathBuf,

    /// Age in days after which a `warn!` is logged that the master key is due
    /// for rotation. Loading never fails on a stale key.
    #[serde(default = "default_key_rotation_days")]
    pub key_rotation_days: u32,

    /// Whether to write a timestamped key store backup on creation and before
    /// rotation.
    #[serde(default = "default_backup_keys")]
    pub backup_keys: bool,

    /// Base PBKDF2 iteration count, scaled per sensitivity tier.
    #[serde(default = "default_base_iterations")]
    pub base_iterations: u32,
}

fn default_master_key_file() -> PathBuf {
    PathBuf::from(".tde_master_key")
}
fn default_key_rotation_days() -> u32 {
    90
}
fn default_backup_keys() -> bool {
    true
}
fn default_base_iterations() -> u32 {
    100_000
}

impl Default for TdeSettings {
    fn default() -> Self {
        Self {
            master_key_file: default_master_key_file(),
            key_rotation_days: default_key_rotation_days(),
            backup_keys: default_backup_keys(),
            base_iterations: default_base_iterations(),
        }
    }
}

impl TdeSettings {
    /// Load and validate settings from environment variables
    /// (`MASTER_KEY_FILE`, `KEY_ROTATION_DAYS`, `BACKUP_KEYS`,
    /// `BASE_ITERATIONS`).
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or validation fails.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build TDE configuration from environment")?;

        let s: TdeSettings = cfg
            .try_deserialize()
            .context("failed to deserialise TDE configuration")?;

        s.validate()?;
        Ok(s)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    pub fn validate(&self) -> Result<()> {
        if self.master_key_file.as_os_str().is_empty() {
            anyhow::bail!("MASTER_KEY_FILE must not be empty");
        }
        if self.base_iterations < 1_000 {
            anyhow::bail!("BASE_ITERATIONS must be at least 1000");
        }
        if self.key_rotation_days == 0 {
            anyhow::bail!("KEY_ROTATION_DAYS must be > 0");
        }
        Ok(())
    }
}
