//! `tde-admin` — operator tool for the field-encryption layer.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise structured JSON logging (stderr; stdout carries reports).
//! 3. Dispatch the subcommand against the configured database.
//!
//! Subcommands:
//! - `setup`   — create the master key store and add envelope columns.
//! - `migrate` — bulk-encrypt existing plaintext rows.
//! - `verify`  — report encryption coverage per table.
//! - `rotate`  — replace the master key and re-encrypt everything.
//! - `info`    — print the encryption configuration and key state.
//! - `scrub`   — null out plaintext values that already carry an envelope.

mod config;
mod schema;
mod sqlite;
mod telemetry;

use anyhow::{bail, Result};
use serde::Serialize;
use tde::config::EncryptionConfig;
use tde::keys::KeyManager;
use tde::{MigrationManager, RecordCodec};
use tracing::info;

use crate::config::Config;
use crate::sqlite::SqliteExecutor;

const USAGE: &str = "usage: tde-admin <setup|migrate|verify|rotate|info|scrub>";

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        eprintln!("ERROR: tde-admin configuration invalid: {e}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init(&cfg.log_level)?;

    // -----------------------------------------------------------------------
    // 3. Command dispatch
    // -----------------------------------------------------------------------
    let command = match std::env::args().nth(1) {
        Some(c) => c,
        None => bail!("{USAGE}"),
    };
    run(&command, &cfg).await
}

async fn run(command: &str, cfg: &Config) -> Result<()> {
    let keys = KeyManager::new(&cfg.tde, EncryptionConfig::builtin())?;
    let executor = SqliteExecutor::open(&cfg.database_path)?;
    let manager = MigrationManager::new(RecordCodec::new(keys.clone()), executor);

    match command {
        "setup" => {
            schema::ensure_envelope_columns(manager.executor(), keys.config()).await?;
            info!("key store and schema ready");
            print_report(&keys.encryption_info())
        }
        "migrate" => {
            let reports = manager.migrate_all().await?;
            print_report(&reports)
        }
        "verify" => {
            let reports = manager.verify_all().await?;
            print_report(&reports)
        }
        "rotate" => {
            let report = manager.rotate_master_key().await?;
            print_report(&report)
        }
        "info" => print_report(&keys.encryption_info()),
        "scrub" => {
            let scrubbed = schema::scrub_plaintext(manager.executor(), keys.config()).await?;
            info!(scrubbed, "scrub complete");
            println!("{scrubbed}");
            Ok(())
        }
        other => bail!("unknown command `{other}`\n{USAGE}"),
    }
}

fn print_report<T: Serialize>(report: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
