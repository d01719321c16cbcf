//! Schema maintenance: envelope columns and plaintext scrubbing.
//!
//! Each encrypted field needs two sibling BLOB columns,
//! `<field>_encrypted` and `<field>_iv`, next to the (possibly still
//! populated) plaintext column. `ensure_envelope_columns` adds whichever are
//! missing; `scrub_plaintext` nulls out plaintext values that already have an
//! envelope, the final step after a verified migration.

use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use common::{Params, SqlValue, StorageExecutor};
use tde::EncryptionConfig;
use tracing::info;

async fn column_names<E: StorageExecutor>(executor: &E, table: &str) -> Result<HashSet<String>> {
    let rows = executor
        .fetch_all(&format!("PRAGMA table_info({table})"), Params::None)
        .await
        .with_context(|| format!("cannot read schema of {table}"))?;
    if rows.is_empty() {
        bail!("table {table} does not exist");
    }
    Ok(rows
        .into_iter()
        .filter_map(|row| row.get("name").and_then(SqlValue::as_str).map(str::to_owned))
        .collect())
}

/// Add missing `<field>_encrypted` / `<field>_iv` columns to every configured
/// table. Idempotent.
///
/// # Errors
///
/// Fails if a configured table is missing or an `ALTER TABLE` fails.
pub async fn ensure_envelope_columns<E: StorageExecutor>(
    executor: &E,
    config: &EncryptionConfig,
) -> Result<()> {
    for (table, cfg) in config.iter() {
        let existing = column_names(executor, table).await?;
        for field in &cfg.fields {
            for column in [format!("{field}_encrypted"), format!("{field}_iv")] {
                if existing.contains(&column) {
                    continue;
                }
                executor
                    .execute(
                        &format!("ALTER TABLE {table} ADD COLUMN {column} BLOB"),
                        Params::None,
                    )
                    .await
                    .with_context(|| format!("cannot add {table}.{column}"))?;
                info!(table, column, "envelope column added");
            }
        }
    }
    Ok(())
}

/// Null out plaintext values that already carry an envelope.
///
/// Returns the number of column updates performed. Rows without an envelope
/// keep their plaintext — scrubbing never destroys the only copy of a value.
///
/// # Errors
///
/// Fails if an `UPDATE` fails.
pub async fn scrub_plaintext<E: StorageExecutor>(
    executor: &E,
    config: &EncryptionConfig,
) -> Result<u64> {
    let mut scrubbed = 0;
    for (table, cfg) in config.iter() {
        let existing = column_names(executor, table).await?;
        for field in &cfg.fields {
            if !existing.contains(field.as_str()) {
                continue;
            }
            let n = executor
                .execute(
                    &format!(
                        "UPDATE {table} SET {field} = NULL WHERE {field} IS NOT NULL \
                         AND {field}_encrypted IS NOT NULL"
                    ),
                    Params::None,
                )
                .await
                .with_context(|| format!("cannot scrub {table}.{field}"))?;
            if n > 0 {
                info!(table, field, rows = n, "plaintext scrubbed");
            }
            scrubbed += n;
        }
    }
    Ok(scrubbed)
}
