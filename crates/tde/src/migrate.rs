//! Bulk encryption of pre-existing plaintext and master key rotation.
//!
//! Migration walks a table row by row, encrypting configured plaintext values
//! that do not yet carry an envelope. It is idempotent: rows already bearing
//! an envelope are skipped, and per-row failures are counted and reported
//! without stopping the pass.
//!
//! Rotation is an exclusive batch operation in three phases, all under the
//! key manager's write lock so no cipher operation can interleave:
//!
//! 1. **Stage** — decrypt every envelope in every table with the old keys,
//!    entirely in memory. Nothing has changed on disk if this fails.
//! 2. **Apply** — re-encrypt under freshly derived keys and update each row.
//!    A failed update triggers a best-effort rollback of the rows already
//!    rewritten, restoring their original envelopes.
//! 3. **Commit** — atomically persist the new master key and swap the
//!    in-memory key set.
//!
//! The key store is backed up before phase 2, so even a crash between apply
//! and commit is recoverable from the backup plus the old store file.

use common::protocol::{CoverageReport, MigrationReport, RotationReport};
use common::{Params, Record, SqlValue, StorageExecutor, TdeError};
use tracing::{debug, error, info, warn};

use crate::codec::RecordCodec;
use crate::crypto::cipher::{decrypt_value, encrypt_value};
use crate::keys::TableKey;

/// One staged row during rotation: the plaintexts to re-encrypt and the
/// original envelopes to restore on rollback.
struct StagedRow {
    table: String,
    id: SqlValue,
    fields: Vec<(String, String)>,
    originals: Record,
}

/// Bulk migration and key rotation over a storage executor.
pub struct MigrationManager<E> {
    codec: RecordCodec,
    executor: E,
}

impl<E: StorageExecutor> MigrationManager<E> {
    /// Build a manager over `executor` using `codec`'s keys and configuration.
    pub fn new(codec: RecordCodec, executor: E) -> Self {
        Self { codec, executor }
    }

    /// The underlying executor.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// The codec migrations encrypt with.
    pub fn codec(&self) -> &RecordCodec {
        &self.codec
    }

    /// Encrypt every not-yet-encrypted configured value in `table`.
    ///
    /// Rows whose configured plaintext fields are all empty, or which already
    /// carry envelopes, count as skipped. Rows that fail to update count as
    /// failed; the pass continues.
    ///
    /// # Errors
    ///
    /// Returns [`TdeError::UnknownTable`] for an unconfigured table and
    /// [`TdeError::Storage`] if the initial row scan fails. Per-row update
    /// failures do not abort the pass.
    pub async fn migrate_table(&self, table: &str) -> Result<MigrationReport, TdeError> {
        let cfg = self
            .codec
            .keys
            .config()
            .table(table)
            .ok_or_else(|| TdeError::UnknownTable(table.to_owned()))?
            .clone();
        let key = self.codec.keys.table_key(table).await?;

        let rows = self
            .executor
            .fetch_all(&format!("SELECT * FROM {table}"), Params::None)
            .await?;

        let mut report = MigrationReport::new(table);
        for row in rows {
            report.scanned += 1;

            let Some(id) = row.get("id").cloned() else {
                warn!(table, "row without id column; cannot migrate");
                report.failed += 1;
                continue;
            };

            // Fields that still hold plaintext and have no envelope yet.
            let mut update = Record::new();
            for field in &cfg.fields {
                let already = row
                    .get(&format!("{field}_encrypted"))
                    .and_then(SqlValue::as_nonempty_blob)
                    .is_some();
                if already {
                    continue;
                }
                let Some(plaintext) = row.get(field).and_then(SqlValue::to_plaintext) else {
                    continue;
                };
                if let Some(env) = encrypt_value(&key, &plaintext) {
                    update.push(format!("{field}_encrypted"), SqlValue::Blob(env.ciphertext));
                    update.push(format!("{field}_iv"), SqlValue::Blob(env.iv));
                }
            }

            if update.is_empty() {
                report.skipped += 1;
                continue;
            }

            let assignments = assignment_list(&update);
            update.push("id", id);
            let query = format!("UPDATE {table} SET {assignments} WHERE id = :id");
            match self.executor.execute(&query, Params::Named(update)).await {
                Ok(_) => report.migrated += 1,
                Err(e) => {
                    warn!(table, error = %e, "row migration failed; continuing");
                    report.failed += 1;
                }
            }
        }

        info!(
            table,
            scanned = report.scanned,
            migrated = report.migrated,
            skipped = report.skipped,
            failed = report.failed,
            "migration pass complete"
        );
        Ok(report)
    }

    /// Run [`Self::migrate_table`] over every configured table.
    ///
    /// # Errors
    ///
    /// Returns the first table-level error; completed reports are lost in
    /// that case, so run tables individually when partial progress matters.
    pub async fn migrate_all(&self) -> Result<Vec<MigrationReport>, TdeError> {
        let tables: Vec<String> = self
            .codec
            .keys
            .config()
            .iter()
            .map(|(t, _)| t.to_owned())
            .collect();
        let mut reports = Vec::with_capacity(tables.len());
        for table in tables {
            reports.push(self.migrate_table(&table).await?);
        }
        Ok(reports)
    }

    /// Count rows carrying at least one populated envelope field in `table`.
    ///
    /// # Errors
    ///
    /// Returns [`TdeError::UnknownTable`] for an unconfigured table and
    /// [`TdeError::Storage`] if the scan fails.
    pub async fn verify_coverage(&self, table: &str) -> Result<CoverageReport, TdeError> {
        let cfg = self
            .codec
            .keys
            .config()
            .table(table)
            .ok_or_else(|| TdeError::UnknownTable(table.to_owned()))?;

        let rows = self
            .executor
            .fetch_all(&format!("SELECT * FROM {table}"), Params::None)
            .await?;

        let total = rows.len() as u64;
        let encrypted = rows
            .iter()
            .filter(|row| {
                cfg.fields.iter().any(|field| {
                    row.get(&format!("{field}_encrypted"))
                        .and_then(SqlValue::as_nonempty_blob)
                        .is_some()
                })
            })
            .count() as u64;

        Ok(CoverageReport::new(table, total, encrypted))
    }

    /// Coverage for every configured table.
    ///
    /// # Errors
    ///
    /// Returns the first table-level error.
    pub async fn verify_all(&self) -> Result<Vec<CoverageReport>, TdeError> {
        let tables: Vec<String> = self
            .codec
            .keys
            .config()
            .iter()
            .map(|(t, _)| t.to_owned())
            .collect();
        let mut reports = Vec::with_capacity(tables.len());
        for table in tables {
            reports.push(self.verify_coverage(&table).await?);
        }
        Ok(reports)
    }

    /// Replace the master key and re-encrypt every stored value under it.
    ///
    /// Holds the key manager's write lock for the whole operation, so every
    /// concurrent encrypt/decrypt blocks until rotation finishes. See the
    /// module docs for the phase breakdown and failure handling.
    ///
    /// # Errors
    ///
    /// Returns [`TdeError::Rotation`] if any phase fails. Phase 2 failures
    /// roll back already-rewritten rows before returning; the pre-rotation
    /// key store backup (when enabled) covers everything else.
    pub async fn rotate_master_key(&self) -> Result<RotationReport, TdeError> {
        let keys = &self.codec.keys;
        let mut guard = keys.lock_for_rotation().await;
        info!(
            old_key_age_days = guard.master.age_days(),
            "key rotation started"
        );

        let backup = keys
            .backup_store()
            .map_err(|e| TdeError::Rotation(format!("key store backup failed: {e}")))?;
        if let Some(path) = &backup {
            info!(path = %path.display(), "key store backed up");
        }

        // Phase 1: stage. Decrypt everything with the old keys, in memory.
        let tables: Vec<String> = keys.config().iter().map(|(t, _)| t.to_owned()).collect();
        let mut staged: Vec<StagedRow> = Vec::new();
        for table in &tables {
            let old_key = guard
                .table_keys
                .get(table)
                .cloned()
                .ok_or_else(|| TdeError::UnknownTable(table.clone()))?;
            let fields = keys
                .config()
                .table(table)
                .map(|c| c.fields.clone())
                .unwrap_or_default();

            let rows = self
                .executor
                .fetch_all(&format!("SELECT * FROM {table}"), Params::None)
                .await
                .map_err(|e| TdeError::Rotation(format!("scan of {table} failed: {e}")))?;

            for row in rows {
                let mut plaintexts = Vec::new();
                let mut originals = Record::new();
                for field in &fields {
                    let ct = row
                        .get(&format!("{field}_encrypted"))
                        .and_then(SqlValue::as_nonempty_blob);
                    let iv = row
                        .get(&format!("{field}_iv"))
                        .and_then(SqlValue::as_nonempty_blob);
                    let (Some(ct), Some(iv)) = (ct, iv) else {
                        continue;
                    };
                    let plaintext = decrypt_value(&old_key, ct, iv).map_err(|e| {
                        TdeError::Rotation(format!(
                            "cannot decrypt {table}.{field} under the current key: {e}"
                        ))
                    })?;
                    plaintexts.push((field.clone(), plaintext));
                    originals.push(format!("{field}_encrypted"), SqlValue::Blob(ct.to_vec()));
                    originals.push(format!("{field}_iv"), SqlValue::Blob(iv.to_vec()));
                }
                if plaintexts.is_empty() {
                    continue;
                }
                let id = row.get("id").cloned().ok_or_else(|| {
                    TdeError::Rotation(format!("encrypted row in {table} has no id column"))
                })?;
                staged.push(StagedRow {
                    table: table.clone(),
                    id,
                    fields: plaintexts,
                    originals,
                });
            }
        }
        debug!(rows = staged.len(), "rotation staging complete");

        // Phase 2: apply. Re-encrypt under the new keys and rewrite rows.
        let new_master = keys.generate_master();
        let new_keyset = keys.derive_keyset(&new_master);

        let mut values_reencrypted = 0u64;
        let mut rows_updated = 0u64;
        for (idx, row) in staged.iter().enumerate() {
            let new_key = new_keyset
                .table_keys
                .get(&row.table)
                .cloned()
                .ok_or_else(|| TdeError::UnknownTable(row.table.clone()))?;

            let mut update = Record::new();
            for (field, plaintext) in &row.fields {
                // Staged plaintexts are non-empty by construction.
                if let Some(env) = encrypt_value(&new_key, plaintext) {
                    update.push(format!("{field}_encrypted"), SqlValue::Blob(env.ciphertext));
                    update.push(format!("{field}_iv"), SqlValue::Blob(env.iv));
                    values_reencrypted += 1;
                }
            }

            if let Err(e) = self.update_row(&row.table, &row.id, update).await {
                error!(table = row.table, error = %e, "rotation update failed; rolling back");
                self.rollback(&staged[..idx]).await;
                return Err(TdeError::Rotation(format!(
                    "update of {} failed, prior rows restored: {e}",
                    row.table
                )));
            }
            rows_updated += 1;
        }

        // Phase 3: commit. Persist the new master, then swap the key set.
        if let Err(e) = keys.persist_master(&new_master) {
            error!(error = %e, "persisting rotated key failed; rolling back");
            self.rollback(&staged).await;
            return Err(TdeError::Rotation(format!(
                "new key could not be persisted, data restored under old key: {e}"
            )));
        }
        *guard = new_keyset;

        info!(
            tables = tables.len(),
            rows_updated, values_reencrypted, "key rotation complete"
        );
        Ok(RotationReport {
            backup: backup.map(|p| p.display().to_string()),
            tables_processed: tables.len() as u64,
            values_reencrypted,
            rows_updated,
        })
    }

    async fn update_row(
        &self,
        table: &str,
        id: &SqlValue,
        mut update: Record,
    ) -> Result<u64, TdeError> {
        let assignments = assignment_list(&update);
        update.push("id", id.clone());
        let query = format!("UPDATE {table} SET {assignments} WHERE id = :id");
        Ok(self.executor.execute(&query, Params::Named(update)).await?)
    }

    /// Restore original envelopes for rows already rewritten during a failed
    /// rotation. Best effort: restore failures are logged, not propagated —
    /// the caller already has the primary error, and the key store backup
    /// remains the last line of recovery.
    async fn rollback(&self, applied: &[StagedRow]) {
        for row in applied {
            if let Err(e) = self
                .update_row(&row.table, &row.id, row.originals.clone())
                .await
            {
                error!(
                    table = row.table,
                    error = %e,
                    "rollback of rotated row failed; restore from key store backup"
                );
            }
        }
    }
}

fn assignment_list(update: &Record) -> String {
    update
        .column_names()
        .map(|c| format!("{c} = :{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}
