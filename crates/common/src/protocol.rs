//! Report and status types exchanged with callers above the encryption layer.
//!
//! These types are serialised as JSON by the admin binary and by any route
//! handler that exposes encryption status.

use serde::{Deserialize, Serialize};

/// Per-table summary inside [`EncryptionInfo`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableEncryptionInfo {
    /// Logical table name.
    pub table: String,
    /// Field names configured for encryption, in configuration order.
    pub fields: Vec<String>,
    /// Sensitivity tier (`"low"`, `"medium"`, `"high"`, `"critical"`).
    pub sensitivity: String,
}

/// Snapshot of the encryption configuration and key state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionInfo {
    /// Cipher algorithm identifier.
    pub algorithm: String,
    /// Key-derivation function identifier.
    pub key_derivation: String,
    /// Base KDF iteration count (before sensitivity scaling).
    pub iterations: u32,
    /// Whether a master key store file exists on disk.
    pub master_key_exists: bool,
    /// Per-table configuration details.
    pub encrypted_tables: Vec<TableEncryptionInfo>,
    /// Total number of configured encrypted fields across all tables.
    pub total_encrypted_fields: usize,
}

/// Outcome of one bulk-encryption pass over a table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Table the migration ran against.
    pub table: String,
    /// Rows examined.
    pub scanned: u64,
    /// Rows updated with freshly encrypted values.
    pub migrated: u64,
    /// Rows that already carried an envelope (or had nothing to encrypt).
    pub skipped: u64,
    /// Rows that failed; migration continues past individual row failures.
    pub failed: u64,
}

impl MigrationReport {
    /// Create an empty report for `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }
}

/// Encryption coverage for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageReport {
    /// Table name.
    pub table: String,
    /// Total rows in the table.
    pub total_rows: u64,
    /// Rows with at least one populated envelope field.
    pub encrypted_rows: u64,
    /// `encrypted_rows / total_rows`, as a percentage. 0.0 for empty tables.
    pub percent: f64,
}

impl CoverageReport {
    /// Build a report, computing the percentage.
    pub fn new(table: impl Into<String>, total_rows: u64, encrypted_rows: u64) -> Self {
        let percent = if total_rows > 0 {
            encrypted_rows as f64 / total_rows as f64 * 100.0
        } else {
            0.0
        };
        Self {
            table: table.into(),
            total_rows,
            encrypted_rows,
            percent,
        }
    }
}

/// Outcome of a completed master key rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationReport {
    /// Path of the pre-rotation key store backup, if one was written.
    pub backup: Option<String>,
    /// Number of tables processed.
    pub tables_processed: u64,
    /// Individual field values re-encrypted under the new key.
    pub values_reencrypted: u64,
    /// Rows updated in storage.
    pub rows_updated: u64,
}
