//! Common error taxonomy shared across crates.
//!
//! Decryption failures are typed, never sentinel strings: a caller can match
//! on [`TdeError::Decryption`] but can never mistake a failure for real
//! plaintext.

use thiserror::Error;

use crate::storage::StorageError;

/// Top-level error type for the encryption layer.
#[derive(Debug, Error)]
pub enum TdeError {
    /// The master key store is missing, unreadable, or corrupt.
    ///
    /// Fatal for any ciphertext written under the lost key — regeneration is
    /// possible but forfeits all previously encrypted data, so this is never
    /// silently "fixed".
    #[error("master key store error: {0}")]
    KeyStore(String),

    /// Deriving a table subkey failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encrypting a field value failed.
    #[error("encryption failed for {table}.{field}: {reason}")]
    Encryption {
        /// Logical table the field belongs to.
        table: String,
        /// Field name.
        field: String,
        /// Underlying cause.
        reason: String,
    },

    /// Decrypting a field value failed (wrong key, corrupted ciphertext,
    /// truncated IV, or non-UTF-8 plaintext).
    #[error("decryption failed for {table}.{field}: {reason}")]
    Decryption {
        /// Logical table the field belongs to.
        table: String,
        /// Field name.
        field: String,
        /// Underlying cause.
        reason: String,
    },

    /// The named table has no entry in the encryption configuration.
    #[error("table not configured for encryption: {0}")]
    UnknownTable(String),

    /// The named field is not configured for encryption in its table.
    #[error("field {field} is not configured for encryption in table {table}")]
    FieldNotConfigured {
        /// Logical table name.
        table: String,
        /// Field name.
        field: String,
    },

    /// The underlying storage call failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A master key rotation was aborted; no partial rotation is left behind.
    #[error("rotation aborted: {0}")]
    Rotation(String),
}
