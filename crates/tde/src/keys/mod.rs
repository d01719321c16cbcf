//! Key hierarchy: master key lifecycle, per-table subkeys, and the
//! dependency-injected [`KeyManager`] every cipher-touching component holds.
//!
//! # Lifecycle
//!
//! 1. [`KeyManager::new`] loads (or creates) the master key through
//!    [`MasterKeyStore`] and eagerly derives one subkey per configured table.
//! 2. Derived keys live in an `Arc<RwLock<KeySet>>` for the process lifetime:
//!    encrypt/decrypt paths take short read locks; nothing mutates them.
//! 3. Rotation takes the write lock for its whole duration — that lock *is*
//!    the exclusive gate: no cipher operation can run mid-rotation.
//!
//! # Security invariants
//!
//! - Key material is never logged, never `Debug`-printed, and zeroed on drop.
//! - The master key leaves process memory only via the persisted store file.

pub mod derive;
pub mod master;

pub use master::{KeyStoreError, MasterKey, MasterKeyStore};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use common::protocol::{EncryptionInfo, TableEncryptionInfo};
use common::TdeError;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::debug;

use crate::config::EncryptionConfig;
use crate::crypto::KEY_LEN;
use crate::settings::TdeSettings;

/// Fixed-size key buffer holding exactly [`KEY_LEN`] bytes.
///
/// Memory is overwritten with zeroes on drop to minimise the window during
/// which key material lives in RAM.
#[derive(Clone)]
pub struct KeyBytes(Box<[u8; KEY_LEN]>);

impl KeyBytes {
    /// Wrap raw key bytes.
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(Box::new(bytes))
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for KeyBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for KeyBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyBytes([REDACTED])")
    }
}

impl PartialEq for KeyBytes {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// A derived per-table subkey. Never persisted; recomputed from the master.
#[derive(Debug, Clone)]
pub struct TableKey(KeyBytes);

impl TableKey {
    /// Wrap derived key bytes.
    pub fn new(bytes: KeyBytes) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        self.0.as_bytes()
    }
}

/// The complete in-memory key state: master plus all derived table keys.
pub(crate) struct KeySet {
    pub(crate) master: MasterKey,
    pub(crate) table_keys: HashMap<String, TableKey>,
}

/// Dependency-injected handle to the key hierarchy.
///
/// Cheaply cloneable; every clone shares the same key state. Constructed once
/// at startup and passed into each component that needs cipher access — there
/// is no ambient singleton.
#[derive(Clone)]
pub struct KeyManager {
    config: Arc<EncryptionConfig>,
    store: MasterKeyStore,
    keys: Arc<RwLock<KeySet>>,
}

impl KeyManager {
    /// Load (or create) the master key and derive all table subkeys.
    ///
    /// # Errors
    ///
    /// Returns [`TdeError::KeyStore`] if the store file is corrupt or
    /// unwritable.
    pub fn new(settings: &TdeSettings, config: EncryptionConfig) -> Result<Self, TdeError> {
        let store = MasterKeyStore::new(settings);
        let master = store
            .load_or_create()
            .map_err(|e| TdeError::KeyStore(e.to_string()))?;

        let config = Arc::new(config);
        let keys = KeySet {
            table_keys: Self::derive_all(&config, &master),
            master,
        };
        debug!(tables = config.len(), "table keys derived");

        Ok(Self {
            config,
            store,
            keys: Arc::new(RwLock::new(keys)),
        })
    }

    fn derive_all(config: &EncryptionConfig, master: &MasterKey) -> HashMap<String, TableKey> {
        config
            .iter()
            .map(|(table, cfg)| {
                (
                    table.to_owned(),
                    derive::derive_table_key(master, table, cfg.sensitivity),
                )
            })
            .collect()
    }

    /// The encryption configuration this manager was built with.
    pub fn config(&self) -> &EncryptionConfig {
        &self.config
    }

    /// Borrow a clone of the subkey for `table`.
    ///
    /// Takes a short read lock; blocks only while a rotation is in flight.
    ///
    /// # Errors
    ///
    /// Returns [`TdeError::UnknownTable`] if the table is not configured.
    pub async fn table_key(&self, table: &str) -> Result<TableKey, TdeError> {
        let keys = self.keys.read().await;
        keys.table_keys
            .get(table)
            .cloned()
            .ok_or_else(|| TdeError::UnknownTable(table.to_owned()))
    }

    /// Snapshot of the configuration and key-store state.
    pub fn encryption_info(&self) -> EncryptionInfo {
        let encrypted_tables = self
            .config
            .iter()
            .map(|(table, cfg)| TableEncryptionInfo {
                table: table.to_owned(),
                fields: cfg.fields.clone(),
                sensitivity: cfg.sensitivity.as_str().to_owned(),
            })
            .collect();

        EncryptionInfo {
            algorithm: master::ALGORITHM.to_owned(),
            key_derivation: master::KEY_DERIVATION.to_owned(),
            iterations: self.store.base_iterations(),
            master_key_exists: self.store.exists(),
            encrypted_tables,
            total_encrypted_fields: self.config.total_fields(),
        }
    }

    /// Back up the key store if backups are enabled. Returns the backup path,
    /// or `None` when backups are disabled in settings.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError`] if the copy fails.
    pub fn backup_store(&self) -> Result<Option<PathBuf>, KeyStoreError> {
        if !self.store.backup_enabled() {
            return Ok(None);
        }
        self.store.backup().map(Some)
    }

    // -- rotation plumbing, used by MigrationManager ------------------------

    /// Acquire the exclusive key lock for the duration of a rotation.
    pub(crate) async fn lock_for_rotation(&self) -> RwLockWriteGuard<'_, KeySet> {
        self.keys.write().await
    }

    /// Generate a fresh master key (not persisted).
    pub(crate) fn generate_master(&self) -> MasterKey {
        self.store.generate()
    }

    /// Derive a complete key set under `master`.
    pub(crate) fn derive_keyset(&self, master: &MasterKey) -> KeySet {
        KeySet {
            table_keys: Self::derive_all(&self.config, master),
            master: master.clone(),
        }
    }

    /// Atomically persist `master` as the new store contents.
    pub(crate) fn persist_master(&self, master: &MasterKey) -> Result<(), KeyStoreError> {
        self.store.persist(master)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_in(dir: &tempfile::TempDir) -> KeyManager {
        let settings = TdeSettings {
            master_key_file: dir.path().join(".tde_master_key"),
            base_iterations: 1_000,
            ..TdeSettings::default()
        };
        KeyManager::new(&settings, EncryptionConfig::builtin()).unwrap()
    }

    #[tokio::test]
    async fn table_keys_are_available_for_configured_tables() {
        let dir = tempfile::tempdir().unwrap();
        let km = manager_in(&dir);
        for table in ["patients", "doctors", "medical_records", "prescriptions"] {
            assert!(km.table_key(table).await.is_ok(), "missing key for {table}");
        }
    }

    #[tokio::test]
    async fn unknown_table_is_a_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let km = manager_in(&dir);
        assert!(matches!(
            km.table_key("appointments").await,
            Err(TdeError::UnknownTable(_))
        ));
    }

    #[tokio::test]
    async fn reopening_derives_identical_keys() {
        let dir = tempfile::tempdir().unwrap();
        let a = manager_in(&dir);
        let b = manager_in(&dir);
        let ka = a.table_key("patients").await.unwrap();
        let kb = b.table_key("patients").await.unwrap();
        assert_eq!(ka.as_bytes(), kb.as_bytes());
    }

    #[test]
    fn encryption_info_reflects_config() {
        let dir = tempfile::tempdir().unwrap();
        let km = manager_in(&dir);
        let info = km.encryption_info();
        assert_eq!(info.algorithm, "AES-256-CBC");
        assert_eq!(info.key_derivation, "PBKDF2-HMAC-SHA256");
        assert!(info.master_key_exists);
        assert_eq!(info.encrypted_tables.len(), 4);
        assert_eq!(info.total_encrypted_fields, 9);
    }

    #[test]
    fn key_bytes_debug_is_redacted() {
        let kb = KeyBytes::new([0xAB; KEY_LEN]);
        assert_eq!(format!("{kb:?}"), "KeyBytes([REDACTED])");
    }
}
