//! Master key persistence: load-or-create, atomic writes, timestamped backups.
//!
//! The store file is JSON: a base64-encoded 256-bit secret plus metadata
//! (creation timestamp, algorithm, KDF name and iteration count). It is
//! written atomically (temp file + rename) with owner-only permissions — a
//! torn write here would make every existing ciphertext permanently
//! unreadable.

use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::KeyBytes;
use crate::crypto::KEY_LEN;
use crate::settings::TdeSettings;

/// Algorithm identifier recorded in the key file.
pub const ALGORITHM: &str = "AES-256-CBC";

/// KDF identifier recorded in the key file.
pub const KEY_DERIVATION: &str = "PBKDF2-HMAC-SHA256";

const FILE_VERSION: &str = "1.0";

/// Errors produced by the master key store.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// Reading, writing, or renaming the store file failed.
    #[error("key store I/O error at {path}: {source}")]
    Io {
        /// Path involved in the failed operation.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The store file exists but cannot be parsed. Fatal for any ciphertext
    /// written under the lost key; there is no recovery path.
    #[error("key store file {path} is corrupt: {reason}")]
    Corrupt {
        /// Path of the corrupt file.
        path: String,
        /// Parse failure detail.
        reason: String,
    },

    /// The decoded secret is not exactly [`KEY_LEN`] bytes.
    #[error("master key must be {KEY_LEN} bytes, found {0}")]
    InvalidKeyLength(usize),
}

/// The root secret plus its metadata.
///
/// Key bytes are zeroed on drop and redacted in `Debug`. The secret never
/// leaves process memory except through [`MasterKeyStore::persist`].
#[derive(Clone)]
pub struct MasterKey {
    secret: KeyBytes,
    /// When this key was generated.
    pub created_at: DateTime<Utc>,
    /// Cipher algorithm this key is used with.
    pub algorithm: String,
    /// Base KDF iteration count recorded at generation time. Subkey
    /// derivation honours this stored value, so changing the configured base
    /// later never orphans existing ciphertext.
    pub iterations: u32,
}

impl MasterKey {
    /// Borrow the raw 256-bit secret.
    pub fn secret(&self) -> &[u8; KEY_LEN] {
        self.secret.as_bytes()
    }

    /// Age of this key in whole days.
    pub fn age_days(&self) -> i64 {
        (Utc::now() - self.created_at).num_days()
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("secret", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .field("algorithm", &self.algorithm)
            .field("iterations", &self.iterations)
            .finish()
    }
}

/// On-disk layout of the key store file.
#[derive(Serialize, Deserialize)]
struct KeyFile {
    master_key: String,
    metadata: KeyMetadata,
}

#[derive(Serialize, Deserialize)]
struct KeyMetadata {
    created_at: DateTime<Utc>,
    version: String,
    algorithm: String,
    key_derivation: String,
    iterations: u32,
}

/// Persists and loads the root secret.
#[derive(Debug, Clone)]
pub struct MasterKeyStore {
    path: PathBuf,
    rotation_days: u32,
    backup_enabled: bool,
    base_iterations: u32,
}

impl MasterKeyStore {
    /// Create a store handle from settings. Touches no files.
    pub fn new(settings: &TdeSettings) -> Self {
        Self {
            path: settings.master_key_file.clone(),
            rotation_days: settings.key_rotation_days,
            backup_enabled: settings.backup_keys,
            base_iterations: settings.base_iterations,
        }
    }

    /// Path of the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if the store file exists on disk.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the existing master key, or generate, persist, and (optionally)
    /// back up a fresh one if no store file exists.
    ///
    /// A key older than the rotation threshold loads normally but logs a
    /// warning — decryption of existing data must keep working.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::Corrupt`] if an existing file cannot be
    /// parsed, and [`KeyStoreError::Io`] on filesystem failures.
    pub fn load_or_create(&self) -> Result<MasterKey, KeyStoreError> {
        if self.exists() {
            return self.load();
        }

        let key = self.generate();
        self.persist(&key)?;
        info!(path = %self.path.display(), "created new TDE master key");

        if self.backup_enabled {
            match self.backup() {
                Ok(backup) => info!(backup = %backup.display(), "master key backup written"),
                Err(e) => warn!(error = %e, "master key backup failed"),
            }
        }
        Ok(key)
    }

    /// Generate a fresh 256-bit master key. Does not persist it.
    pub fn generate(&self) -> MasterKey {
        let mut secret = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut secret);
        MasterKey {
            secret: KeyBytes::new(secret),
            created_at: Utc::now(),
            algorithm: ALGORITHM.to_owned(),
            iterations: self.base_iterations,
        }
    }

    fn load(&self) -> Result<MasterKey, KeyStoreError> {
        let path = self.path.display().to_string();
        let raw = fs::read_to_string(&self.path).map_err(|source| KeyStoreError::Io {
            path: path.clone(),
            source,
        })?;

        let file: KeyFile =
            serde_json::from_str(&raw).map_err(|e| KeyStoreError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let secret_bytes = STANDARD
            .decode(&file.master_key)
            .map_err(|e| KeyStoreError::Corrupt {
                path: path.clone(),
                reason: format!("master_key is not valid base64: {e}"),
            })?;
        if secret_bytes.len() != KEY_LEN {
            return Err(KeyStoreError::InvalidKeyLength(secret_bytes.len()));
        }
        let mut secret = [0u8; KEY_LEN];
        secret.copy_from_slice(&secret_bytes);

        let key = MasterKey {
            secret: KeyBytes::new(secret),
            created_at: file.metadata.created_at,
            algorithm: file.metadata.algorithm,
            iterations: file.metadata.iterations,
        };

        if key.age_days() >= i64::from(self.rotation_days) {
            warn!(
                age_days = key.age_days(),
                threshold_days = self.rotation_days,
                "TDE master key is past its rotation threshold"
            );
        } else {
            info!(path = %self.path.display(), "loaded existing TDE master key");
        }
        Ok(key)
    }

    /// Atomically persist `key` to the store file with mode 0600.
    ///
    /// The file is written to a temp sibling and renamed into place, so a
    /// crash mid-write can never leave a truncated store behind.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::Io`] on any filesystem failure.
    pub fn persist(&self, key: &MasterKey) -> Result<(), KeyStoreError> {
        let file = KeyFile {
            master_key: STANDARD.encode(key.secret()),
            metadata: KeyMetadata {
                created_at: key.created_at,
                version: FILE_VERSION.to_owned(),
                algorithm: key.algorithm.clone(),
                key_derivation: KEY_DERIVATION.to_owned(),
                iterations: key.iterations,
            },
        };
        let json = serde_json::to_vec_pretty(&file).expect("key file layout always serialises");

        let tmp = PathBuf::from(format!("{}.tmp", self.path.display()));
        let io_err = |p: &Path, source| KeyStoreError::Io {
            path: p.display().to_string(),
            source,
        };

        fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        restrict_permissions(&tmp).map_err(|e| io_err(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }

    /// Copy the current store to `<store>.backup.<UTC timestamp>`, preserving
    /// restrictive permissions. Returns the backup path.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::Io`] if the store cannot be copied.
    pub fn backup(&self) -> Result<PathBuf, KeyStoreError> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let backup = PathBuf::from(format!("{}.backup.{stamp}", self.path.display()));
        let io_err = |p: &Path, source| KeyStoreError::Io {
            path: p.display().to_string(),
            source,
        };
        fs::copy(&self.path, &backup).map_err(|e| io_err(&self.path, e))?;
        restrict_permissions(&backup).map_err(|e| io_err(&backup, e))?;
        Ok(backup)
    }

    /// Whether backups are enabled in settings.
    pub fn backup_enabled(&self) -> bool {
        self.backup_enabled
    }

    /// Base KDF iteration count from settings (used for newly generated keys).
    pub fn base_iterations(&self) -> u32 {
        self.base_iterations
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
