//! Transparent field-level encryption for the records backend.
//!
//! Configured columns are encrypted with AES-256-CBC under per-table subkeys
//! derived from a single persisted master key. Application code talks SQL
//! through a [`QueryInterceptor`]; encryption and decryption happen on the
//! way through, keyed off the static [`config::EncryptionConfig`].

pub mod codec;
pub mod config;
pub mod crypto;
pub mod interceptor;
pub mod keys;
pub mod migrate;
pub mod settings;

pub use codec::RecordCodec;
pub use config::{EncryptionConfig, Sensitivity};
pub use crypto::{CipherEnvelope, CipherError};
pub use interceptor::QueryInterceptor;
pub use keys::{KeyManager, MasterKeyStore};
pub use migrate::MigrationManager;
pub use settings::TdeSettings;
