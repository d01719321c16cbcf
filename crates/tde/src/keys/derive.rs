//! Deterministic derivation of per-table subkeys from the master key.
//!
//! `salt = SHA-256("tde_medical_system_<table>_<tier>_2024")[..16]`,
//! `iterations = stored base × tier multiplier`,
//! `subkey = PBKDF2-HMAC-SHA256(master, salt, iterations, 32 bytes)`.
//!
//! Derivation is pure: the same master key, table, and tier always produce
//! the same subkey, so subkeys are never persisted — they are recomputed at
//! startup and after rotation.

use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};

use super::{KeyBytes, MasterKey, TableKey};
use crate::config::Sensitivity;
use crate::crypto::KEY_LEN;

/// Byte length of the PBKDF2 salt (128 bits).
pub const SALT_LEN: usize = 16;

// Fixed context string baked into every salt. Changing it orphans all
// existing ciphertext.
const SALT_CONTEXT: &str = "tde_medical_system";
const SALT_EPOCH: &str = "2024";

/// Compute the salt for a `(table, tier)` pair.
pub fn table_salt(table: &str, sensitivity: Sensitivity) -> [u8; SALT_LEN] {
    let context = format!("{SALT_CONTEXT}_{table}_{}_{SALT_EPOCH}", sensitivity.as_str());
    let digest = Sha256::digest(context.as_bytes());
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&digest[..SALT_LEN]);
    salt
}

/// Derive the subkey for one table.
///
/// The iteration base comes from the master key's stored metadata, not from
/// live settings, so previously written ciphertext stays decryptable even if
/// the configured base changes.
pub fn derive_table_key(master: &MasterKey, table: &str, sensitivity: Sensitivity) -> TableKey {
    let salt = table_salt(table, sensitivity);
    let iterations = sensitivity.scaled_iterations(master.iterations);

    let mut out = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(master.secret(), &salt, iterations, &mut out);
    TableKey::new(KeyBytes::new(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::MasterKeyStore;
    use crate::settings::TdeSettings;

    fn test_master() -> MasterKey {
        let settings = TdeSettings {
            master_key_file: std::env::temp_dir().join("unused"),
            base_iterations: 1_000,
            ..TdeSettings::default()
        };
        MasterKeyStore::new(&settings).generate()
    }

    #[test]
    fn derivation_is_deterministic() {
        let master = test_master();
        let a = derive_table_key(&master, "patients", Sensitivity::High);
        let b = derive_table_key(&master, "patients", Sensitivity::High);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_tables_get_different_keys() {
        let master = test_master();
        let patients = derive_table_key(&master, "patients", Sensitivity::High);
        let doctors = derive_table_key(&master, "doctors", Sensitivity::High);
        assert_ne!(patients.as_bytes(), doctors.as_bytes());
    }

    #[test]
    fn different_tiers_get_different_keys() {
        let master = test_master();
        let high = derive_table_key(&master, "patients", Sensitivity::High);
        let low = derive_table_key(&master, "patients", Sensitivity::Low);
        assert_ne!(high.as_bytes(), low.as_bytes());
    }

    #[test]
    fn different_masters_get_different_keys() {
        let a = derive_table_key(&test_master(), "patients", Sensitivity::High);
        let b = derive_table_key(&test_master(), "patients", Sensitivity::High);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn salt_is_stable_and_tier_specific() {
        let a = table_salt("patients", Sensitivity::High);
        assert_eq!(a, table_salt("patients", Sensitivity::High));
        assert_ne!(a, table_salt("patients", Sensitivity::Critical));
        assert_ne!(a, table_salt("doctors", Sensitivity::High));
    }
}
