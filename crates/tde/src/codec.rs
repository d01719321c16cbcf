//! Record-level encryption: maps whole records to and from their encrypted
//! representation according to the static table configuration.
//!
//! On the write side, each configured, non-empty field value is exchanged for
//! its envelope pair (`<field>_encrypted`, `<field>_iv`) at the same position
//! in the record; the plaintext key disappears entirely. On the read side the
//! inverse happens. Unconfigured columns, empty values, and NULLs pass
//! through untouched, so `encrypt_record ∘ decrypt_record` is the identity on
//! everything the cipher never saw.

use common::{Record, SqlValue, TdeError};
use tracing::debug;

use crate::crypto::cipher::{decrypt_value, encrypt_value, CipherEnvelope};
use crate::keys::KeyManager;

/// Encrypts and decrypts records and single fields.
///
/// Cheaply cloneable; holds only a [`KeyManager`] handle.
#[derive(Clone)]
pub struct RecordCodec {
    pub(crate) keys: KeyManager,
}

impl RecordCodec {
    /// Build a codec over `keys`.
    pub fn new(keys: KeyManager) -> Self {
        Self { keys }
    }

    /// The key manager this codec encrypts with.
    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    /// Encrypt one field value.
    ///
    /// Returns `None` for empty or whitespace-only values — they are stored
    /// as-is, never routed through the cipher.
    ///
    /// # Errors
    ///
    /// Returns [`TdeError::UnknownTable`] / [`TdeError::FieldNotConfigured`]
    /// when the `(table, field)` pair is not in the encryption configuration:
    /// callers asking explicitly for field encryption get a loud answer, not
    /// a silent passthrough.
    pub async fn encrypt_field(
        &self,
        table: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<CipherEnvelope>, TdeError> {
        let cfg = self
            .keys
            .config()
            .table(table)
            .ok_or_else(|| TdeError::UnknownTable(table.to_owned()))?;
        if !cfg.fields.iter().any(|f| f == field) {
            return Err(TdeError::FieldNotConfigured {
                table: table.to_owned(),
                field: field.to_owned(),
            });
        }

        let key = self.keys.table_key(table).await?;
        let envelope = encrypt_value(&key, value);
        if envelope.is_some() {
            debug!(table, field, "field encrypted");
        }
        Ok(envelope)
    }

    /// Decrypt one field value from its envelope parts.
    ///
    /// Returns `""` when either part is absent — an empty field was never
    /// encrypted in the first place.
    ///
    /// # Errors
    ///
    /// Returns [`TdeError::Decryption`] with table/field context on any
    /// cipher failure. The error is typed: it can never be mistaken for
    /// plaintext.
    pub async fn decrypt_field(
        &self,
        table: &str,
        field: &str,
        ciphertext: Option<&[u8]>,
        iv: Option<&[u8]>,
    ) -> Result<String, TdeError> {
        let (Some(ciphertext), Some(iv)) = (ciphertext, iv) else {
            return Ok(String::new());
        };
        if ciphertext.is_empty() || iv.is_empty() {
            return Ok(String::new());
        }

        let cfg = self
            .keys
            .config()
            .table(table)
            .ok_or_else(|| TdeError::UnknownTable(table.to_owned()))?;
        if !cfg.fields.iter().any(|f| f == field) {
            return Err(TdeError::FieldNotConfigured {
                table: table.to_owned(),
                field: field.to_owned(),
            });
        }

        let key = self.keys.table_key(table).await?;
        decrypt_value(&key, ciphertext, iv).map_err(|e| TdeError::Decryption {
            table: table.to_owned(),
            field: field.to_owned(),
            reason: e.to_string(),
        })
    }

    /// Encrypt every configured, non-empty field in `record`.
    ///
    /// Records for tables outside the encryption configuration are returned
    /// unchanged — there is nothing configured to encrypt.
    ///
    /// # Errors
    ///
    /// Returns [`TdeError`] if a table key cannot be fetched.
    pub async fn encrypt_record(&self, table: &str, record: Record) -> Result<Record, TdeError> {
        let Some(cfg) = self.keys.config().table(table) else {
            return Ok(record);
        };
        let key = self.keys.table_key(table).await?;

        let mut out = Record::with_capacity(record.len() + cfg.fields.len());
        for (name, value) in record {
            let configured = cfg.fields.iter().any(|f| *f == name);
            if configured {
                if let Some(plaintext) = value.to_plaintext() {
                    // encrypt_value only declines empty plaintext, which
                    // to_plaintext has already filtered out.
                    if let Some(envelope) = encrypt_value(&key, &plaintext) {
                        out.push(format!("{name}_encrypted"), SqlValue::Blob(envelope.ciphertext));
                        out.push(format!("{name}_iv"), SqlValue::Blob(envelope.iv));
                        continue;
                    }
                }
            }
            // Unconfigured, empty, or NULL: pass through untouched.
            out.push(name, value);
        }
        debug!(table, columns = out.len(), "record encrypted");
        Ok(out)
    }

    /// Reconstruct plaintext fields from envelope pairs in `record`.
    ///
    /// For each configured field whose `<field>_encrypted` and `<field>_iv`
    /// are both populated, the plaintext replaces the field's column:
    /// mid-migration rows that still carry the (possibly scrubbed-to-NULL)
    /// plaintext column get it overwritten in place, rows without one get the
    /// plaintext at the ciphertext column's position. Either way the envelope
    /// columns disappear from the output. Envelope columns that are NULL or
    /// empty stay as they are.
    ///
    /// # Errors
    ///
    /// Returns [`TdeError::Decryption`] on any cipher failure — a corrupt row
    /// surfaces loudly instead of masquerading as data.
    pub async fn decrypt_record(&self, table: &str, record: Record) -> Result<Record, TdeError> {
        let Some(cfg) = self.keys.config().table(table) else {
            return Ok(record);
        };
        let key = self.keys.table_key(table).await?;

        // Decrypt every complete envelope first, then rebuild the record in
        // one ordered pass. The plaintext is an Option so it is emitted only
        // once, at whichever of the field's columns comes first.
        let mut decrypted: Vec<(String, Option<String>)> = Vec::new();
        for field in &cfg.fields {
            let ct = record
                .get(&format!("{field}_encrypted"))
                .and_then(SqlValue::as_nonempty_blob);
            let iv = record
                .get(&format!("{field}_iv"))
                .and_then(SqlValue::as_nonempty_blob);
            if let (Some(ct), Some(iv)) = (ct, iv) {
                let plaintext =
                    decrypt_value(&key, ct, iv).map_err(|e| TdeError::Decryption {
                        table: table.to_owned(),
                        field: field.clone(),
                        reason: e.to_string(),
                    })?;
                decrypted.push((field.clone(), Some(plaintext)));
            }
        }

        let mut out = Record::with_capacity(record.len());
        for (name, value) in record {
            if let Some((field, plaintext)) = decrypted.iter_mut().find(|(f, _)| *f == name) {
                // Leftover plaintext column from before the scrub step: the
                // envelope is authoritative, whatever the column holds.
                if let Some(plaintext) = plaintext.take() {
                    out.push(field.clone(), SqlValue::Text(plaintext));
                }
                continue;
            }
            if let Some(field) = name.strip_suffix("_encrypted") {
                if let Some((field, plaintext)) =
                    decrypted.iter_mut().find(|(f, _)| f == field)
                {
                    if let Some(plaintext) = plaintext.take() {
                        out.push(field.clone(), SqlValue::Text(plaintext));
                    }
                    continue;
                }
            }
            if let Some(field) = name.strip_suffix("_iv") {
                if decrypted.iter().any(|(f, _)| f == field) {
                    continue;
                }
            }
            out.push(name, value);
        }
        Ok(out)
    }
}
