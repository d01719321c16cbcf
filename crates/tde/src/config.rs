//! Static encryption configuration: which fields of which tables are
//! encrypted, at which sensitivity tier, and how result rows are matched back
//! to their table.
//!
//! The configuration is immutable at runtime. Two independently evolved
//! field-set variants existed historically; the `patients`/`doctors`/
//! `medical_records`/`prescriptions` schema below is the canonical one.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// Sensitivity tier of a table's encrypted fields.
///
/// The tier scales the PBKDF2 iteration count used when deriving the table's
/// subkey, so more sensitive tables cost more to brute-force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    /// 0.5× base iterations.
    Low,
    /// 1× base iterations.
    Medium,
    /// 1.5× base iterations.
    High,
    /// 2× base iterations.
    Critical,
}

impl Sensitivity {
    /// Iteration-count multiplier for this tier.
    pub fn multiplier(self) -> f64 {
        match self {
            Sensitivity::Low => 0.5,
            Sensitivity::Medium => 1.0,
            Sensitivity::High => 1.5,
            Sensitivity::Critical => 2.0,
        }
    }

    /// `base` scaled by [`Sensitivity::multiplier`].
    pub fn scaled_iterations(self, base: u32) -> u32 {
        (base as f64 * self.multiplier()) as u32
    }

    /// Lowercase tier name, as used in salts and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Sensitivity::Low => "low",
            Sensitivity::Medium => "medium",
            Sensitivity::High => "high",
            Sensitivity::Critical => "critical",
        }
    }
}

/// Encryption settings for one logical table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Field names to encrypt, in order. Each gets a `<field>_encrypted` /
    /// `<field>_iv` sibling column pair in storage.
    pub fields: Vec<String>,
    /// Sensitivity tier controlling KDF cost for this table's subkey.
    pub sensitivity: Sensitivity,
    /// Distinguishing subset of column names unique to this table, used to
    /// infer the source table of a result row on the read path.
    pub signature: Vec<String>,
}

/// Immutable table → encryption settings map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    tables: BTreeMap<String, TableConfig>,
}

impl EncryptionConfig {
    /// The built-in canonical configuration for the records schema.
    pub fn builtin() -> Self {
        let mut tables = BTreeMap::new();
        tables.insert(
            "patients".to_owned(),
            TableConfig {
                fields: strings(&["phone", "email", "address"]),
                sensitivity: Sensitivity::High,
                signature: strings(&["first_name", "last_name", "birth_date", "gender"]),
            },
        );
        tables.insert(
            "doctors".to_owned(),
            TableConfig {
                fields: strings(&["phone", "email"]),
                sensitivity: Sensitivity::Medium,
                signature: strings(&["specialization", "license_number"]),
            },
        );
        tables.insert(
            "medical_records".to_owned(),
            TableConfig {
                fields: strings(&["diagnosis", "complaints", "examination_results"]),
                sensitivity: Sensitivity::Critical,
                signature: strings(&["appointment_id", "complaints"]),
            },
        );
        tables.insert(
            "prescriptions".to_owned(),
            TableConfig {
                fields: strings(&["notes"]),
                sensitivity: Sensitivity::Medium,
                signature: strings(&["medication_name", "dosage", "frequency"]),
            },
        );
        Self { tables }
    }

    /// Build a configuration from an explicit table map.
    ///
    /// # Errors
    ///
    /// Returns a descriptive message if any table has no fields or an empty
    /// signature (an empty signature would match every result set).
    pub fn from_tables(tables: BTreeMap<String, TableConfig>) -> Result<Self, String> {
        for (name, cfg) in &tables {
            if cfg.fields.is_empty() {
                return Err(format!("table {name} has no encrypted fields configured"));
            }
            if cfg.signature.is_empty() {
                return Err(format!("table {name} has an empty column signature"));
            }
        }
        Ok(Self { tables })
    }

    /// Look up the configuration for `table`.
    pub fn table(&self, table: &str) -> Option<&TableConfig> {
        self.tables.get(table)
    }

    /// Iterate over `(table name, config)` pairs in deterministic order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TableConfig)> {
        self.tables.iter().map(|(n, c)| (n.as_str(), c))
    }

    /// Number of configured tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns `true` if no tables are configured.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Total number of configured encrypted fields across all tables.
    pub fn total_fields(&self) -> usize {
        self.tables.values().map(|c| c.fields.len()).sum()
    }

    /// Infer which table a result row came from by matching `columns` against
    /// each table's signature.
    ///
    /// Returns the table name only when *exactly one* signature is a subset of
    /// the returned columns. Zero matches means the row is from an
    /// unconfigured table (or columns were aliased away); multiple matches are
    /// ambiguous. Both cases return `None` and the row passes through
    /// undecrypted — correctness over cleverness.
    pub fn infer_table(&self, columns: &HashSet<&str>) -> Option<&str> {
        let mut matched: Option<&str> = None;
        for (name, cfg) in &self.tables {
            if cfg.signature.iter().all(|c| columns.contains(c.as_str())) {
                if matched.is_some() {
                    return None;
                }
                matched = Some(name.as_str());
            }
        }
        matched
    }
}

fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_owned()).collect()
}
