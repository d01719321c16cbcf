//! Column/value model for rows exchanged with the storage layer.
//!
//! A [`Record`] is an *ordered* mapping of column name → [`SqlValue`], as read
//! from or written to storage. Column order is preserved so that encrypted
//! envelope columns land where the plaintext column was, and result rows come
//! back to callers in the shape the database produced them.

use serde::{Deserialize, Serialize};

/// A single SQL-typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// Double-precision float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Binary column (ciphertext and IV columns are BLOBs).
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Returns `true` for [`SqlValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Borrow the text content, if this is a [`SqlValue::Text`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Borrow the blob content, if this is a non-empty [`SqlValue::Blob`].
    ///
    /// An empty blob is treated like NULL: envelope columns are only
    /// meaningful when both ciphertext and IV are actually populated.
    pub fn as_nonempty_blob(&self) -> Option<&[u8]> {
        match self {
            SqlValue::Blob(b) if !b.is_empty() => Some(b.as_slice()),
            _ => None,
        }
    }

    /// Render this value as encryption-eligible plaintext.
    ///
    /// Returns `None` for NULL, blobs, and empty or whitespace-only text —
    /// those values are never routed through the cipher. Numbers are
    /// stringified, matching how they would be stored in a text column.
    pub fn to_plaintext(&self) -> Option<String> {
        match self {
            SqlValue::Text(s) if !s.trim().is_empty() => Some(s.clone()),
            SqlValue::Integer(i) => Some(i.to_string()),
            SqlValue::Real(r) => Some(r.to_string()),
            _ => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Integer(i)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(b: Vec<u8>) -> Self {
        SqlValue::Blob(b)
    }
}

/// An ordered column → value mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    columns: Vec<(String, SqlValue)>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty record with space for `capacity` columns.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
        }
    }

    /// Append a column at the end. Does not check for duplicates; use
    /// [`Record::insert`] when the column may already exist.
    pub fn push(&mut self, name: impl Into<String>, value: SqlValue) {
        self.columns.push((name.into(), value));
    }

    /// Replace the value of `name` in place, or append it if absent.
    pub fn insert(&mut self, name: impl Into<String>, value: SqlValue) {
        let name = name.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.columns.push((name, value)),
        }
    }

    /// Look up a column by name.
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Remove a column by name, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<SqlValue> {
        let idx = self.columns.iter().position(|(n, _)| n == name)?;
        Some(self.columns.remove(idx).1)
    }

    /// Returns `true` if the column exists (even if NULL).
    pub fn contains_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    /// Iterate over column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    /// Iterate over `(name, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the record has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl IntoIterator for Record {
    type Item = (String, SqlValue);
    type IntoIter = std::vec::IntoIter<(String, SqlValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

impl FromIterator<(String, SqlValue)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, SqlValue)>>(iter: T) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_insertion_order() {
        let mut r = Record::new();
        r.push("first_name", "Ann".into());
        r.push("phone", "+1-555-0100".into());
        r.push("id", SqlValue::Integer(1));
        let names: Vec<&str> = r.column_names().collect();
        assert_eq!(names, vec!["first_name", "phone", "id"]);
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut r = Record::new();
        r.push("a", SqlValue::Integer(1));
        r.push("b", SqlValue::Integer(2));
        r.insert("a", SqlValue::Integer(9));
        assert_eq!(r.get("a"), Some(&SqlValue::Integer(9)));
        let names: Vec<&str> = r.column_names().collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn remove_returns_value() {
        let mut r = Record::new();
        r.push("phone", "+1-555-0100".into());
        assert_eq!(r.remove("phone"), Some(SqlValue::Text("+1-555-0100".into())));
        assert!(r.is_empty());
        assert_eq!(r.remove("phone"), None);
    }

    #[test]
    fn empty_blob_is_not_an_envelope_part() {
        assert!(SqlValue::Blob(vec![]).as_nonempty_blob().is_none());
        assert!(SqlValue::Blob(vec![1]).as_nonempty_blob().is_some());
        assert!(SqlValue::Null.as_nonempty_blob().is_none());
    }

    #[test]
    fn plaintext_rendering() {
        assert_eq!(SqlValue::Text("x".into()).to_plaintext().as_deref(), Some("x"));
        assert_eq!(SqlValue::Text("   ".into()).to_plaintext(), None);
        assert_eq!(SqlValue::Text(String::new()).to_plaintext(), None);
        assert_eq!(SqlValue::Integer(42).to_plaintext().as_deref(), Some("42"));
        assert_eq!(SqlValue::Null.to_plaintext(), None);
        assert_eq!(SqlValue::Blob(vec![1, 2]).to_plaintext(), None);
    }

    #[test]
    fn serde_round_trip() {
        let mut r = Record::new();
        r.push("diagnosis", "acute bronchitis".into());
        r.push("diagnosis_iv", SqlValue::Blob(vec![0u8; 16]));
        let json = serde_json::to_string(&r).unwrap();
        let decoded: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, r);
    }
}
