//! Opaque storage contract the encryption layer is built against.
//!
//! The core never opens connections or manages pools; it is handed something
//! that can run a parameterised statement and hand back rows. Concrete
//! implementations live outside the core (the admin binary ships a SQLite
//! one; tests use an in-memory fake).

use async_trait::async_trait;
use thiserror::Error;

use crate::record::{Record, SqlValue};

/// Parameters accompanying a statement.
///
/// Transparent encryption on the write path only applies to
/// [`Params::Named`] — positional parameters carry no field names, so there
/// is nothing to match against the encryption configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    /// No parameters.
    None,
    /// Positional `?` parameters, bound in order.
    Positional(Vec<SqlValue>),
    /// Named `:name` parameters, bound by column name.
    Named(Record),
}

impl Params {
    /// Returns `true` for [`Params::Named`].
    pub fn is_named(&self) -> bool {
        matches!(self, Params::Named(_))
    }
}

/// Errors surfaced by a storage implementation.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The statement failed to prepare or execute.
    #[error("query failed: {0}")]
    Query(String),

    /// The connection to the underlying store was lost or never established.
    #[error("connection failed: {0}")]
    Connection(String),
}

/// The `execute query, get rows` primitive the encryption layer wraps.
///
/// Mirrors a context-managed cursor: one statement per call, rows come back
/// fully materialised as [`Record`]s with the column order the store produced.
#[async_trait]
pub trait StorageExecutor: Send + Sync {
    /// Execute a statement that returns no rows; returns the affected row count.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the statement fails.
    async fn execute(&self, query: &str, params: Params) -> Result<u64, StorageError>;

    /// Execute a query and fetch every result row.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the query fails.
    async fn fetch_all(&self, query: &str, params: Params) -> Result<Vec<Record>, StorageError>;

    /// Execute a query and fetch at most one row.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the query fails.
    async fn fetch_one(&self, query: &str, params: Params) -> Result<Option<Record>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_params_detected() {
        let mut r = Record::new();
        r.push("phone", "+1-555-0100".into());
        assert!(Params::Named(r).is_named());
        assert!(!Params::None.is_named());
        assert!(!Params::Positional(vec![SqlValue::Integer(1)]).is_named());
    }

    #[test]
    fn storage_error_display() {
        let e = StorageError::Query("no such table: ghosts".into());
        assert!(e.to_string().contains("no such table"));
    }
}
