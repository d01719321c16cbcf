//! Transparent interception of statements on their way to storage.
//!
//! The interceptor sits between application code and a [`StorageExecutor`].
//! Writes (`INSERT INTO` / `UPDATE`) with named parameters get their
//! configured fields encrypted before the statement runs; reads get their
//! envelope columns decrypted before rows are handed back. Application code
//! keeps writing plain SQL against plaintext column names in the parameter
//! record — the statement text itself is never rewritten.
//!
//! Read-path table attribution is heuristic: result rows carry no table name,
//! so the interceptor matches each row's columns against per-table signature
//! column sets. Ambiguous or unrecognised rows pass through undecrypted; the
//! [`QueryInterceptor::fetch_all_from`] / [`QueryInterceptor::fetch_one_from`]
//! variants skip the guesswork when the caller knows the table.

use std::collections::HashSet;
use std::sync::OnceLock;

use common::{Params, Record, StorageExecutor, TdeError};
use regex::Regex;
use tracing::{debug, trace};

use crate::codec::RecordCodec;

// Leading statement shape of the two write forms we intercept. Anything else
// (SELECT, DELETE, DDL) passes through untouched.
fn write_target(query: &str) -> Option<&str> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:INSERT\s+INTO|UPDATE)\s+([A-Za-z_][A-Za-z0-9_]*)")
            .unwrap_or_else(|e| unreachable!("invalid statement pattern: {e}"))
    });
    re.captures(query)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Encrypting/decrypting wrapper around a storage executor.
pub struct QueryInterceptor<E> {
    codec: RecordCodec,
    executor: E,
}

impl<E: StorageExecutor> QueryInterceptor<E> {
    /// Wrap `executor` with the given codec.
    pub fn new(codec: RecordCodec, executor: E) -> Self {
        Self { codec, executor }
    }

    /// The wrapped executor.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// The codec used for interception.
    pub fn codec(&self) -> &RecordCodec {
        &self.codec
    }

    /// Execute a statement, encrypting configured fields first when it is an
    /// `INSERT INTO` or `UPDATE` on a configured table with named parameters.
    ///
    /// # Errors
    ///
    /// Returns [`TdeError`] on encryption failure or when the statement
    /// itself fails.
    pub async fn execute(&self, query: &str, params: Params) -> Result<u64, TdeError> {
        let params = match (write_target(query), params) {
            (Some(table), Params::Named(record))
                if self.codec.keys.config().table(table).is_some() =>
            {
                trace!(table, "intercepted write");
                Params::Named(self.codec.encrypt_record(table, record).await?)
            }
            (_, params) => params,
        };
        Ok(self.executor.execute(query, params).await?)
    }

    /// Run a query and decrypt every row whose columns unambiguously match a
    /// configured table's signature.
    ///
    /// # Errors
    ///
    /// Returns [`TdeError`] on decryption failure or when the query fails.
    pub async fn fetch_all(&self, query: &str, params: Params) -> Result<Vec<Record>, TdeError> {
        let rows = self.executor.fetch_all(query, params).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.decrypt_inferred(row).await?);
        }
        Ok(out)
    }

    /// Run a query and decrypt the single result row, if any, using signature
    /// inference.
    ///
    /// # Errors
    ///
    /// Returns [`TdeError`] on decryption failure or when the query fails.
    pub async fn fetch_one(&self, query: &str, params: Params) -> Result<Option<Record>, TdeError> {
        match self.executor.fetch_one(query, params).await? {
            Some(row) => Ok(Some(self.decrypt_inferred(row).await?)),
            None => Ok(None),
        }
    }

    /// Run a query and decrypt every row as rows of `table`, bypassing
    /// signature inference.
    ///
    /// # Errors
    ///
    /// Returns [`TdeError`] on decryption failure or when the query fails.
    pub async fn fetch_all_from(
        &self,
        table: &str,
        query: &str,
        params: Params,
    ) -> Result<Vec<Record>, TdeError> {
        let rows = self.executor.fetch_all(query, params).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.codec.decrypt_record(table, row).await?);
        }
        Ok(out)
    }

    /// Run a query and decrypt the single result row, if any, as a row of
    /// `table`.
    ///
    /// # Errors
    ///
    /// Returns [`TdeError`] on decryption failure or when the query fails.
    pub async fn fetch_one_from(
        &self,
        table: &str,
        query: &str,
        params: Params,
    ) -> Result<Option<Record>, TdeError> {
        match self.executor.fetch_one(query, params).await? {
            Some(row) => Ok(Some(self.codec.decrypt_record(table, row).await?)),
            None => Ok(None),
        }
    }

    async fn decrypt_inferred(&self, row: Record) -> Result<Record, TdeError> {
        let columns: HashSet<&str> = row.column_names().collect();
        match self.codec.keys.config().infer_table(&columns) {
            Some(table) => {
                let table = table.to_owned();
                self.codec.decrypt_record(&table, row).await
            }
            None => {
                debug!("no unambiguous table signature; row passed through");
                Ok(row)
            }
        }
    }
}
