//! In-memory storage fake for integration tests.
//!
//! Understands just enough SQL to back the encryption layer: `INSERT INTO t`
//! appends the named-parameter record as a row, `UPDATE t ... WHERE id = :id`
//! merges the named parameters into the matching row, and `SELECT * FROM t`
//! returns every row. Update failures can be injected to exercise rollback
//! paths.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use common::{Params, Record, SqlValue, StorageError, StorageExecutor};
use regex::Regex;

#[derive(Default)]
pub struct InMemoryExecutor {
    tables: Mutex<HashMap<String, Vec<Record>>>,
    updates_before_failure: Mutex<Option<u64>>,
}

impl InMemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert rows directly, bypassing SQL. Rows without an `id` column get
    /// a sequential one.
    pub fn seed(&self, table: &str, rows: Vec<Record>) {
        let mut tables = self.tables.lock().unwrap();
        let stored = tables.entry(table.to_owned()).or_default();
        for mut row in rows {
            if row.get("id").is_none() {
                let id = stored.len() as i64 + 1;
                row.push("id", SqlValue::Integer(id));
            }
            stored.push(row);
        }
    }

    /// Snapshot of a table's rows as currently stored.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Let `n` more updates succeed, fail the one after that, then recover.
    /// Models a transient storage fault.
    pub fn fail_updates_after(&self, n: u64) {
        *self.updates_before_failure.lock().unwrap() = Some(n);
    }

    fn table_of<'q>(&self, re: &Regex, query: &'q str) -> Result<&'q str, StorageError> {
        re.captures(query)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .ok_or_else(|| StorageError::Query(format!("unsupported statement: {query}")))
    }
}

fn named(params: Params) -> Result<Record, StorageError> {
    match params {
        Params::Named(r) => Ok(r),
        other => Err(StorageError::Query(format!(
            "fake executor needs named parameters, got {other:?}"
        ))),
    }
}

#[async_trait]
impl StorageExecutor for InMemoryExecutor {
    async fn execute(&self, query: &str, params: Params) -> Result<u64, StorageError> {
        let insert = Regex::new(r"(?i)^\s*INSERT\s+INTO\s+(\w+)").unwrap();
        let update = Regex::new(r"(?i)^\s*UPDATE\s+(\w+)").unwrap();

        if insert.is_match(query) {
            let table = self.table_of(&insert, query)?.to_owned();
            let mut row = named(params)?;
            let mut tables = self.tables.lock().unwrap();
            let stored = tables.entry(table).or_default();
            if row.get("id").is_none() {
                row.push("id", SqlValue::Integer(stored.len() as i64 + 1));
            }
            stored.push(row);
            return Ok(1);
        }

        if update.is_match(query) {
            {
                let mut budget = self.updates_before_failure.lock().unwrap();
                match budget.as_mut() {
                    Some(0) => {
                        *budget = None;
                        return Err(StorageError::Query("injected update failure".into()));
                    }
                    Some(n) => *n -= 1,
                    None => {}
                }
            }
            let table = self.table_of(&update, query)?.to_owned();
            let mut assignments = named(params)?;
            let id = assignments
                .remove("id")
                .ok_or_else(|| StorageError::Query("update without :id".into()))?;

            let mut tables = self.tables.lock().unwrap();
            let stored = tables.entry(table).or_default();
            let mut changed = 0;
            for row in stored.iter_mut() {
                if row.get("id") == Some(&id) {
                    for (col, value) in assignments.clone() {
                        row.insert(col, value);
                    }
                    changed += 1;
                }
            }
            return Ok(changed);
        }

        Err(StorageError::Query(format!(
            "unsupported statement: {query}"
        )))
    }

    async fn fetch_all(&self, query: &str, _params: Params) -> Result<Vec<Record>, StorageError> {
        let select = Regex::new(r"(?i)^\s*SELECT\s+\*\s+FROM\s+(\w+)").unwrap();
        let table = self.table_of(&select, query)?;
        Ok(self.rows(table))
    }

    async fn fetch_one(&self, query: &str, params: Params) -> Result<Option<Record>, StorageError> {
        Ok(self.fetch_all(query, params).await?.into_iter().next())
    }
}
