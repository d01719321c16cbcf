//! SQLite implementation of the storage contract.
//!
//! One connection behind an async mutex: the admin tool runs statements
//! sequentially, so there is no pooling. Named parameters are bound leniently
//! — a parameter record may carry more names than the statement references
//! (the encryption layer passes whole records through), and unreferenced
//! names are simply skipped.

use std::path::Path;

use async_trait::async_trait;
use common::{Params, Record, SqlValue, StorageError, StorageExecutor};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, Statement};
use tokio::sync::Mutex;
use tracing::debug;

pub struct SqliteExecutor {
    conn: Mutex<Connection>,
}

impl SqliteExecutor {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)
            .map_err(|e| StorageError::Connection(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "sqlite database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn to_sqlite(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Integer(*i),
        SqlValue::Real(f) => Value::Real(*f),
        SqlValue::Text(s) => Value::Text(s.clone()),
        SqlValue::Blob(b) => Value::Blob(b.clone()),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> Result<SqlValue, StorageError> {
    Ok(match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(t) => SqlValue::Text(
            std::str::from_utf8(t)
                .map_err(|e| StorageError::Query(format!("non-UTF-8 text column: {e}")))?
                .to_owned(),
        ),
        ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
    })
}

fn bind(stmt: &mut Statement<'_>, params: &Params) -> Result<(), StorageError> {
    let q = |e: rusqlite::Error| StorageError::Query(e.to_string());
    match params {
        Params::None => {}
        Params::Positional(values) => {
            for (i, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(i + 1, to_sqlite(value)).map_err(q)?;
            }
        }
        Params::Named(record) => {
            for (name, value) in record.iter() {
                if let Some(idx) = stmt.parameter_index(&format!(":{name}")).map_err(q)? {
                    stmt.raw_bind_parameter(idx, to_sqlite(value)).map_err(q)?;
                }
            }
        }
    }
    Ok(())
}

fn query_rows(stmt: &mut Statement<'_>, params: &Params) -> Result<Vec<Record>, StorageError> {
    let q = |e: rusqlite::Error| StorageError::Query(e.to_string());
    bind(stmt, params)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_owned).collect();

    let mut out = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next().map_err(q)? {
        let mut record = Record::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            record.push(name.clone(), from_sqlite(row.get_ref(i).map_err(q)?)?);
        }
        out.push(record);
    }
    Ok(out)
}

#[async_trait]
impl StorageExecutor for SqliteExecutor {
    async fn execute(&self, query: &str, params: Params) -> Result<u64, StorageError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(query)
            .map_err(|e| StorageError::Query(e.to_string()))?;
        bind(&mut stmt, &params)?;
        let changed = stmt
            .raw_execute()
            .map_err(|e| StorageError::Query(e.to_string()))?;
        Ok(changed as u64)
    }

    async fn fetch_all(&self, query: &str, params: Params) -> Result<Vec<Record>, StorageError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(query)
            .map_err(|e| StorageError::Query(e.to_string()))?;
        query_rows(&mut stmt, &params)
    }

    async fn fetch_one(&self, query: &str, params: Params) -> Result<Option<Record>, StorageError> {
        Ok(self.fetch_all(query, params).await?.into_iter().next())
    }
}
