//! SQLite adapter
//!
//! Reference implementation of [`Adapter`] over `rusqlite`, plus schema
//! provisioning for the triple and dictionary tables.
//!
//! # Usage
//!
//! ```ignore
//! use sparqlstore::adapter::SqliteAdapter;
//! use sparqlstore::StoreConfig;
//!
//! let config = StoreConfig::default();
//! let mut adapter = SqliteAdapter::in_memory()?;
//! adapter.setup(&config.tables())?;
//! ```

use super::{Adapter, AdapterError, AdapterResult, Row, SqlValue};
use crate::config::TableNames;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// SQLite-backed adapter
pub struct SqliteAdapter {
    conn: Connection,
    last_error: Option<String>,
    /// Executed statements, kept only when logging is enabled
    query_log: Option<Vec<String>>,
}

impl SqliteAdapter {
    /// Open (or create) a database file
    pub fn open<P: AsRef<Path>>(path: P) -> AdapterResult<Self> {
        let conn = Connection::open(path).map_err(connection_error)?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database
    pub fn in_memory() -> AdapterResult<Self> {
        let conn = Connection::open_in_memory().map_err(connection_error)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> AdapterResult<Self> {
        register_regexp(&conn).map_err(connection_error)?;
        Ok(Self {
            conn,
            last_error: None,
            query_log: None,
        })
    }

    /// Keep a copy of every statement sent to the database
    pub fn with_query_log(mut self) -> Self {
        self.query_log = Some(Vec::new());
        self
    }

    /// Logged statements, oldest first (empty when logging is off)
    pub fn queries(&self) -> &[String] {
        self.query_log.as_deref().unwrap_or(&[])
    }

    pub fn clear_queries(&mut self) {
        if let Some(log) = self.query_log.as_mut() {
            log.clear();
        }
    }

    /// Create the triple and dictionary tables if they are missing
    pub fn setup(&mut self, tables: &TableNames) -> AdapterResult<()> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {triple} (
                t INTEGER PRIMARY KEY AUTOINCREMENT,
                g INTEGER NOT NULL DEFAULT 0,
                s INTEGER NOT NULL,
                s_type INTEGER NOT NULL DEFAULT 0,
                p INTEGER NOT NULL,
                o INTEGER NOT NULL,
                o_type INTEGER NOT NULL DEFAULT 0,
                o_dt INTEGER NOT NULL DEFAULT 0,
                o_lang TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS {triple}_s ON {triple}(s);
            CREATE INDEX IF NOT EXISTS {triple}_po ON {triple}(p, o);
            CREATE INDEX IF NOT EXISTS {triple}_o ON {triple}(o);

            CREATE TABLE IF NOT EXISTS {id2val} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                val TEXT NOT NULL UNIQUE
            );
            "#,
            triple = tables.triple,
            id2val = tables.id2val,
        );
        self.batch(&ddl)
    }

    /// Drop both tables
    pub fn drop_tables(&mut self, tables: &TableNames) -> AdapterResult<()> {
        let ddl = format!(
            "DROP TABLE IF EXISTS {}; DROP TABLE IF EXISTS {};",
            tables.triple, tables.id2val
        );
        self.batch(&ddl)
    }

    fn batch(&mut self, sql: &str) -> AdapterResult<()> {
        self.log(sql);
        self.conn
            .execute_batch(sql)
            .map_err(|e| self.record_error(e))
    }

    fn log(&mut self, sql: &str) {
        debug!(sql, "sqlite statement");
        if let Some(log) = self.query_log.as_mut() {
            log.push(sql.to_string());
        }
    }

    fn record_error(&mut self, err: rusqlite::Error) -> AdapterError {
        let message = match &err {
            rusqlite::Error::SqliteFailure(_, Some(msg)) => msg.clone(),
            other => other.to_string(),
        };
        debug!(error = %message, "sqlite statement failed");
        self.last_error = Some(message.clone());
        AdapterError::Statement(message)
    }

    fn collect_rows(&self, sql: &str, max_rows: Option<usize>) -> rusqlite::Result<Vec<Row>> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                record.insert(name.clone(), to_sql_value(row.get_ref(i)?));
            }
            out.push(record);
            if max_rows.is_some_and(|max| out.len() >= max) {
                break;
            }
        }
        Ok(out)
    }
}

impl Adapter for SqliteAdapter {
    fn escape(&self, value: &str) -> String {
        value.replace('\'', "''")
    }

    fn fetch_list(&mut self, sql: &str) -> AdapterResult<Vec<Row>> {
        self.log(sql);
        self.collect_rows(sql, None).map_err(|e| self.record_error(e))
    }

    fn fetch_row(&mut self, sql: &str) -> AdapterResult<Option<Row>> {
        self.log(sql);
        self.collect_rows(sql, Some(1))
            .map(|rows| rows.into_iter().next())
            .map_err(|e| self.record_error(e))
    }

    fn exec(&mut self, sql: &str) -> AdapterResult<u64> {
        self.log(sql);
        self.conn
            .execute(sql, [])
            .map(|n| n as u64)
            .map_err(|e| self.record_error(e))
    }

    fn last_insert_id(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    fn error_message(&self) -> Option<String> {
        self.last_error.clone()
    }
}

fn connection_error(err: rusqlite::Error) -> AdapterError {
    AdapterError::Connection(err.to_string())
}

fn to_sql_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(r) => SqlValue::Real(r),
        ValueRef::Text(t) | ValueRef::Blob(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
    }
}

/// `X REGEXP Y` calls `regexp(Y, X)`; the compiled pattern is cached per statement.
fn register_regexp(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: Arc<Regex> = ctx.get_or_create_aux(0, |value| -> Result<Regex, BoxError> {
                Ok(Regex::new(value.as_str()?)?)
            })?;
            let text = match ctx.get_raw(1) {
                ValueRef::Null => return Ok(None),
                value => value
                    .as_str()
                    .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?,
            };
            Ok(Some(pattern.is_match(text)))
        },
    )
}
