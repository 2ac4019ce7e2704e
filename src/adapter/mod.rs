//! Relational adapter contract
//!
//! The query engine never talks to a database directly. Everything it needs
//! goes through [`Adapter`]: escaping, row fetching, statement execution and
//! the last generated id. [`sqlite::SqliteAdapter`] is the reference backend.

pub mod sqlite;

use indexmap::IndexMap;
use std::fmt;
use thiserror::Error;

pub use sqlite::SqliteAdapter;

/// Adapter errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    /// The backend rejected or failed a statement; carries the backend message
    #[error("{0}")]
    Statement(String),

    /// The backend could not be opened or provisioned
    #[error("Connection error: {0}")]
    Connection(String),
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// A single column value as returned by the backend
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Integer view; text holding a number is accepted since some backends
    /// hand every column back as a string.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            SqlValue::Real(r) => Some(*r as i64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            SqlValue::Null => None,
        }
    }

    /// String view; `None` only for NULL
    pub fn as_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Integer(i) => Some(i.to_string()),
            SqlValue::Real(r) => Some(r.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Integer(i) => write!(f, "{}", i),
            SqlValue::Real(r) => write!(f, "{}", r),
            SqlValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One fetched row, keyed by column alias in select-list order
pub type Row = IndexMap<String, SqlValue>;

/// Database adapter consumed by the query engine
pub trait Adapter {
    /// Escape a value for use inside a single-quoted SQL string literal.
    /// The result carries no surrounding quotes.
    fn escape(&self, value: &str) -> String;

    /// Run a query and collect every row
    fn fetch_list(&mut self, sql: &str) -> AdapterResult<Vec<Row>>;

    /// Run a query and return its first row, if any
    fn fetch_row(&mut self, sql: &str) -> AdapterResult<Option<Row>>;

    /// Execute a statement and return the number of affected rows
    fn exec(&mut self, sql: &str) -> AdapterResult<u64>;

    /// Id generated by the most recent successful insert
    fn last_insert_id(&self) -> i64;

    /// Message of the most recent failure, if any
    fn error_message(&self) -> Option<String>;

    /// Escaped value wrapped in single quotes
    fn quote(&self, value: &str) -> String {
        format!("'{}'", self.escape(value))
    }
}
