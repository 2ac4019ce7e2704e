//! SPARQL triple store over relational databases
//!
//! RDF triples are kept in two tables, a term dictionary and a triple table
//! of dictionary ids, reached through the [`adapter::Adapter`] trait. SPARQL
//! queries are parsed, planned into SQL joins and executed in one pass; the
//! result comes back as a [`ResultEnvelope`] and every problem met on the way
//! is recorded on the store instead of being returned as an error.
//!
//! # Query forms
//!
//! - SELECT (with DISTINCT, ORDER BY, LIMIT, OFFSET), CONSTRUCT, ASK
//! - INSERT DATA / INSERT INTO <g> { ... } and the WHERE-driven forms
//! - DELETE DATA, DELETE ... WHERE, DELETE FROM <g>
//! - Graph patterns with OPTIONAL, UNION and FILTER
//!
//! ## Example Usage
//!
//! ```rust
//! use sparqlstore::{RdfStore, StoreConfig};
//!
//! let mut store = RdfStore::open_in_memory(StoreConfig::default()).unwrap();
//! store.query(r#"
//!     PREFIX foaf: <http://xmlns.com/foaf/0.1/>
//!     INSERT DATA { <http://example.org/alice> foaf:name "Alice" }
//! "#);
//!
//! let envelope = store.query(r#"
//!     PREFIX foaf: <http://xmlns.com/foaf/0.1/>
//!     SELECT ?name WHERE { ?person foaf:name ?name }
//! "#);
//! assert_eq!(envelope.rows()[0].value("name").as_deref(), Some("Alice"));
//! assert!(store.errors().is_empty());
//! ```

pub mod adapter;
pub mod config;
pub mod rdf;
pub mod sparql;

pub use adapter::{Adapter, AdapterError, AdapterResult, Row, SqlValue, SqliteAdapter};
pub use config::{ConfigError, ConfigResult, StoreConfig, TableNames};
pub use rdf::{
    BlankNode, Literal, NamedNode, RdfError, RdfResult, RdfStore, RdfStoreError, RdfStoreResult, Subject, Term,
    TermKind, Triple,
};
pub use sparql::{QueryResult, QueryType, ResultEnvelope, ResultRow};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}
