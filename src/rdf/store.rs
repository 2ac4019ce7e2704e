//! RDF store over a relational backend
//!
//! `RdfStore` owns the adapter, the term codec, the query parser and the
//! diagnostics sink of one store instance. Every call runs to completion on
//! the calling thread; failures end up in `errors()` / `warnings()` rather
//! than in the return value.

use super::codec::TermCodec;
use super::types::{NamedNode, Triple};
use crate::adapter::{Adapter, AdapterError, SqliteAdapter};
use crate::config::{ConfigError, StoreConfig};
use crate::sparql::diagnostics::Diagnostics;
use crate::sparql::executor::SparqlExecutor;
use crate::sparql::handlers::{HandlerContext, InsertQueryHandler, QueryHandler};
use crate::sparql::parser::SparqlParser;
use crate::sparql::results::ResultEnvelope;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Store construction errors
#[derive(Error, Debug)]
pub enum RdfStoreError {
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type RdfStoreResult<T> = Result<T, RdfStoreError>;

/// Triple store with a SPARQL front end
pub struct RdfStore<A: Adapter> {
    adapter: A,
    codec: TermCodec,
    diagnostics: Diagnostics,
    parser: SparqlParser,
    config: StoreConfig,
}

impl<A: Adapter> RdfStore<A> {
    /// Wrap an adapter whose tables already exist
    pub fn new(adapter: A, config: StoreConfig) -> Self {
        let mut parser = SparqlParser::new().with_default_base(config.base_iri.clone());
        for (prefix, iri) in &config.prefixes {
            parser = parser.with_prefix(prefix.clone(), iri.clone());
        }
        info!(
            tables = %config.table_prefix,
            prefixes = config.prefixes.len(),
            "RDF store ready"
        );
        Self {
            codec: TermCodec::new(config.tables(), config.dictionary_cache_size),
            adapter,
            diagnostics: Diagnostics::new(),
            parser,
            config,
        }
    }

    /// Run one SPARQL query. Never fails: problems are recorded in
    /// [`errors`](Self::errors) and [`warnings`](Self::warnings) and the
    /// envelope carries the empty result for the query's form.
    pub fn query(&mut self, text: &str) -> ResultEnvelope {
        let ctx = HandlerContext::new(&mut self.adapter, &mut self.codec, &mut self.diagnostics);
        SparqlExecutor::new(ctx, &self.parser).execute(text)
    }

    /// Store triples into `graph` (default graph when `None`); returns how
    /// many were new
    pub fn insert(&mut self, triples: &[Triple], graph: Option<&NamedNode>) -> u64 {
        let handler = InsertQueryHandler;
        let mut ctx = HandlerContext::new(&mut self.adapter, &mut self.codec, &mut self.diagnostics);
        match handler.store_all(&mut ctx, triples, graph) {
            Ok(stored) => stored,
            Err(e) => {
                self.diagnostics.error(e.to_string(), handler.name());
                0
            }
        }
    }

    pub fn errors(&self) -> &[String] {
        self.diagnostics.errors()
    }

    pub fn warnings(&self) -> &[String] {
        self.diagnostics.warnings()
    }

    pub fn clear_diagnostics(&mut self) {
        self.diagnostics.clear();
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }
}

impl RdfStore<SqliteAdapter> {
    /// Store in a fresh in-memory SQLite database
    pub fn open_in_memory(config: StoreConfig) -> RdfStoreResult<Self> {
        config.validate()?;
        let mut adapter = SqliteAdapter::in_memory()?;
        adapter.setup(&config.tables())?;
        Ok(Self::new(adapter, config))
    }

    /// Store in a SQLite file, creating the tables when missing
    pub fn open<P: AsRef<Path>>(path: P, config: StoreConfig) -> RdfStoreResult<Self> {
        config.validate()?;
        let mut adapter = SqliteAdapter::open(&path)?;
        adapter.setup(&config.tables())?;
        info!("Opened SQLite store at {:?}", path.as_ref());
        Ok(Self::new(adapter, config))
    }

    /// Drop every triple and dictionary entry
    pub fn reset(&mut self) -> RdfStoreResult<()> {
        let tables = self.config.tables();
        self.adapter.drop_tables(&tables)?;
        self.adapter.setup(&tables)?;
        self.codec.clear_cache();
        info!("Store reset");
        Ok(())
    }
}
