//! Term codec
//!
//! Maps RDF terms to their stored form (dictionary id plus kind, datatype and
//! language side columns) and back. Lexical strings are interned once in the
//! dictionary table; the triple table only ever holds ids and short tags.

use super::types::{BlankNode, Literal, NamedNode, RdfError, Term, TermKind};
use crate::adapter::{Adapter, AdapterError, Row, SqlValue};
use crate::config::TableNames;
use lru::LruCache;
use oxrdf::vocab::xsd;
use rand::Rng;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::num::NonZeroUsize;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

static INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?[0-9]+$").expect("valid regex"));
static DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?[0-9]*\.[0-9]+$").expect("valid regex"));
static DOUBLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?([0-9]+\.[0-9]*|\.[0-9]+|[0-9]+)[eE][+-]?[0-9]+$").expect("valid regex")
});

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// IRI that is not absolute or not well-formed
    #[error("Invalid IRI <{iri}>: {reason}")]
    InvalidIri { iri: String, reason: String },

    /// Term could not be built from stored columns
    #[error(transparent)]
    Rdf(#[from] RdfError),

    /// Dictionary access failed
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// Dictionary insert reported success but produced no row
    #[error("Dictionary did not store {0:?}")]
    NotStored(String),

    /// Unknown `*_type` code in a stored row
    #[error("Unknown term type code {0}")]
    UnknownKind(i64),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Stored representation of one term
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedTerm {
    /// Dictionary id of the lexical value
    pub value_id: i64,
    pub kind: TermKind,
    /// Dictionary id of the datatype IRI, 0 when absent
    pub datatype_id: i64,
    /// Language tag, empty when absent
    pub lang: String,
}

/// Dictionary-backed term encoder/decoder with an LRU id cache
pub struct TermCodec {
    tables: TableNames,
    cache: LruCache<String, i64>,
}

impl TermCodec {
    pub fn new(tables: TableNames, cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            tables,
            cache: LruCache::new(capacity),
        }
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Forget cached ids, needed once the dictionary table is recreated
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Dictionary id for `value`, inserting it when new
    pub fn intern(&mut self, adapter: &mut dyn Adapter, value: &str) -> CodecResult<i64> {
        if let Some(id) = self.lookup(adapter, value)? {
            return Ok(id);
        }
        let sql = format!(
            "INSERT INTO {} (val) VALUES ({})",
            self.tables.id2val,
            adapter.quote(value)
        );
        if adapter.exec(&sql)? == 0 {
            return Err(CodecError::NotStored(value.to_string()));
        }
        let id = adapter.last_insert_id();
        debug!(id, value, "interned dictionary value");
        self.cache.put(value.to_string(), id);
        Ok(id)
    }

    /// Dictionary id for `value` without inserting
    pub fn lookup(&mut self, adapter: &mut dyn Adapter, value: &str) -> CodecResult<Option<i64>> {
        if let Some(id) = self.cache.get(value) {
            return Ok(Some(*id));
        }
        let sql = format!(
            "SELECT id FROM {} WHERE val = {}",
            self.tables.id2val,
            adapter.quote(value)
        );
        let id = adapter
            .fetch_row(&sql)?
            .and_then(|row| row.get("id").and_then(SqlValue::as_i64));
        if let Some(id) = id {
            self.cache.put(value.to_string(), id);
        }
        Ok(id)
    }

    /// Scalar subquery resolving `value` to its id inside generated SQL
    pub fn id_subquery(&self, adapter: &dyn Adapter, value: &str) -> String {
        format!(
            "(SELECT id FROM {} WHERE val = {})",
            self.tables.id2val,
            adapter.quote(value)
        )
    }

    /// Scalar subquery resolving an id column back to its lexical value
    pub fn value_subquery(&self, id_column: &str) -> String {
        format!("(SELECT val FROM {} WHERE id = {})", self.tables.id2val, id_column)
    }

    /// Encode a term for storage, interning every string it needs
    pub fn encode(&mut self, adapter: &mut dyn Adapter, term: &Term) -> CodecResult<EncodedTerm> {
        validate(term)?;
        let value_id = self.intern(adapter, &term.lexical())?;
        let (datatype_id, lang) = match term {
            Term::Literal(lit) => {
                let datatype_id = match lit.datatype() {
                    Some(dt) => self.intern(adapter, dt.as_str())?,
                    None => 0,
                };
                (datatype_id, lit.language().unwrap_or_default().to_string())
            }
            _ => (0, String::new()),
        };
        Ok(EncodedTerm {
            value_id,
            kind: term.kind(),
            datatype_id,
            lang,
        })
    }

    /// Encode a term only if all its strings are already in the dictionary.
    ///
    /// `None` means the term cannot occur in any stored triple.
    pub fn encode_existing(
        &mut self,
        adapter: &mut dyn Adapter,
        term: &Term,
    ) -> CodecResult<Option<EncodedTerm>> {
        let Some(value_id) = self.lookup(adapter, &term.lexical())? else {
            return Ok(None);
        };
        let (datatype_id, lang) = match term {
            Term::Literal(lit) => {
                let datatype_id = match lit.datatype() {
                    Some(dt) => match self.lookup(adapter, dt.as_str())? {
                        Some(id) => id,
                        None => return Ok(None),
                    },
                    None => 0,
                };
                (datatype_id, lit.language().unwrap_or_default().to_string())
            }
            _ => (0, String::new()),
        };
        Ok(Some(EncodedTerm {
            value_id,
            kind: term.kind(),
            datatype_id,
            lang,
        }))
    }

    /// Decode the term stored under column `prefix` (with `<prefix>_type`,
    /// `<prefix>_dt` and `<prefix>_lang` side columns). NULL means unbound.
    pub fn decode(row: &Row, prefix: &str) -> CodecResult<Option<Term>> {
        let Some(value) = row.get(prefix).and_then(SqlValue::as_text) else {
            return Ok(None);
        };
        let code = row
            .get(&format!("{}_type", prefix))
            .and_then(SqlValue::as_i64)
            .unwrap_or(TermKind::Uri.code());
        let kind = TermKind::from_code(code).ok_or(CodecError::UnknownKind(code))?;

        let term = match kind {
            TermKind::Uri => Term::NamedNode(NamedNode::new_unchecked(value)),
            TermKind::BlankNode => {
                let id = value.strip_prefix("_:").unwrap_or(&value);
                Term::BlankNode(BlankNode::new_unchecked(id))
            }
            TermKind::Literal => {
                let lang = row
                    .get(&format!("{}_lang", prefix))
                    .and_then(SqlValue::as_text)
                    .filter(|l| !l.is_empty());
                let datatype = row
                    .get(&format!("{}_dt", prefix))
                    .and_then(SqlValue::as_text)
                    .filter(|d| !d.is_empty());
                match (lang, datatype) {
                    (Some(lang), _) => Term::Literal(Literal::new_language_tagged_literal(value, lang)?),
                    (None, Some(dt)) => {
                        Term::Literal(Literal::new_typed_literal(value, NamedNode::new_unchecked(dt)))
                    }
                    (None, None) => Term::Literal(Literal::new_simple_literal(value)),
                }
            }
        };
        Ok(Some(term))
    }
}

fn validate(term: &Term) -> CodecResult<()> {
    match term {
        Term::NamedNode(n) => check_iri(n.as_str()),
        Term::Literal(lit) => match lit.datatype() {
            Some(dt) => check_iri(dt.as_str()),
            None => Ok(()),
        },
        Term::BlankNode(_) => Ok(()),
    }
}

fn check_iri(iri: &str) -> CodecResult<()> {
    oxiri::Iri::parse(iri)
        .map(|_| ())
        .map_err(|e| CodecError::InvalidIri {
            iri: iri.to_string(),
            reason: e.to_string(),
        })
}

/// Literal for a bare (unquoted) token, inferring its datatype
pub fn infer_literal(token: &str) -> Literal {
    let datatype = if INTEGER.is_match(token) {
        Some(xsd::INTEGER)
    } else if DECIMAL.is_match(token) {
        Some(xsd::DECIMAL)
    } else if DOUBLE.is_match(token) {
        Some(xsd::DOUBLE)
    } else if token == "true" || token == "false" {
        Some(xsd::BOOLEAN)
    } else {
        None
    };
    match datatype {
        Some(dt) => Literal::new_typed_literal(token, dt.into()),
        None => Literal::new_simple_literal(token),
    }
}

/// Per-call blank node naming context.
///
/// Every id is `<session>_<node>`, two random lowercase alphanumeric
/// segments. The same label always maps to the same node within one scope.
pub struct BlankNodeScope {
    session: String,
    labels: FxHashMap<String, BlankNode>,
    issued: FxHashSet<String>,
}

impl BlankNodeScope {
    pub fn new() -> Self {
        Self {
            session: format!("b{}", random_segment(7)),
            labels: FxHashMap::default(),
            issued: FxHashSet::default(),
        }
    }

    /// Node for a source label
    pub fn resolve(&mut self, label: &str) -> BlankNode {
        if let Some(node) = self.labels.get(label) {
            return node.clone();
        }
        let node = self.fresh();
        self.labels.insert(label.to_string(), node.clone());
        node
    }

    /// A node no label maps to
    pub fn fresh(&mut self) -> BlankNode {
        loop {
            let id = format!("{}_{}", self.session, random_segment(8));
            if self.issued.insert(id.clone()) {
                return BlankNode::new_unchecked(id);
            }
        }
    }

    /// Forget label bindings (next template instantiation), keep issued ids
    pub fn reset_labels(&mut self) {
        self.labels.clear();
    }
}

impl Default for BlankNodeScope {
    fn default() -> Self {
        Self::new()
    }
}

fn random_segment(len: usize) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}
