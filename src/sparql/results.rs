//! Query result envelope
//!
//! What `RdfStore::query` hands back: the query type, the form-specific
//! result and the wall-clock time of the call. Rows keep their terms typed;
//! the flat `"<key>"` / `"<key> type"` / `"<key> datatype"` / `"<key> lang"`
//! view is produced on demand and for JSON output.

use super::ast::QueryForm;
use crate::rdf::{Term, Triple};
use indexmap::IndexMap;
use regex::Regex;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::sync::LazyLock;

static LEADING_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)^(?:\s|#[^\n]*\n)*(?:(?:base\s*<[^>]*>|prefix\s*[^\s:]*:\s*<[^>]*>)(?:\s|#[^\n]*\n)*)*(select|construct|ask|insert|delete)\b",
    )
    .expect("valid regex")
});

/// `query_type` of the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Select,
    Construct,
    Ask,
    Insert,
    Delete,
    Unknown,
}

impl QueryType {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryType::Select => "select",
            QueryType::Construct => "construct",
            QueryType::Ask => "ask",
            QueryType::Insert => "insert",
            QueryType::Delete => "delete",
            QueryType::Unknown => "unknown",
        }
    }

    pub fn from_form(form: &QueryForm) -> Self {
        match form {
            QueryForm::Select { .. } => QueryType::Select,
            QueryForm::Construct => QueryType::Construct,
            QueryForm::Ask => QueryType::Ask,
            QueryForm::Insert => QueryType::Insert,
            QueryForm::Delete => QueryType::Delete,
        }
    }

    /// Guess the type of text that did not parse from its leading keyword
    pub fn sniff(text: &str) -> Self {
        let Some(keyword) = LEADING_KEYWORD.captures(text).and_then(|c| c.get(1)) else {
            return QueryType::Unknown;
        };
        match keyword.as_str().to_ascii_lowercase().as_str() {
            "select" => QueryType::Select,
            "construct" => QueryType::Construct,
            "ask" => QueryType::Ask,
            "insert" => QueryType::Insert,
            "delete" => QueryType::Delete,
            _ => QueryType::Unknown,
        }
    }

    /// Result shape returned when the query failed
    pub fn empty_result(self, variables: Vec<String>) -> QueryResult {
        match self {
            QueryType::Select => QueryResult::Bindings {
                variables,
                rows: Vec::new(),
            },
            QueryType::Construct => QueryResult::Graph(Vec::new()),
            QueryType::Ask => QueryResult::Boolean(false),
            QueryType::Insert | QueryType::Delete => QueryResult::Update { t_count: 0 },
            QueryType::Unknown => QueryResult::Bindings {
                variables: Vec::new(),
                rows: Vec::new(),
            },
        }
    }
}

/// One solution: output key to bound term, unbound keys absent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRow {
    cells: IndexMap<String, Term>,
}

impl ResultRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row with `s`, `p` and `o` keys
    pub fn from_triple(triple: &Triple) -> Self {
        let mut row = Self::new();
        row.insert("s", triple.subject.clone().into());
        row.insert("p", triple.predicate.clone().into());
        row.insert("o", triple.object.clone());
        row
    }

    pub fn insert(&mut self, key: impl Into<String>, term: Term) {
        self.cells.insert(key.into(), term);
    }

    pub fn get(&self, key: &str) -> Option<&Term> {
        self.cells.get(key)
    }

    /// Lexical value of `key`
    pub fn value(&self, key: &str) -> Option<String> {
        self.cells.get(key).map(Term::lexical)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Term)> {
        self.cells.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Flat string view with the `type` / `datatype` / `lang` suffix keys
    pub fn to_flat_map(&self) -> IndexMap<String, String> {
        let mut flat = IndexMap::with_capacity(self.cells.len() * 2);
        for (key, term) in &self.cells {
            flat.insert(key.clone(), term.lexical());
            flat.insert(format!("{} type", key), term.kind().label().to_string());
            if let Term::Literal(lit) = term {
                if let Some(dt) = lit.datatype() {
                    flat.insert(format!("{} datatype", key), dt.as_str().to_string());
                }
                if let Some(lang) = lit.language() {
                    flat.insert(format!("{} lang", key), lang.to_string());
                }
            }
        }
        flat
    }
}

impl Serialize for ResultRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_flat_map().serialize(serializer)
    }
}

/// Form-specific result
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// SELECT solutions
    Bindings {
        variables: Vec<String>,
        rows: Vec<ResultRow>,
    },
    /// CONSTRUCT output, not stored
    Graph(Vec<Triple>),
    /// ASK answer
    Boolean(bool),
    /// INSERT / DELETE affected triples
    Update { t_count: u64 },
}

impl QueryResult {
    pub fn variables(&self) -> &[String] {
        match self {
            QueryResult::Bindings { variables, .. } => variables,
            _ => &[],
        }
    }

    /// SELECT rows, or one `s`/`p`/`o` row per CONSTRUCT triple
    pub fn rows(&self) -> Vec<ResultRow> {
        match self {
            QueryResult::Bindings { rows, .. } => rows.clone(),
            QueryResult::Graph(triples) => triples.iter().map(ResultRow::from_triple).collect(),
            _ => Vec::new(),
        }
    }

    pub fn triples(&self) -> &[Triple] {
        match self {
            QueryResult::Graph(triples) => triples,
            _ => &[],
        }
    }

    pub fn boolean(&self) -> Option<bool> {
        match self {
            QueryResult::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn t_count(&self) -> Option<u64> {
        match self {
            QueryResult::Update { t_count } => Some(*t_count),
            _ => None,
        }
    }
}

impl Serialize for QueryResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            QueryResult::Bindings { variables, rows } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("variables", variables)?;
                map.serialize_entry("rows", rows)?;
                map.end()
            }
            QueryResult::Graph(triples) => {
                let mut seq = serializer.serialize_seq(Some(triples.len()))?;
                for triple in triples {
                    seq.serialize_element(&ResultRow::from_triple(triple))?;
                }
                seq.end()
            }
            QueryResult::Boolean(b) => serializer.serialize_bool(*b),
            QueryResult::Update { t_count } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("t_count", t_count)?;
                map.end()
            }
        }
    }
}

/// Result of one `query()` call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultEnvelope {
    pub query_type: QueryType,
    pub result: QueryResult,
    /// Seconds spent in the call
    pub query_time: f64,
}

impl ResultEnvelope {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn rows(&self) -> Vec<ResultRow> {
        self.result.rows()
    }

    pub fn variables(&self) -> &[String] {
        self.result.variables()
    }
}
