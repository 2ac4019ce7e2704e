//! Prefix table for prefixed names
//!
//! Layered the way queries see it: the well-known vocabularies first, then
//! prefixes from the store configuration, then the query's own `PREFIX`
//! declarations. A later binding of the same prefix replaces the earlier one.

use oxrdf::vocab::{rdf, xsd};
use rustc_hash::FxHashMap;
use thiserror::Error;

const RDFS: &str = "http://www.w3.org/2000/01/rdf-schema#";
const OWL: &str = "http://www.w3.org/2002/07/owl#";
const FOAF: &str = "http://xmlns.com/foaf/0.1/";
const DC: &str = "http://purl.org/dc/elements/1.1/";
const DCTERMS: &str = "http://purl.org/dc/terms/";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrefixError {
    #[error("Unknown prefix: {0}")]
    UnknownPrefix(String),
}

pub type PrefixResult<T> = Result<T, PrefixError>;

#[derive(Debug, Clone)]
pub struct NamespaceManager {
    prefixes: FxHashMap<String, String>,
}

impl NamespaceManager {
    /// Table holding `rdf:`, `rdfs:`, `xsd:`, `owl:`, `foaf:`, `dc:` and `dcterms:`
    pub fn new() -> Self {
        let rdf_ns = rdf::TYPE.as_str().trim_end_matches("type");
        let xsd_ns = xsd::STRING.as_str().trim_end_matches("string");
        let mut prefixes = FxHashMap::default();
        let well_known = [
            ("rdf", rdf_ns),
            ("rdfs", RDFS),
            ("xsd", xsd_ns),
            ("owl", OWL),
            ("foaf", FOAF),
            ("dc", DC),
            ("dcterms", DCTERMS),
        ];
        for (prefix, iri) in well_known {
            prefixes.insert(prefix.to_string(), iri.to_string());
        }
        Self { prefixes }
    }

    /// Bind `prefix`, replacing any earlier binding
    pub fn add_prefix(&mut self, prefix: impl Into<String>, iri: impl Into<String>) {
        self.prefixes.insert(prefix.into(), iri.into());
    }

    /// Namespace IRI bound to `prefix`
    pub fn get_iri(&self, prefix: &str) -> PrefixResult<&str> {
        self.prefixes
            .get(prefix)
            .map(String::as_str)
            .ok_or_else(|| PrefixError::UnknownPrefix(prefix.to_string()))
    }

    /// `prefix:local` as a full IRI
    pub fn expand(&self, prefix: &str, local: &str) -> PrefixResult<String> {
        Ok(format!("{}{}", self.get_iri(prefix)?, local))
    }
}

impl Default for NamespaceManager {
    fn default() -> Self {
        Self::new()
    }
}
