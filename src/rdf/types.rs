//! RDF type definitions
//!
//! Wrapper types around the oxrdf primitives, narrowed to the term model the
//! store persists: IRIs, blank nodes and literals carrying either a datatype
//! or a language tag (never both).

use oxrdf::{
    BlankNode as OxBlankNode,
    Literal as OxLiteral,
    NamedNode as OxNamedNode,
};
use std::fmt;
use thiserror::Error;

/// RDF errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RdfError {
    /// Invalid IRI
    #[error("Invalid IRI: {0}")]
    InvalidIri(String),

    /// Invalid blank node
    #[error("Invalid blank node: {0}")]
    InvalidBlankNode(String),

    /// Invalid literal
    #[error("Invalid literal: {0}")]
    InvalidLiteral(String),

    /// A term in a position RDF does not allow (literal subject, blank predicate...)
    #[error("Invalid {position} term: {term}")]
    InvalidPosition { position: &'static str, term: String },
}

pub type RdfResult<T> = Result<T, RdfError>;

/// Named node (IRI)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedNode(OxNamedNode);

impl NamedNode {
    /// Create a new named node, validating the IRI
    pub fn new(iri: &str) -> RdfResult<Self> {
        OxNamedNode::new(iri)
            .map(Self)
            .map_err(|e| RdfError::InvalidIri(format!("{} ({})", iri, e)))
    }

    /// Create a named node without validation.
    ///
    /// Used for values read back from the dictionary and for IRIs taken from
    /// query text, which are validated by the codec only when stored.
    pub fn new_unchecked(iri: impl Into<String>) -> Self {
        Self(OxNamedNode::new_unchecked(iri))
    }

    /// Get the IRI string
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for NamedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.as_str())
    }
}

impl From<oxrdf::NamedNodeRef<'_>> for NamedNode {
    fn from(node: oxrdf::NamedNodeRef<'_>) -> Self {
        Self(node.into_owned())
    }
}

/// Blank node (store-local anonymous node)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlankNode(OxBlankNode);

impl BlankNode {
    /// Create a blank node from an identifier (without the `_:` prefix)
    pub fn new(id: &str) -> RdfResult<Self> {
        OxBlankNode::new(id)
            .map(Self)
            .map_err(|e| RdfError::InvalidBlankNode(format!("{} ({})", id, e)))
    }

    pub(crate) fn new_unchecked(id: impl Into<String>) -> Self {
        Self(OxBlankNode::new_unchecked(id))
    }

    /// Get the blank node identifier
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for BlankNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_:{}", self.as_str())
    }
}

/// RDF literal value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Literal(OxLiteral);

impl Literal {
    /// Create a simple literal (plain string)
    pub fn new_simple_literal(value: impl Into<String>) -> Self {
        Self(OxLiteral::new_simple_literal(value))
    }

    /// Create a literal with language tag
    pub fn new_language_tagged_literal(value: impl Into<String>, language: impl Into<String>) -> RdfResult<Self> {
        OxLiteral::new_language_tagged_literal(value, language)
            .map(Self)
            .map_err(|e| RdfError::InvalidLiteral(e.to_string()))
    }

    /// Create a typed literal
    pub fn new_typed_literal(value: impl Into<String>, datatype: NamedNode) -> Self {
        Self(OxLiteral::new_typed_literal(value, datatype.0))
    }

    /// Get the lexical value
    pub fn value(&self) -> &str {
        self.0.value()
    }

    /// Get the language tag if present
    pub fn language(&self) -> Option<&str> {
        self.0.language()
    }

    /// Get the explicit datatype.
    ///
    /// Plain and language-tagged literals have none; `xsd:string` is folded
    /// into the plain form.
    pub fn datatype(&self) -> Option<NamedNode> {
        if self.0.is_plain() {
            None
        } else {
            Some(self.0.datatype().into())
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(lang) = self.language() {
            write!(f, "\"{}\"@{}", self.value(), lang)
        } else if let Some(datatype) = self.datatype() {
            write!(f, "\"{}\"^^{}", self.value(), datatype)
        } else {
            write!(f, "\"{}\"", self.value())
        }
    }
}

/// Stored kind of a term, persisted as the `*_type` column code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermKind {
    Uri,
    BlankNode,
    Literal,
}

impl TermKind {
    /// Column code
    pub fn code(self) -> i64 {
        match self {
            TermKind::Uri => 0,
            TermKind::BlankNode => 1,
            TermKind::Literal => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TermKind::Uri),
            1 => Some(TermKind::BlankNode),
            2 => Some(TermKind::Literal),
            _ => None,
        }
    }

    /// Label used in the `"<key> type"` result column
    pub fn label(self) -> &'static str {
        match self {
            TermKind::Uri => "uri",
            TermKind::BlankNode => "bnode",
            TermKind::Literal => "literal",
        }
    }
}

/// RDF subject (NamedNode or BlankNode)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    /// Named node (IRI)
    NamedNode(NamedNode),
    /// Blank node
    BlankNode(BlankNode),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::NamedNode(n) => write!(f, "{}", n),
            Subject::BlankNode(b) => write!(f, "{}", b),
        }
    }
}

impl From<NamedNode> for Subject {
    fn from(node: NamedNode) -> Self {
        Subject::NamedNode(node)
    }
}

impl From<BlankNode> for Subject {
    fn from(node: BlankNode) -> Self {
        Subject::BlankNode(node)
    }
}

/// RDF term (any RDF value)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    /// Named node (IRI)
    NamedNode(NamedNode),
    /// Blank node
    BlankNode(BlankNode),
    /// Literal value
    Literal(Literal),
}

impl Term {
    pub fn kind(&self) -> TermKind {
        match self {
            Term::NamedNode(_) => TermKind::Uri,
            Term::BlankNode(_) => TermKind::BlankNode,
            Term::Literal(_) => TermKind::Literal,
        }
    }

    /// Lexical value as it appears in result rows and in the dictionary.
    ///
    /// Blank nodes keep their `_:` prefix so they never collide with IRIs or
    /// literals of the same spelling.
    pub fn lexical(&self) -> String {
        match self {
            Term::NamedNode(n) => n.as_str().to_string(),
            Term::BlankNode(b) => b.to_string(),
            Term::Literal(l) => l.value().to_string(),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::NamedNode(n) => write!(f, "{}", n),
            Term::BlankNode(b) => write!(f, "{}", b),
            Term::Literal(l) => write!(f, "{}", l),
        }
    }
}

impl From<NamedNode> for Term {
    fn from(node: NamedNode) -> Self {
        Term::NamedNode(node)
    }
}

impl From<BlankNode> for Term {
    fn from(node: BlankNode) -> Self {
        Term::BlankNode(node)
    }
}

impl From<Literal> for Term {
    fn from(lit: Literal) -> Self {
        Term::Literal(lit)
    }
}

impl From<Subject> for Term {
    fn from(subject: Subject) -> Self {
        match subject {
            Subject::NamedNode(n) => Term::NamedNode(n),
            Subject::BlankNode(b) => Term::BlankNode(b),
        }
    }
}

/// RDF triple (subject-predicate-object)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Triple {
    /// Subject
    pub subject: Subject,
    /// Predicate
    pub predicate: NamedNode,
    /// Object
    pub object: Term,
}

impl Triple {
    /// Create a new triple
    pub fn new(subject: impl Into<Subject>, predicate: NamedNode, object: impl Into<Term>) -> Self {
        Self {
            subject: subject.into(),
            predicate,
            object: object.into(),
        }
    }

    /// Build a triple from unrestricted terms, rejecting positions RDF forbids
    pub fn from_terms(subject: Term, predicate: Term, object: Term) -> RdfResult<Self> {
        let subject = match subject {
            Term::NamedNode(n) => Subject::NamedNode(n),
            Term::BlankNode(b) => Subject::BlankNode(b),
            other => {
                return Err(RdfError::InvalidPosition {
                    position: "subject",
                    term: other.to_string(),
                })
            }
        };
        let predicate = match predicate {
            Term::NamedNode(n) => n,
            other => {
                return Err(RdfError::InvalidPosition {
                    position: "predicate",
                    term: other.to_string(),
                })
            }
        };
        Ok(Self { subject, predicate, object })
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}
