//! RDF data model and storage
//!
//! - [`types`]: terms and triples, thin wrappers over `oxrdf`
//! - [`namespace`]: prefix table used while parsing
//! - [`codec`]: term <-> dictionary id encoding
//! - [`store`]: the public [`RdfStore`]
//!
//! # Example
//!
//! ```rust
//! use sparqlstore::rdf::{Literal, NamedNode, RdfStore, Triple};
//! use sparqlstore::StoreConfig;
//!
//! let mut store = RdfStore::open_in_memory(StoreConfig::default()).unwrap();
//! let triple = Triple::new(
//!     NamedNode::new("http://example.org/alice").unwrap(),
//!     NamedNode::new("http://xmlns.com/foaf/0.1/name").unwrap(),
//!     Literal::new_simple_literal("Alice"),
//! );
//! assert_eq!(store.insert(&[triple], None), 1);
//! ```

pub mod codec;
mod namespace;
mod store;
mod types;

pub use types::{BlankNode, Literal, NamedNode, RdfError, RdfResult, Subject, Term, TermKind, Triple};

pub use store::{RdfStore, RdfStoreError, RdfStoreResult};

pub use namespace::{NamespaceManager, PrefixError, PrefixResult};

pub use codec::{BlankNodeScope, CodecError, CodecResult, EncodedTerm, TermCodec};
