//! # dtdval
//!
//! A DTD-validating XML library. Element content models are compiled into
//! deterministic finite automata, which then validate the element and
//! character-data events of documents.
//!
//! ## Features
//!
//! - Content models normalized and categorized, with DFAs shared between
//!   elements whose models have the same signature
//! - Classical regular-expression-to-DFA construction (followpos and
//!   subset construction) for complex content models
//! - Attribute checks: required, `#FIXED`, enumerations, ID/IDREF
//!   integrity, declared entities and notations
//! - DTD parsing with parameter entities, conditional sections and
//!   external subsets
//! - A validating parser wrapper with attribute defaults and an optional
//!   document tree
//!
//! ## Example
//!
//! ```rust
//! use dtdval::{XmlParser, Error};
//!
//! let text = r#"<!DOCTYPE list [
//!   <!ELEMENT list (item+)>
//!   <!ELEMENT item (#PCDATA)>
//! ]>
//! <list><item>one</item></list>"#;
//!
//! let mut parser = XmlParser::new();
//! parser.parse_str(text, &mut ()).unwrap();
//!
//! let err = parser.parse_str("<!DOCTYPE list [<!ELEMENT list (item+)><!ELEMENT item EMPTY>]><list/>", &mut ());
//! assert!(matches!(err, Err(Error::Validation(_))));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Foundation
pub mod error;
pub mod limits;

// Utilities
pub mod locations;
pub mod names;

// Resource loading
pub mod loaders;

// DTD declarations
pub mod dtd;

// Validators
pub mod validators;

// Documents and parsing
pub mod documents;
pub mod parser;

// Re-exports for convenience
pub use documents::{encode, AttributeValue, Attributes, Node};
pub use dtd::{ContentParticle, DeclHandler, DtdParser, EntityDecl, ParticleKind, Quantity};
pub use error::{Error, ErrorKind, ParseError, Result, ValidationError};
pub use limits::Limits;
pub use loaders::Loader;
pub use locations::{Location, Position};
pub use parser::{ParserHandler, XmlParser};
pub use validators::{Category, ContentModel, Dfa, ValidationHandler, Validator};

/// Version of the dtdval library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
