//! Error types for dtdval
//!
//! This module defines all error types used throughout the library.
//! Validation errors (a document violating its DTD) are kept apart from
//! parse errors (malformed XML or DTD text), mirroring the two separate
//! reporting paths of a validating parser.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::locations::Position;

/// Result type alias using dtdval Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for dtdval operations
#[derive(Error, Debug)]
pub enum Error {
    /// Document does not conform to its DTD
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Malformed XML or DTD text
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Value error (attribute value of the wrong form)
    #[error("value error: {0}")]
    Value(String),

    /// Resource loading error
    #[error("resource error: {0}")]
    Resource(String),

    /// Limit exceeded error
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

/// Kind of validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// The document element occurs more than once at the top level.
    MultipleDocumentElements,
    /// There are multiple top level elements.
    MultipleTopLevelElements,
    /// The top level element does not match the DOCTYPE declaration.
    InvalidDocumentElement,
    /// Element not declared in the DTD.
    UndeclaredElement,
    /// Attribute not declared in the DTD.
    UndeclaredAttribute,
    /// Element not allowed by the content model of its container.
    InvalidElement,
    /// Element does not allow character data.
    NoCharacterData,
    /// Character data outside of any element.
    UncontainedCharacterData,
    /// Value of a `#FIXED` attribute does not match the DTD.
    MismatchedFixedValue,
    /// Required attribute missing from an element.
    MissingRequiredAttribute,
    /// Attribute value not allowed by the attribute type.
    BadAttributeValue,
    /// Duplicate ID value within a document.
    DuplicateId,
    /// Notation not declared in the DTD.
    UndeclaredNotation,
    /// Entity not declared in the DTD.
    UndeclaredEntity,
    /// No ID matches an IDREF value.
    IdNotFound,
    /// Element content ended before its content model was satisfied.
    InvalidElementPattern,
}

/// A document construct that violates the DTD.
///
/// `current_element` names the offending item (an element, an attribute or
/// an IDREF value depending on the kind) and `containing_element` the
/// element it appeared in, when that is meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    /// What went wrong
    pub kind: ErrorKind,
    /// Name of the offending element, attribute or value
    pub current_element: String,
    /// Name of the containing element (may be empty)
    pub containing_element: String,
    /// Where in the source the error was detected
    pub position: Position,
    /// Entity or file being parsed when the error was detected
    pub pathname: Option<String>,
}

impl ValidationError {
    /// Create a new validation error
    pub fn new(kind: ErrorKind, position: Position) -> Self {
        Self {
            kind,
            current_element: String::new(),
            containing_element: String::new(),
            position,
            pathname: None,
        }
    }

    /// Set the offending element name
    pub fn with_current(mut self, name: impl Into<String>) -> Self {
        self.current_element = name.into();
        self
    }

    /// Set the containing element name
    pub fn with_containing(mut self, name: impl Into<String>) -> Self {
        self.containing_element = name.into();
        self
    }

    /// Set the pathname of the entity being parsed
    pub fn with_pathname(mut self, pathname: impl Into<String>) -> Self {
        self.pathname = Some(pathname.into());
        self
    }

    /// Human readable description of the error
    pub fn message(&self) -> String {
        let cur = &self.current_element;
        let con = &self.containing_element;
        match self.kind {
            ErrorKind::MultipleDocumentElements => {
                format!("Document element '{}' occurs more than once at the top level", cur)
            }
            ErrorKind::MultipleTopLevelElements => format!("Multiple top level element '{}'", cur),
            ErrorKind::InvalidDocumentElement => {
                format!("Top level element '{}' does not match DOCTYPE declaration", cur)
            }
            ErrorKind::UndeclaredElement => format!("Element '{}' not declared in DTD", cur),
            ErrorKind::UndeclaredAttribute => {
                format!("Attribute '{}' for element '{}' not declared in DTD", cur, con)
            }
            ErrorKind::InvalidElement => format!(
                "Element '{}' violates content model of containing element '{}'",
                cur, con
            ),
            ErrorKind::NoCharacterData => {
                format!("Element '{}' cannot contain character data", cur)
            }
            ErrorKind::UncontainedCharacterData => {
                "Character data with no containing element".to_string()
            }
            ErrorKind::MismatchedFixedValue => format!(
                "#FIXED attribute value does not match DTD for attribute '{}' in element '{}'",
                cur, con
            ),
            ErrorKind::MissingRequiredAttribute => {
                format!("#REQUIRED attribute '{}' missing in element '{}'", cur, con)
            }
            ErrorKind::BadAttributeValue => format!(
                "Attribute value not in set of possible values for attribute '{}' in element '{}'",
                cur, con
            ),
            ErrorKind::DuplicateId => format!(
                "Duplicate ID within the same document for attribute '{}' in element '{}'",
                cur, con
            ),
            ErrorKind::UndeclaredNotation => format!(
                "Notation not declared in DTD for attribute '{}' in element '{}'",
                cur, con
            ),
            ErrorKind::UndeclaredEntity => format!(
                "Entity not declared in DTD for attribute '{}' in element '{}'",
                cur, con
            ),
            ErrorKind::IdNotFound => format!("Could not find ID corresponding to IDREF '{}'", cur),
            ErrorKind::InvalidElementPattern => {
                format!("Element pattern violates the content model of element '{}'", cur)
            }
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())?;

        if let Some(ref pathname) = self.pathname {
            write!(f, " ({}:{})", pathname, self.position)
        } else {
            write!(f, " ({})", self.position)
        }
    }
}

impl std::error::Error for ValidationError {}

/// Malformed XML or DTD text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Error message
    pub message: String,
    /// Position in the source text
    pub position: Option<Position>,
    /// Entity or file being parsed
    pub pathname: Option<String>,
}

impl ParseError {
    /// Create a new parse error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position: None,
            pathname: None,
        }
    }

    /// Set the position
    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    /// Set the pathname, keeping one that is already present
    pub fn with_pathname(mut self, pathname: impl Into<String>) -> Self {
        if self.pathname.is_none() {
            self.pathname = Some(pathname.into());
        }
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        match (&self.pathname, &self.position) {
            (Some(path), Some(pos)) => write!(f, " ({}:{})", path, pos),
            (Some(path), None) => write!(f, " ({})", path),
            (None, Some(pos)) => write!(f, " ({})", pos),
            (None, None) => Ok(()),
        }
    }
}

impl std::error::Error for ParseError {}
