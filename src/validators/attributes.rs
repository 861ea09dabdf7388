//! DTD attribute declarations
//!
//! This module implements attribute declarations as reported by an
//! attribute-list declaration: the attribute type, its enumerated values
//! and its default.

use std::fmt;

use indexmap::IndexSet;

use crate::error::{Error, Result};

/// Declared type of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    /// `CDATA`
    Cdata,
    /// `(a|b|c)`
    Enumerated,
    /// `ID`
    Id,
    /// `IDREF`
    IdRef,
    /// `IDREFS`
    IdRefs,
    /// `ENTITY`
    Entity,
    /// `ENTITIES`
    Entities,
    /// `NMTOKEN`
    NmToken,
    /// `NMTOKENS`
    NmTokens,
    /// `NOTATION (a|b)`
    Notation,
}

impl AttributeType {
    /// Parse a type string of the form `CDATA`, `(a|b)` or `NOTATION(a|b)`,
    /// returning the type and its enumerated values.
    pub fn parse(s: &str) -> Result<(Self, IndexSet<String>)> {
        let s = s.trim();
        let keyword = match s {
            "CDATA" => Some(AttributeType::Cdata),
            "ID" => Some(AttributeType::Id),
            "IDREF" => Some(AttributeType::IdRef),
            "IDREFS" => Some(AttributeType::IdRefs),
            "ENTITY" => Some(AttributeType::Entity),
            "ENTITIES" => Some(AttributeType::Entities),
            "NMTOKEN" => Some(AttributeType::NmToken),
            "NMTOKENS" => Some(AttributeType::NmTokens),
            _ => None,
        };
        if let Some(att_type) = keyword {
            return Ok((att_type, IndexSet::new()));
        }

        let (att_type, list) = match s.strip_prefix("NOTATION") {
            Some(rest) => (AttributeType::Notation, rest.trim_start()),
            None => (AttributeType::Enumerated, s),
        };

        let inner = list
            .strip_prefix('(')
            .and_then(|l| l.strip_suffix(')'))
            .ok_or_else(|| Error::Value(format!("Invalid attribute type: '{}'", s)))?;

        let values: IndexSet<String> = inner
            .split('|')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        if values.is_empty() {
            return Err(Error::Value(format!("Empty enumeration in attribute type: '{}'", s)));
        }

        Ok((att_type, values))
    }

    /// Get the type keyword
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::Cdata => "CDATA",
            AttributeType::Enumerated => "",
            AttributeType::Id => "ID",
            AttributeType::IdRef => "IDREF",
            AttributeType::IdRefs => "IDREFS",
            AttributeType::Entity => "ENTITY",
            AttributeType::Entities => "ENTITIES",
            AttributeType::NmToken => "NMTOKEN",
            AttributeType::NmTokens => "NMTOKENS",
            AttributeType::Notation => "NOTATION",
        }
    }
}

/// A declared attribute of an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDecl {
    /// Attribute name
    pub name: String,
    /// Declared type
    pub att_type: AttributeType,
    /// Allowed values of enumerated and notation types
    pub values: IndexSet<String>,
    /// Default value (`#FIXED` or plain)
    pub default: Option<String>,
    /// `#REQUIRED` or `#FIXED`
    pub required: bool,
}

impl AttributeDecl {
    /// Create a declaration from the parts of an attribute definition
    pub fn new(
        name: impl Into<String>,
        att_type: &str,
        default: Option<&str>,
        required: bool,
    ) -> Result<Self> {
        let (att_type, values) = AttributeType::parse(att_type)?;
        Ok(Self {
            name: name.into(),
            att_type,
            values,
            default: default.map(str::to_string),
            required,
        })
    }

    /// The attribute must be given (`#REQUIRED`)
    pub fn is_required(&self) -> bool {
        self.required && self.default.is_none()
    }

    /// The attribute value is fixed by the DTD (`#FIXED`)
    pub fn is_fixed(&self) -> bool {
        self.required && self.default.is_some()
    }

    /// Whether `value` is one of the enumerated values
    pub fn is_enum_value(&self, value: &str) -> bool {
        self.values.contains(value)
    }
}

impl fmt::Display for AttributeDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.att_type.as_str())?;
        if !self.values.is_empty() {
            let values: Vec<&str> = self.values.iter().map(String::as_str).collect();
            if self.att_type == AttributeType::Notation {
                f.write_str(" ")?;
            }
            write!(f, "({})", values.join("|"))?;
        }
        match (&self.default, self.required) {
            (None, true) => f.write_str(" #REQUIRED"),
            (None, false) => f.write_str(" #IMPLIED"),
            (Some(value), true) => write!(f, " #FIXED \"{}\"", value),
            (Some(value), false) => write!(f, " \"{}\"", value),
        }
    }
}
