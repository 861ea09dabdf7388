//! XML name validation and utilities
//!
//! This module provides lexical checks for XML Names and Nmtokens
//! according to the XML 1.0 (fifth edition) productions. Names may
//! contain colons since namespaces are not interpreted.

use once_cell::sync::Lazy;
use regex::Regex;

macro_rules! name_start_chars {
    () => {
        r":A-Z_a-z\u{C0}-\u{D6}\u{D8}-\u{F6}\u{F8}-\u{2FF}\u{370}-\u{37D}\u{37F}-\u{1FFF}\u{200C}-\u{200D}\u{2070}-\u{218F}\u{2C00}-\u{2FEF}\u{3001}-\u{D7FF}\u{F900}-\u{FDCF}\u{FDF0}-\u{FFFD}\u{10000}-\u{EFFFF}"
    };
}

macro_rules! name_chars {
    () => {
        concat!(
            name_start_chars!(),
            r"\-\.0-9\u{B7}\u{300}-\u{36F}\u{203F}-\u{2040}"
        )
    };
}

// [5] Name ::= NameStartChar (NameChar)*
static NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!("^[", name_start_chars!(), "][", name_chars!(), "]*$"))
        .expect("Name pattern is valid")
});

// [7] Nmtoken ::= (NameChar)+
static NMTOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!("^[", name_chars!(), "]+$")).expect("Nmtoken pattern is valid")
});

/// Check if a string is a valid XML Name
pub fn is_valid_name(name: &str) -> bool {
    NAME.is_match(name)
}

/// Check if a string is a valid Nmtoken
pub fn is_valid_nmtoken(token: &str) -> bool {
    NMTOKEN.is_match(token)
}

/// Check if every whitespace separated token is a valid Name
pub fn is_valid_names(value: &str) -> bool {
    let mut tokens = split_tokens(value).peekable();
    tokens.peek().is_some() && tokens.all(is_valid_name)
}

/// Check if every whitespace separated token is a valid Nmtoken
pub fn is_valid_nmtokens(value: &str) -> bool {
    let mut tokens = split_tokens(value).peekable();
    tokens.peek().is_some() && tokens.all(is_valid_nmtoken)
}

/// Split a list-valued attribute (IDREFS, ENTITIES, NMTOKENS) into tokens
pub fn split_tokens(value: &str) -> impl Iterator<Item = &str> {
    value.split(is_xml_whitespace).filter(|t| !t.is_empty())
}

/// XML whitespace: space, tab, carriage return, line feed
pub fn is_xml_whitespace(c: char) -> bool {
    matches!(c, '\x20' | '\x09' | '\x0D' | '\x0A')
}

/// Check if a string consists only of XML whitespace
pub fn is_whitespace(s: &str) -> bool {
    s.chars().all(is_xml_whitespace)
}
