//! XML document handling
//!
//! This module provides the attribute set handed to applications with each
//! start tag, and the optional document tree built while parsing.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::{Error, Result};

/// Value of one attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeValue {
    /// The (normalized) value
    pub value: String,
    /// True if the value comes from a DTD default rather than the document
    pub is_default: bool,
}

/// Attributes of an element, in document order followed by DTD defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Attributes {
    values: IndexMap<String, AttributeValue>,
}

impl Attributes {
    /// Create an empty attribute set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute. An attribute given in the document is never
    /// replaced by a default.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>, is_default: bool) {
        let name = name.into();
        if is_default && self.values.contains_key(&name) {
            return;
        }
        self.values.insert(
            name,
            AttributeValue {
                value: value.into(),
                is_default,
            },
        );
    }

    /// Get an attribute
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.values.get(name)
    }

    /// Whether the attribute is present
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Get a value as a string, with its default flag
    pub fn get_str(&self, name: &str) -> Option<(&str, bool)> {
        self.get(name).map(|a| (a.value.as_str(), a.is_default))
    }

    /// Get a value as an integer, with its default flag
    pub fn get_int(&self, name: &str) -> Result<Option<(i64, bool)>> {
        self.get_parsed(name)
    }

    /// Get a value as a float, with its default flag
    pub fn get_f64(&self, name: &str) -> Result<Option<(f64, bool)>> {
        self.get_parsed(name)
    }

    /// Get a value as a boolean (`true` or `1`), with its default flag
    pub fn get_bool(&self, name: &str) -> Option<(bool, bool)> {
        self.get(name)
            .map(|a| (matches!(a.value.trim(), "true" | "1"), a.is_default))
    }

    fn get_parsed<T>(&self, name: &str) -> Result<Option<(T, bool)>>
    where
        T: std::str::FromStr,
        T::Err: fmt::Display,
    {
        match self.get(name) {
            None => Ok(None),
            Some(a) => a
                .value
                .trim()
                .parse::<T>()
                .map(|v| Some((v, a.is_default)))
                .map_err(|e| {
                    Error::Value(format!("Invalid value '{}' for attribute '{}': {}", a.value, name, e))
                }),
        }
    }

    /// Iterate over name/value pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of attributes
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no attributes
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A node of the document tree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Node {
    /// An element with its attributes and children
    Element {
        /// Element name
        name: String,
        /// Attributes including DTD defaults
        attributes: Attributes,
        /// Child nodes in document order
        children: Vec<Node>,
    },
    /// Character data
    Data(String),
}

impl Node {
    /// Create an element node
    pub fn element(name: impl Into<String>, attributes: Attributes) -> Self {
        Node::Element {
            name: name.into(),
            attributes,
            children: Vec::new(),
        }
    }

    /// Element name, `None` for data nodes
    pub fn name(&self) -> Option<&str> {
        match self {
            Node::Element { name, .. } => Some(name),
            Node::Data(_) => None,
        }
    }

    /// Text of a data node
    pub fn data(&self) -> Option<&str> {
        match self {
            Node::Data(text) => Some(text),
            Node::Element { .. } => None,
        }
    }

    /// Attributes of an element node
    pub fn attributes(&self) -> Option<&Attributes> {
        match self {
            Node::Element { attributes, .. } => Some(attributes),
            Node::Data(_) => None,
        }
    }

    /// Child nodes (none for data nodes)
    pub fn children(&self) -> &[Node] {
        match self {
            Node::Element { children, .. } => children,
            Node::Data(_) => &[],
        }
    }

    /// Append a child; ignored for data nodes.
    ///
    /// Adjacent data nodes are merged.
    pub fn add_child(&mut self, child: Node) {
        if let Node::Element { children, .. } = self {
            if let (Some(Node::Data(last)), Node::Data(text)) = (children.last_mut(), &child) {
                last.push_str(text);
                return;
            }
            children.push(child);
        }
    }

    /// Concatenated text of the data children
    pub fn child_data(&self) -> String {
        self.children().iter().filter_map(Node::data).collect()
    }

    /// Child elements with the given name
    pub fn find_children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children()
            .iter()
            .filter(move |n| n.name() == Some(name))
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Data(text) => f.write_str(&encode(text)),
            Node::Element {
                name,
                attributes,
                children,
            } => {
                write!(f, "<{}", name)?;
                for (attr, value) in attributes.iter() {
                    write!(f, " {}=\"{}\"", attr, encode(&value.value))?;
                }
                if children.is_empty() {
                    return f.write_str("/>");
                }
                f.write_str(">")?;
                for child in children {
                    write!(f, "{}", child)?;
                }
                write!(f, "</{}>", name)
            }
        }
    }
}

/// Escape the five XML special characters
pub fn encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_defaults_do_not_override() {
        let mut attrs = Attributes::new();
        attrs.insert("size", "10", false);
        attrs.insert("size", "5", true);
        attrs.insert("unit", "px", true);

        assert_eq!(attrs.get_str("size"), Some(("10", false)));
        assert_eq!(attrs.get_str("unit"), Some(("px", true)));
        assert_eq!(attrs.len(), 2);
    }

    #[test]
    fn test_typed_getters() {
        let mut attrs = Attributes::new();
        attrs.insert("n", " 42 ", false);
        attrs.insert("x", "1.5", true);
        attrs.insert("flag", "true", false);
        attrs.insert("off", "no", false);
        attrs.insert("bad", "abc", false);

        assert_eq!(attrs.get_int("n").unwrap(), Some((42, false)));
        assert_eq!(attrs.get_f64("x").unwrap(), Some((1.5, true)));
        assert_eq!(attrs.get_bool("flag"), Some((true, false)));
        assert_eq!(attrs.get_bool("off"), Some((false, false)));
        assert_eq!(attrs.get_int("missing").unwrap(), None);
        assert!(matches!(attrs.get_int("bad"), Err(Error::Value(_))));
    }

    #[test]
    fn test_node_tree() {
        let mut root = Node::element("doc", Attributes::new());
        let mut child = Node::element("p", Attributes::new());
        child.add_child(Node::Data("hello ".to_string()));
        child.add_child(Node::Data("world".to_string()));
        root.add_child(child);
        root.add_child(Node::element("p", Attributes::new()));

        assert_eq!(root.children().len(), 2);
        assert_eq!(root.find_children("p").count(), 2);
        assert_eq!(root.children()[0].child_data(), "hello world");
        assert_eq!(root.children()[0].children().len(), 1);
        assert_eq!(root.to_string(), "<doc><p>hello world</p><p/></doc>");
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode(r#"a<b>&'c'"d""#), "a&lt;b&gt;&amp;&apos;c&apos;&quot;d&quot;");
        assert_eq!(encode("plain"), "plain");
    }
}
