//! DTD element declarations
//!
//! An element declaration is created the first time an element or an
//! attribute-list declaration names the element. It refers to its content
//! model DFA by index, since DFAs are shared between elements with the same
//! content model.

use indexmap::IndexMap;

use super::attributes::AttributeDecl;

/// A declared element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementDecl {
    /// Element name
    pub name: String,
    /// Index of the content model DFA, `None` until an element declaration
    /// has been seen
    pub dfa: Option<usize>,
    /// Declared attributes in declaration order
    pub attributes: IndexMap<String, AttributeDecl>,
}

impl ElementDecl {
    /// Create a declaration without content model or attributes
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dfa: None,
            attributes: IndexMap::new(),
        }
    }

    /// Whether an element declaration has been seen for this element
    pub fn is_declared(&self) -> bool {
        self.dfa.is_some()
    }

    /// Add an attribute; the first declaration of a name binds.
    ///
    /// Returns false if the attribute was already declared.
    pub fn add_attribute_decl(&mut self, decl: AttributeDecl) -> bool {
        if self.attributes.contains_key(&decl.name) {
            return false;
        }
        self.attributes.insert(decl.name.clone(), decl);
        true
    }

    /// Get an attribute declaration
    pub fn attribute_decl(&self, name: &str) -> Option<&AttributeDecl> {
        self.attributes.get(name)
    }

    /// Attributes that must be given on every occurrence
    pub fn required_attributes(&self) -> impl Iterator<Item = &AttributeDecl> {
        self.attributes.values().filter(|a| a.is_required())
    }

    /// Attributes with a default value
    pub fn defaulted_attributes(&self) -> impl Iterator<Item = &AttributeDecl> {
        self.attributes.values().filter(|a| a.default.is_some())
    }
}
