//! Document validation against a DTD
//!
//! The [`Validator`] owns every declaration of a DTD and validates the
//! element and character-data events of a document. It keeps a stack of
//! open elements and a parallel stack of DFA states: the top state tracks
//! the position inside the content model of the innermost open element.
//!
//! The first error shuts the validator down. Later calls return the same
//! error again without touching any state, until [`Validator::reset`]
//! prepares it for the next document.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::dtd::{ContentParticle, DeclHandler, EntityDecl};
use crate::error::{ErrorKind, Result, ValidationError};
use crate::locations::Position;
use crate::names::{
    is_valid_name, is_valid_names, is_valid_nmtoken, is_valid_nmtokens, is_whitespace,
    split_tokens,
};

use super::attributes::{AttributeDecl, AttributeType};
use super::content_model::ContentModel;
use super::dfa::{Dfa, StateId};
use super::elements::ElementDecl;

/// Receiver of validation errors.
///
/// The handler is called once, for the error that shuts the validator down.
pub trait ValidationHandler {
    /// Handle a validation error
    fn handle_validation_error(&mut self, error: &ValidationError);
}

impl<F> ValidationHandler for F
where
    F: FnMut(&ValidationError),
{
    fn handle_validation_error(&mut self, error: &ValidationError) {
        self(error)
    }
}

/// DTD validator for one document at a time
#[derive(Default)]
pub struct Validator {
    document_element: String,
    element_decls: IndexMap<String, ElementDecl>,
    /// Content model DFAs keyed by signature
    dfas: IndexMap<String, Dfa>,
    mixed: IndexMap<String, bool>,
    any_elements: BTreeSet<String>,
    notations: BTreeSet<String>,
    entities: BTreeSet<String>,

    element_stack: Vec<usize>,
    /// (DFA index, current state) per open element
    state_stack: Vec<(usize, StateId)>,
    ids: BTreeSet<String>,
    id_refs: BTreeSet<String>,
    found_document_element: bool,
    shutdown: Option<ValidationError>,
    pathname: Option<String>,

    handler: Option<Box<dyn ValidationHandler>>,
}

impl Validator {
    /// Create an empty validator
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the error handler
    pub fn with_handler<H: ValidationHandler + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Replace the error handler
    pub fn set_handler(&mut self, handler: Option<Box<dyn ValidationHandler>>) {
        self.handler = handler;
    }

    /// Set the pathname attached to subsequent errors
    pub fn set_pathname(&mut self, pathname: Option<String>) {
        self.pathname = pathname;
    }

    /// Set the document element named by the DOCTYPE declaration
    pub fn set_document_element(&mut self, name: &str) {
        self.document_element = name.to_string();
    }

    /// Register an element declaration.
    ///
    /// Elements whose content models have the same signature share a DFA.
    /// A repeated declaration replaces the element's content model.
    pub fn add_element_decl(&mut self, name: &str, particle: &ContentParticle) {
        let model = ContentModel::new(particle);
        let is_mixed = model.is_mixed();

        let dfa_index = match self.dfas.get_index_of(model.signature()) {
            Some(index) => {
                debug!(element = name, signature = model.signature(), "sharing content model DFA");
                index
            }
            None => {
                let signature = model.signature().to_string();
                self.dfas.insert_full(signature, Dfa::new(model)).0
            }
        };

        self.mixed.insert(name.to_string(), is_mixed);

        let decl = self
            .element_decls
            .entry(name.to_string())
            .or_insert_with(|| ElementDecl::new(name));
        if decl.dfa.is_some() {
            warn!(element = name, "element declared more than once, replacing content model");
        }
        decl.dfa = Some(dfa_index);

        self.any_elements.insert(name.to_string());
    }

    /// Register one attribute of an attribute-list declaration.
    ///
    /// `att_type` has the form `CDATA`, `(a|b)` or `NOTATION(a|b)`. The
    /// first declaration of an attribute binds; later ones are ignored.
    pub fn add_attribute_decl(
        &mut self,
        element: &str,
        attribute: &str,
        att_type: &str,
        default: Option<&str>,
        is_required: bool,
    ) -> Result<()> {
        let decl = AttributeDecl::new(attribute, att_type, default, is_required)?;
        let element_decl = self
            .element_decls
            .entry(element.to_string())
            .or_insert_with(|| ElementDecl::new(element));
        if !element_decl.add_attribute_decl(decl) {
            warn!(element, attribute, "attribute declared more than once, keeping the first");
        }
        Ok(())
    }

    /// Register a notation
    pub fn add_notation_decl(&mut self, name: &str) {
        self.notations.insert(name.to_string());
    }

    /// Register a general entity
    pub fn add_entity_decl(&mut self, name: &str) {
        self.entities.insert(name.to_string());
    }

    /// Prepare for another document under the same DTD
    pub fn reset(&mut self) {
        self.element_stack.clear();
        self.state_stack.clear();
        self.ids.clear();
        self.id_refs.clear();
        self.found_document_element = false;
        self.shutdown = None;
        self.pathname = None;
    }

    /// Forget the DTD as well, keeping only the handler
    pub fn clear(&mut self) {
        let handler = self.handler.take();
        *self = Self {
            handler,
            ..Self::default()
        };
    }

    fn fail(&mut self, mut error: ValidationError) -> std::result::Result<(), ValidationError> {
        if error.pathname.is_none() {
            error.pathname = self.pathname.clone();
        }
        debug!(error = %error, "validation failed");
        if let Some(handler) = self.handler.as_mut() {
            handler.handle_validation_error(&error);
        }
        self.shutdown = Some(error.clone());
        Err(error)
    }

    fn shut_down(&self) -> std::result::Result<(), ValidationError> {
        match &self.shutdown {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    /// Validate the start of an element with its specified attributes
    pub fn start_element(
        &mut self,
        name: &str,
        attributes: &[(&str, &str)],
        position: Position,
    ) -> std::result::Result<(), ValidationError> {
        self.shut_down()?;
        trace!(element = name, depth = self.element_stack.len(), "start element");

        let error = |kind| ValidationError::new(kind, position).with_current(name);

        let declared = self
            .element_decls
            .get_full(name)
            .and_then(|(index, _, decl)| decl.dfa.map(|dfa| (index, dfa)));
        let Some((decl_index, dfa_index)) = declared else {
            let containing = self.current_element().to_string();
            return self.fail(error(ErrorKind::UndeclaredElement).with_containing(containing));
        };

        match self.state_stack.last().copied() {
            None => {
                if self.found_document_element {
                    let kind = if name == self.document_element {
                        ErrorKind::MultipleDocumentElements
                    } else {
                        ErrorKind::MultipleTopLevelElements
                    };
                    return self.fail(error(kind));
                }
                self.found_document_element = true;
                if name != self.document_element {
                    return self.fail(error(ErrorKind::InvalidDocumentElement));
                }
            }
            Some((container_dfa, state)) => {
                let next = self.dfas[container_dfa].next_state(state, name, &self.any_elements);
                match next {
                    Some(next) => {
                        if let Some(top) = self.state_stack.last_mut() {
                            top.1 = next;
                        }
                    }
                    None => {
                        let containing = self.current_element().to_string();
                        return self.fail(error(ErrorKind::InvalidElement).with_containing(containing));
                    }
                }
            }
        }

        let start = self.dfas[dfa_index].start();
        self.state_stack.push((dfa_index, start));
        self.element_stack.push(decl_index);

        for &(attribute, value) in attributes {
            self.check_attribute(decl_index, name, attribute, value, position)?;
        }

        let missing = self.element_decls[decl_index]
            .required_attributes()
            .find(|decl| !attributes.iter().any(|(given, _)| *given == decl.name))
            .map(|decl| decl.name.clone());
        if let Some(attribute) = missing {
            return self.fail(
                ValidationError::new(ErrorKind::MissingRequiredAttribute, position)
                    .with_current(attribute)
                    .with_containing(name),
            );
        }

        Ok(())
    }

    fn check_attribute(
        &mut self,
        decl_index: usize,
        element: &str,
        attribute: &str,
        value: &str,
        position: Position,
    ) -> std::result::Result<(), ValidationError> {
        let outcome = match self.element_decls[decl_index].attribute_decl(attribute) {
            None => Err(ErrorKind::UndeclaredAttribute),
            Some(decl) => check_attribute_value(decl, value, &self.notations, &self.entities, &self.ids)
                .map(|()| decl.att_type),
        };

        match outcome {
            Err(kind) => self.fail(
                ValidationError::new(kind, position)
                    .with_current(attribute)
                    .with_containing(element),
            ),
            Ok(AttributeType::Id) => {
                self.ids.insert(value.to_string());
                Ok(())
            }
            Ok(AttributeType::IdRef) => {
                self.id_refs.insert(value.to_string());
                Ok(())
            }
            Ok(AttributeType::IdRefs) => {
                self.id_refs.extend(split_tokens(value).map(str::to_string));
                Ok(())
            }
            Ok(_) => Ok(()),
        }
    }

    /// Validate the end of the innermost open element.
    ///
    /// Closing the document element reconciles IDREF values with the IDs
    /// of the document.
    pub fn end_element(&mut self, position: Position) -> std::result::Result<(), ValidationError> {
        self.shut_down()?;

        let Some(&(dfa_index, state)) = self.state_stack.last() else {
            warn!("end of element without an open element");
            return Ok(());
        };
        trace!(element = self.current_element(), "end element");

        if !self.dfas[dfa_index].is_accepting(state) {
            let current = self.current_element().to_string();
            return self.fail(
                ValidationError::new(ErrorKind::InvalidElementPattern, position).with_current(current),
            );
        }

        self.state_stack.pop();
        self.element_stack.pop();

        if self.state_stack.is_empty() {
            let unmatched = self
                .id_refs
                .iter()
                .find(|id_ref| !self.ids.contains(*id_ref))
                .cloned();
            if let Some(id_ref) = unmatched {
                return self.fail(ValidationError::new(ErrorKind::IdNotFound, position).with_current(id_ref));
            }
            self.ids.clear();
            self.id_refs.clear();
        }

        Ok(())
    }

    /// Validate character data inside the innermost open element
    pub fn character_data(
        &mut self,
        text: &str,
        position: Position,
    ) -> std::result::Result<(), ValidationError> {
        self.shut_down()?;

        let Some(&(dfa_index, state)) = self.state_stack.last() else {
            return self.fail(ValidationError::new(ErrorKind::UncontainedCharacterData, position));
        };

        if !self.dfas[dfa_index].state(state).accepts_character_data() && !is_whitespace(text) {
            let current = self.current_element().to_string();
            return self.fail(ValidationError::new(ErrorKind::NoCharacterData, position).with_current(current));
        }
        Ok(())
    }

    /// Elements allowed at the current position
    pub fn allowable_elements(&self) -> BTreeSet<String> {
        match self.state_stack.last() {
            Some(&(dfa_index, state)) => {
                self.dfas[dfa_index].allowable_elements(state, &self.any_elements)
            }
            None if !self.document_element.is_empty() => {
                BTreeSet::from([self.document_element.clone()])
            }
            None => BTreeSet::new(),
        }
    }

    /// Whether an element accepts character data; unknown elements do
    pub fn is_mixed(&self, name: &str) -> bool {
        self.mixed.get(name).copied().unwrap_or(true)
    }

    /// The document element named by the DOCTYPE declaration
    pub fn document_element(&self) -> &str {
        &self.document_element
    }

    /// Name of the innermost open element, empty outside the document element
    pub fn current_element(&self) -> &str {
        self.element_stack
            .last()
            .map(|&index| self.element_decls[index].name.as_str())
            .unwrap_or("")
    }

    /// Number of open elements
    pub fn depth(&self) -> usize {
        self.element_stack.len()
    }

    /// Elements allowed inside `ANY` content
    pub fn any_elements(&self) -> &BTreeSet<String> {
        &self.any_elements
    }

    /// Get an element declaration
    pub fn element_decl(&self, name: &str) -> Option<&ElementDecl> {
        self.element_decls.get(name)
    }

    /// All element declarations in declaration order
    pub fn element_decls(&self) -> impl Iterator<Item = &ElementDecl> {
        self.element_decls.values()
    }

    /// The content model DFA of an element
    pub fn dfa(&self, element: &str) -> Option<&Dfa> {
        self.element_decls
            .get(element)
            .and_then(|decl| decl.dfa)
            .and_then(|index| self.dfas.get_index(index))
            .map(|(_, dfa)| dfa)
    }

    /// Number of distinct content model DFAs
    pub fn dfa_count(&self) -> usize {
        self.dfas.len()
    }

    /// Declared notations
    pub fn notations(&self) -> &BTreeSet<String> {
        &self.notations
    }

    /// Declared general entities
    pub fn entities(&self) -> &BTreeSet<String> {
        &self.entities
    }

    /// IDs seen in the current document
    pub fn ids(&self) -> &BTreeSet<String> {
        &self.ids
    }

    /// IDREF values seen in the current document
    pub fn id_refs(&self) -> &BTreeSet<String> {
        &self.id_refs
    }

    /// Whether an error has shut the validator down
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_some()
    }

    /// The error that shut the validator down
    pub fn last_error(&self) -> Option<&ValidationError> {
        self.shutdown.as_ref()
    }
}

/// Check a value against its declaration, without recording it
fn check_attribute_value(
    decl: &AttributeDecl,
    value: &str,
    notations: &BTreeSet<String>,
    entities: &BTreeSet<String>,
    ids: &BTreeSet<String>,
) -> std::result::Result<(), ErrorKind> {
    if decl.is_fixed() && decl.default.as_deref() != Some(value) {
        return Err(ErrorKind::MismatchedFixedValue);
    }

    let lexical_ok = match decl.att_type {
        AttributeType::Cdata => true,
        AttributeType::Enumerated => decl.is_enum_value(value),
        AttributeType::Id | AttributeType::IdRef | AttributeType::Entity => is_valid_name(value),
        AttributeType::Notation => is_valid_name(value),
        AttributeType::IdRefs | AttributeType::Entities => is_valid_names(value),
        AttributeType::NmToken => is_valid_nmtoken(value),
        AttributeType::NmTokens => is_valid_nmtokens(value),
    };
    if !lexical_ok {
        return Err(ErrorKind::BadAttributeValue);
    }

    match decl.att_type {
        AttributeType::Id if ids.contains(value) => Err(ErrorKind::DuplicateId),
        AttributeType::Entity if !entities.contains(value) => Err(ErrorKind::UndeclaredEntity),
        AttributeType::Entities if split_tokens(value).any(|e| !entities.contains(e)) => {
            Err(ErrorKind::UndeclaredEntity)
        }
        AttributeType::Notation if !notations.contains(value) => Err(ErrorKind::UndeclaredNotation),
        AttributeType::Notation if !decl.is_enum_value(value) => Err(ErrorKind::BadAttributeValue),
        _ => Ok(()),
    }
}

impl DeclHandler for Validator {
    fn element_decl(&mut self, name: &str, model: &ContentParticle) -> Result<()> {
        self.add_element_decl(name, model);
        Ok(())
    }

    fn attribute_decl(
        &mut self,
        element: &str,
        attribute: &str,
        att_type: &str,
        default: Option<&str>,
        is_required: bool,
    ) -> Result<()> {
        self.add_attribute_decl(element, attribute, att_type, default, is_required)
    }

    fn entity_decl(&mut self, decl: &EntityDecl) -> Result<()> {
        if !decl.is_parameter {
            self.add_entity_decl(&decl.name);
        }
        Ok(())
    }

    fn notation_decl(
        &mut self,
        name: &str,
        _system_id: Option<&str>,
        _public_id: Option<&str>,
    ) -> Result<()> {
        self.add_notation_decl(name);
        Ok(())
    }
}

impl fmt::Display for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Validator: {} elements, {} DFAs, document element '{}'",
            self.element_decls.len(),
            self.dfas.len(),
            self.document_element
        )?;
        for decl in self.element_decls.values() {
            match decl.dfa {
                Some(index) => writeln!(f, "ELEMENT {} -> DFA {}", decl.name, index)?,
                None => writeln!(f, "ELEMENT {} (undeclared)", decl.name)?,
            }
            for attribute in decl.attributes.values() {
                writeln!(f, "  ATTLIST {}", attribute)?;
            }
        }
        for (index, dfa) in self.dfas.values().enumerate() {
            writeln!(f, "{}: {}", index, dfa)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("document_element", &self.document_element)
            .field("elements", &self.element_decls.len())
            .field("dfas", &self.dfas.len())
            .field("depth", &self.element_stack.len())
            .field("shutdown", &self.shutdown)
            .finish()
    }
}
