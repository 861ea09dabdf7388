//! Validating XML parser
//!
//! [`XmlParser`] drives the quick-xml tokenizer and feeds its events to a
//! [`Validator`]. The DOCTYPE declaration supplies the DTD: the internal
//! subset is parsed first, then the external subset, both through the same
//! [`DtdParser`] so they share parameter entities. Documents without a
//! DOCTYPE are parsed without validation.
//!
//! Applications receive events through [`ParserHandler`]. Each event names
//! the containing element, attributes carry the DTD defaults, and character
//! data is only delivered for elements whose content model accepts it.

use std::path::Path;

use indexmap::IndexMap;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, trace};

use crate::documents::{Attributes, Node};
use crate::dtd::{
    char_ref, normalize_attribute_value, predefined_entity, ContentParticle, DeclHandler,
    DtdParser, EntityDecl,
};
use crate::error::{Error, ParseError, Result, ValidationError};
use crate::limits::Limits;
use crate::loaders::Loader;
use crate::locations::{Location, Position};
use crate::names::{is_valid_name, is_whitespace, is_xml_whitespace};
use crate::validators::{AttributeType, Validator};

/// Receiver of document events.
///
/// Every method has a default that ignores the event. Returning an error
/// stops the parse.
pub trait ParserHandler {
    /// An element starts inside `container` (empty for the document element)
    fn start_element(&mut self, _container: &str, _name: &str, _attributes: &Attributes) -> Result<()> {
        Ok(())
    }

    /// An element ends; `container` is the element it was part of
    fn end_element(&mut self, _container: &str, _name: &str) -> Result<()> {
        Ok(())
    }

    /// Character data inside `container`
    fn character_data(&mut self, _container: &str, _data: &str) -> Result<()> {
        Ok(())
    }

    /// Supply the text of an external entity, or `None` to let the loader
    /// read it
    fn external_entity(&mut self, _system_id: &str, _public_id: Option<&str>) -> Result<Option<String>> {
        Ok(None)
    }

    /// The document violates its DTD; the parse stops with this error
    fn validation_error(&mut self, _error: &ValidationError) {}
}

impl ParserHandler for () {}

/// Validating XML parser
#[derive(Debug, Default)]
pub struct XmlParser {
    limits: Limits,
    loader: Loader,
    build_dom: bool,
    pathname: Option<String>,
    validator: Validator,
    dom: Option<Node>,
}

impl XmlParser {
    /// Create a parser with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the limits, for the parser and its loader
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.loader = self.loader.with_limits(limits.clone());
        self.limits = limits;
        self
    }

    /// Set the loader used for external entities
    pub fn with_loader(mut self, loader: Loader) -> Self {
        self.loader = loader;
        self
    }

    /// Build a document tree while parsing
    pub fn build_dom(mut self, build: bool) -> Self {
        self.build_dom = build;
        self
    }

    /// Set the pathname reported in errors for in-memory documents
    pub fn with_pathname(mut self, pathname: impl Into<String>) -> Self {
        self.pathname = Some(pathname.into());
        self
    }

    /// The validator holding the DTD of the last document
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// The document tree of the last document, if DOM building is enabled
    pub fn dom(&self) -> Option<&Node> {
        self.dom.as_ref()
    }

    /// Take the document tree of the last document
    pub fn take_dom(&mut self) -> Option<Node> {
        self.dom.take()
    }

    /// Parse a file. External entities resolve relative to it.
    pub fn parse_file<H: ParserHandler + ?Sized>(&mut self, path: impl AsRef<Path>, handler: &mut H) -> Result<()> {
        let location = Location::Path(path.as_ref().to_path_buf());
        let text = self.loader.load(&location)?;

        let configured = self.pathname.clone();
        if configured.is_none() {
            self.pathname = Some(path.as_ref().display().to_string());
        }
        let result = self.parse_document(&text, Some(location), handler);
        self.pathname = configured;
        result
    }

    /// Parse an in-memory document
    pub fn parse_str<H: ParserHandler + ?Sized>(&mut self, text: &str, handler: &mut H) -> Result<()> {
        self.parse_document(text, None, handler)
    }

    /// Read a standalone DTD file into the validator, replacing any DTD
    /// from an earlier document.
    pub fn parse_dtd_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let location = Location::Path(path.as_ref().to_path_buf());
        let text = self.loader.load(&location)?;
        let pathname = path.as_ref().display().to_string();

        self.validator.clear();
        let mut general_entities = GeneralEntities::new(text.len());
        let mut sink = DeclSink {
            validator: &mut self.validator,
            handler: &mut (),
            loader: &self.loader,
            referrer: Some(&location),
            general_entities: &mut general_entities,
        };
        DtdParser::new(&mut sink)
            .with_limits(self.limits.clone())
            .parse(&text, Some(&pathname))
    }

    fn parse_document<H: ParserHandler + ?Sized>(
        &mut self,
        text: &str,
        referrer: Option<Location>,
        handler: &mut H,
    ) -> Result<()> {
        self.limits.check_document_size(text.len())?;
        self.validator.clear();
        self.validator.set_pathname(self.pathname.clone());
        self.dom = None;

        // the DOCTYPE is split off before quick-xml sees it; the reader then
        // restarts behind it at `base`
        let mut reader = document_reader(text);
        let mut base = 0;

        let mut tracker = Tracker::default();
        let mut general_entities = GeneralEntities::new(text.len());
        let mut elements: Vec<String> = Vec::new();
        let mut nodes: Vec<Node> = Vec::new();
        let mut validating = false;
        let mut found_root = false;

        loop {
            let offset = base + reader.buffer_position();

            if !found_root && !validating {
                let rest = &text[offset..];
                let start = offset + rest.len() - rest.trim_start_matches(is_xml_whitespace).len();
                if text[start..].starts_with("<!DOCTYPE") {
                    let position = tracker.advance(text, start);
                    let end = doctype_end(text, start)
                        .ok_or_else(|| self.parse_error("Unterminated DOCTYPE declaration", position))?;
                    let content = &text[start + "<!DOCTYPE".len()..end - 1];
                    let doctype = parse_doctype(content).map_err(|msg| self.parse_error(msg, position))?;
                    debug!(document_element = doctype.name, system_id = ?doctype.system_id, "reading DTD");

                    self.validator.set_document_element(doctype.name);
                    let mut sink = DeclSink {
                        validator: &mut self.validator,
                        handler: &mut *handler,
                        loader: &self.loader,
                        referrer: referrer.as_ref(),
                        general_entities: &mut general_entities,
                    };
                    let mut dtd = DtdParser::new(&mut sink).with_limits(self.limits.clone());
                    if let Some(subset) = doctype.internal_subset {
                        dtd.parse(subset, self.pathname.as_deref())
                            .map_err(|e| with_position(e, position))?;
                    }
                    if let Some(system_id) = doctype.system_id {
                        dtd.parse_external(system_id, doctype.public_id)?;
                    }
                    validating = true;

                    base = end;
                    reader = document_reader(&text[end..]);
                    continue;
                }
            }

            let event = reader.read_event().map_err(|e| {
                self.parse_error(e.to_string(), tracker.advance(text, base + reader.buffer_position()))
            })?;
            let position = tracker.advance(text, offset);

            match event {
                Event::DocType(_) => {
                    let message = if found_root {
                        "DOCTYPE declaration after the document element"
                    } else {
                        "Duplicate DOCTYPE declaration"
                    };
                    return Err(self.parse_error(message, position));
                }
                Event::Start(e) => {
                    let name = decode(e.name().as_ref()).map_err(|msg| self.parse_error(msg, position))?;
                    if elements.is_empty() && found_root && !validating {
                        return Err(self.parse_error(
                            format!("Element '{}' after the document element", name),
                            position,
                        ));
                    }
                    found_root = true;
                    self.limits
                        .check_depth(elements.len() + 1)
                        .map_err(|e| with_position(e, position))?;

                    let mut specified: Vec<(String, String)> = Vec::new();
                    for attribute in e.attributes() {
                        let attribute = attribute
                            .map_err(|err| self.parse_error(err.to_string(), position))?;
                        let key = decode(attribute.key.as_ref())
                            .map_err(|msg| self.parse_error(msg, position))?;
                        let raw = decode(&attribute.value).map_err(|msg| self.parse_error(msg, position))?;
                        let value = general_entities
                            .expand(&raw, &self.limits)
                            .map_err(|e| self.locate(e, position))?;
                        let is_cdata = self
                            .validator
                            .element_decl(&name)
                            .and_then(|decl| decl.attribute_decl(&key))
                            .map_or(true, |decl| decl.att_type == AttributeType::Cdata);
                        specified.push((key, normalize_attribute_value(&value, is_cdata)));
                    }
                    self.limits
                        .check_attributes(specified.len())
                        .map_err(|e| with_position(e, position))?;

                    if validating {
                        let pairs: Vec<(&str, &str)> = specified
                            .iter()
                            .map(|(k, v)| (k.as_str(), v.as_str()))
                            .collect();
                        self.validator
                            .start_element(&name, &pairs, position)
                            .map_err(|err| report(handler, err))?;
                    }

                    let mut attributes = Attributes::new();
                    for (key, value) in specified {
                        attributes.insert(key, value, false);
                    }
                    if let Some(decl) = self.validator.element_decl(&name) {
                        for default in decl.defaulted_attributes() {
                            if let Some(value) = &default.default {
                                attributes.insert(default.name.as_str(), value.as_str(), true);
                            }
                        }
                    }

                    let container = elements.last().map(String::as_str).unwrap_or("");
                    trace!(element = %name, container, "start element");
                    handler.start_element(container, &name, &attributes)?;

                    if self.build_dom {
                        nodes.push(Node::element(name.as_str(), attributes));
                    }
                    elements.push(name);
                }
                Event::End(e) => {
                    let name = decode(e.name().as_ref()).map_err(|msg| self.parse_error(msg, position))?;
                    if validating {
                        self.validator
                            .end_element(position)
                            .map_err(|err| report(handler, err))?;
                    }
                    elements.pop();

                    let container = elements.last().map(String::as_str).unwrap_or("");
                    handler.end_element(container, &name)?;

                    if let Some(node) = nodes.pop() {
                        match nodes.last_mut() {
                            Some(parent) => parent.add_child(node),
                            None => self.dom = Some(node),
                        }
                    }
                }
                Event::Text(e) => {
                    let raw = decode(&e).map_err(|msg| self.parse_error(msg, position))?;
                    let data = general_entities
                        .expand(&raw, &self.limits)
                        .map_err(|e| self.locate(e, position))?;
                    self.character_data(&data, position, validating, &elements, &mut nodes, handler)?;
                }
                Event::CData(e) => {
                    let data = decode(&e).map_err(|msg| self.parse_error(msg, position))?;
                    self.character_data(&data, position, validating, &elements, &mut nodes, handler)?;
                }
                Event::Empty(_) => {
                    // empty elements are expanded into start and end events
                }
                Event::Decl(_) | Event::PI(_) | Event::Comment(_) => {}
                Event::Eof => break,
            }
        }

        let position = tracker.advance(text, text.len());
        if let Some(open) = elements.last() {
            return Err(self.parse_error(format!("Unclosed element '{}'", open), position));
        }
        if !found_root {
            return Err(self.parse_error("No document element", position));
        }
        Ok(())
    }

    fn character_data<H: ParserHandler + ?Sized>(
        &mut self,
        data: &str,
        position: Position,
        validating: bool,
        elements: &[String],
        nodes: &mut [Node],
        handler: &mut H,
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let Some(container) = elements.last() else {
            if is_whitespace(data) {
                return Ok(());
            }
            if validating {
                self.validator
                    .character_data(data, position)
                    .map_err(|err| report(handler, err))?;
            }
            return Err(self.parse_error("Character data outside of the document element", position));
        };

        if validating {
            self.validator
                .character_data(data, position)
                .map_err(|err| report(handler, err))?;
            if !self.validator.is_mixed(container) {
                return Ok(());
            }
        }

        handler.character_data(container, data)?;
        if let Some(node) = nodes.last_mut() {
            node.add_child(Node::Data(data.to_string()));
        }
        Ok(())
    }

    fn parse_error(&self, message: impl Into<String>, position: Position) -> Error {
        let mut error = ParseError::new(message).with_position(position);
        if let Some(pathname) = &self.pathname {
            error = error.with_pathname(pathname.as_str());
        }
        Error::Parse(error)
    }

    /// Give a parse error without a position the document position
    fn locate(&self, error: Error, position: Position) -> Error {
        match error {
            Error::Parse(err) if err.position.is_none() => self.parse_error(err.message, position),
            other => other,
        }
    }
}

/// Hand a validation error to the application and turn it into an [`Error`]
fn report<H: ParserHandler + ?Sized>(handler: &mut H, error: ValidationError) -> Error {
    handler.validation_error(&error);
    Error::Validation(error)
}

fn with_position(error: Error, position: Position) -> Error {
    match error {
        Error::Parse(mut err) if err.position.is_none() && err.pathname.is_none() => {
            err.position = Some(position);
            Error::Parse(err)
        }
        other => other,
    }
}

fn decode(bytes: &[u8]) -> std::result::Result<String, String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| e.to_string())
}

fn document_reader(text: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(false);
    reader.expand_empty_elements(true);
    reader
}

/// Internal general entities of a document.
///
/// Replacement text is stored as declared and expanded where it is
/// referenced, so entities may refer to ones declared after them. The bytes
/// produced by expansion count against the entity expansion limit and,
/// together with the document itself, against the document size limit.
#[derive(Debug, Default)]
struct GeneralEntities {
    values: IndexMap<String, String>,
    document_size: usize,
    expanded: usize,
}

impl GeneralEntities {
    fn new(document_size: usize) -> Self {
        Self {
            document_size,
            ..Self::default()
        }
    }

    /// The first declaration binds
    fn declare(&mut self, name: &str, value: &str) {
        if !self.values.contains_key(name) {
            self.values.insert(name.to_string(), value.to_string());
        }
    }

    /// Expand character and entity references in text or an attribute value
    fn expand(&mut self, text: &str, limits: &Limits) -> Result<String> {
        if !text.contains('&') {
            return Ok(text.to_string());
        }
        let mut out = String::with_capacity(text.len());
        let mut expanded = self.expanded;
        let result = self.expand_into(text, limits, &mut Vec::new(), &mut expanded, &mut out);
        self.expanded = expanded;
        result.map(|()| out)
    }

    fn expand_into<'s>(
        &'s self,
        text: &str,
        limits: &Limits,
        open: &mut Vec<&'s str>,
        expanded: &mut usize,
        out: &mut String,
    ) -> Result<()> {
        let mut rest = text;
        while let Some(i) = rest.find('&') {
            self.emit(&rest[..i], limits, !open.is_empty(), expanded, out)?;
            let after = &rest[i + 1..];
            let end = after
                .find(';')
                .ok_or_else(|| ParseError::new(format!("Unterminated reference in '{}'", text)))?;
            let name = &after[..end];
            rest = &after[end + 1..];

            if let Some(number) = name.strip_prefix('#') {
                let c = char_ref(number).map_err(ParseError::new)?;
                self.emit(c.encode_utf8(&mut [0; 4]), limits, !open.is_empty(), expanded, out)?;
            } else if let Some(c) = predefined_entity(name) {
                self.emit(c, limits, !open.is_empty(), expanded, out)?;
            } else {
                let (name, value) = self
                    .values
                    .get_key_value(name)
                    .ok_or_else(|| ParseError::new(format!("Undeclared entity '&{};'", name)))?;
                if open.contains(&name.as_str()) {
                    return Err(ParseError::new(format!("Recursive reference to entity '&{};'", name)).into());
                }
                limits.check_entity_depth(open.len() + 1)?;
                open.push(name.as_str());
                self.expand_into(value, limits, open, expanded, out)?;
                open.pop();
            }
        }
        self.emit(rest, limits, !open.is_empty(), expanded, out)
    }

    fn emit(&self, piece: &str, limits: &Limits, nested: bool, expanded: &mut usize, out: &mut String) -> Result<()> {
        if nested {
            *expanded += piece.len();
            limits.check_entity_expansion_size(*expanded)?;
            limits.check_document_size(self.document_size + *expanded)?;
        }
        out.push_str(piece);
        Ok(())
    }
}

/// Declarations of the DTD go to the validator; entity text comes from the
/// application or the loader.
struct DeclSink<'a, H: ParserHandler + ?Sized> {
    validator: &'a mut Validator,
    handler: &'a mut H,
    loader: &'a Loader,
    referrer: Option<&'a Location>,
    general_entities: &'a mut GeneralEntities,
}

impl<H: ParserHandler + ?Sized> DeclHandler for DeclSink<'_, H> {
    fn element_decl(&mut self, name: &str, model: &ContentParticle) -> Result<()> {
        self.validator.add_element_decl(name, model);
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
        self.validator
            .add_attribute_decl(element, attribute, att_type, default, is_required)
    }

    fn entity_decl(&mut self, decl: &EntityDecl) -> Result<()> {
        if decl.is_parameter {
            return Ok(());
        }
        if let Some(value) = &decl.value {
            self.general_entities.declare(&decl.name, value);
        }
        self.validator.add_entity_decl(&decl.name);
        Ok(())
    }

    fn notation_decl(
        &mut self,
        name: &str,
        _system_id: Option<&str>,
        _public_id: Option<&str>,
    ) -> Result<()> {
        self.validator.add_notation_decl(name);
        Ok(())
    }

    fn external_entity(
        &mut self,
        system_id: &str,
        public_id: Option<&str>,
    ) -> Result<Option<(String, String)>> {
        if let Some(text) = self.handler.external_entity(system_id, public_id)? {
            return Ok(Some((system_id.to_string(), text)));
        }
        let (location, text) = self.loader.load_entity(system_id, self.referrer)?;
        Ok(Some((location.as_str(), text)))
    }
}

/// Parts of a DOCTYPE declaration
#[derive(Debug, PartialEq, Eq)]
struct Doctype<'a> {
    name: &'a str,
    system_id: Option<&'a str>,
    public_id: Option<&'a str>,
    internal_subset: Option<&'a str>,
}

/// Offset just past the `>` closing the DOCTYPE declaration at `start`.
///
/// Literals, comments and processing instructions may hold `>`, `[` and
/// `]`, so they are skipped whole.
fn doctype_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = start + "<!DOCTYPE".len();
    let mut brackets = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'"' | b'\'') => {
                i += 1 + text[i + 1..].find(quote as char)?;
            }
            b'<' if text[i..].starts_with("<!--") => {
                i += 4 + text[i + 4..].find("-->")? + 2;
            }
            b'<' if text[i..].starts_with("<?") => {
                i += 2 + text[i + 2..].find("?>")? + 1;
            }
            b'[' => brackets += 1,
            b']' => brackets = brackets.saturating_sub(1),
            b'>' if brackets == 0 => return Some(i + 1),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Split the content of `<!DOCTYPE ...>`
fn parse_doctype(content: &str) -> std::result::Result<Doctype<'_>, String> {
    let content = content.trim_start();
    let name_end = content
        .find(|c: char| is_xml_whitespace(c) || c == '[')
        .unwrap_or(content.len());
    let name = &content[..name_end];
    if !is_valid_name(name) {
        return Err(format!("Invalid document type name '{}'", name));
    }

    let mut rest = content[name_end..].trim_start();
    let mut system_id = None;
    let mut public_id = None;
    if let Some(after) = rest.strip_prefix("SYSTEM") {
        let (literal, after) = quoted(after)?;
        system_id = Some(literal);
        rest = after;
    } else if let Some(after) = rest.strip_prefix("PUBLIC") {
        let (public, after) = quoted(after)?;
        let (system, after) = quoted(after)?;
        public_id = Some(public);
        system_id = Some(system);
        rest = after;
    }

    let rest = rest.trim();
    let internal_subset = match rest.strip_prefix('[') {
        Some(inner) => {
            let end = inner
                .rfind(']')
                .ok_or_else(|| "Unterminated internal subset".to_string())?;
            if !inner[end + 1..].trim().is_empty() {
                return Err("Unexpected content after the internal subset".to_string());
            }
            Some(&inner[..end])
        }
        None if rest.is_empty() => None,
        None => return Err(format!("Unexpected content in DOCTYPE: '{}'", rest)),
    };

    Ok(Doctype {
        name,
        system_id,
        public_id,
        internal_subset,
    })
}

fn quoted(s: &str) -> std::result::Result<(&str, &str), String> {
    let s = s.trim_start();
    let quote = s
        .chars()
        .next()
        .filter(|c| *c == '"' || *c == '\'')
        .ok_or_else(|| "Expected a quoted literal in DOCTYPE".to_string())?;
    let body = &s[1..];
    let end = body
        .find(quote)
        .ok_or_else(|| "Unterminated literal in DOCTYPE".to_string())?;
    Ok((&body[..end], &body[end + 1..]))
}

/// Incremental line and column tracking over the document text
#[derive(Debug)]
struct Tracker {
    line: usize,
    column: usize,
    offset: usize,
}

impl Default for Tracker {
    fn default() -> Self {
        Self {
            line: 1,
            column: 1,
            offset: 0,
        }
    }
}

impl Tracker {
    fn advance(&mut self, text: &str, offset: usize) -> Position {
        let offset = offset.min(text.len());
        match text.get(self.offset..offset) {
            Some(segment) if offset >= self.offset => {
                for c in segment.chars() {
                    if c == '\n' {
                        self.line += 1;
                        self.column = 1;
                    } else {
                        self.column += 1;
                    }
                }
                self.offset = offset;
                Position::new(self.line, self.column, offset)
            }
            _ => {
                let position = Position::from_offset(text, offset);
                self.line = position.line;
                self.column = position.column;
                self.offset = position.byte_offset;
                position
            }
        }
    }
}
