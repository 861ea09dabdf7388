//! DTD declaration parsing
//!
//! This module reads the markup declarations of an internal or external DTD
//! subset and reports them to a [`DeclHandler`]. Parameter entity references
//! are expanded both between declarations (the entity text is parsed as a
//! nested subset) and inside declarations (the replacement text is spliced
//! in, padded with spaces).
//!
//! ```text
//! [28b] intSubset    ::= (markupdecl | DeclSep)*
//! [29]  markupdecl   ::= elementdecl | AttlistDecl | EntityDecl
//!                      | NotationDecl | PI | Comment
//! [31]  extSubsetDecl ::= ( markupdecl | conditionalSect | DeclSep)*
//! ```

use std::fmt;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::{Error, ParseError, Result};
use crate::limits::Limits;
use crate::locations::Position;
use crate::names::{is_valid_name, is_valid_nmtoken, is_xml_whitespace};

/// Occurrence indicator of a content particle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Quantity {
    /// Exactly once
    #[default]
    None,
    /// `?`: zero or one
    Opt,
    /// `*`: zero or more
    Rep,
    /// `+`: one or more
    Plus,
}

impl Quantity {
    /// The indicator character, `-` for none
    pub fn as_char(self) -> char {
        match self {
            Quantity::None => '-',
            Quantity::Opt => '?',
            Quantity::Rep => '*',
            Quantity::Plus => '+',
        }
    }

    /// Whether the particle may be absent
    pub fn is_optional(self) -> bool {
        matches!(self, Quantity::Opt | Quantity::Rep)
    }

    fn suffix(self) -> &'static str {
        match self {
            Quantity::None => "",
            Quantity::Opt => "?",
            Quantity::Rep => "*",
            Quantity::Plus => "+",
        }
    }
}

/// Kind of a content particle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticleKind {
    /// `EMPTY`
    Empty,
    /// `ANY`
    Any,
    /// `(#PCDATA | a | b)*`
    Mixed,
    /// An element name
    Name,
    /// `(a | b)`
    Choice,
    /// `(a , b)`
    Seq,
}

/// A content model as declared in an element declaration.
///
/// `Mixed` particles list their element names as `Name` children.
/// A parenthesized group with a single item is a `Seq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentParticle {
    /// Kind of particle
    pub kind: ParticleKind,
    /// Occurrence indicator
    pub quantity: Quantity,
    /// Element name for `Name` particles
    pub name: Option<String>,
    /// Nested particles of groups
    pub children: Vec<ContentParticle>,
}

impl ContentParticle {
    fn with_kind(kind: ParticleKind) -> Self {
        Self {
            kind,
            quantity: Quantity::None,
            name: None,
            children: Vec::new(),
        }
    }

    /// `EMPTY`
    pub fn empty() -> Self {
        Self::with_kind(ParticleKind::Empty)
    }

    /// `ANY`
    pub fn any() -> Self {
        Self::with_kind(ParticleKind::Any)
    }

    /// `(#PCDATA | names...)*`
    pub fn mixed<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let children: Vec<_> = names.into_iter().map(ContentParticle::name).collect();
        Self {
            kind: ParticleKind::Mixed,
            quantity: if children.is_empty() {
                Quantity::None
            } else {
                Quantity::Rep
            },
            name: None,
            children,
        }
    }

    /// A single element name
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::with_kind(ParticleKind::Name)
        }
    }

    /// A choice group
    pub fn choice(children: Vec<ContentParticle>) -> Self {
        Self {
            children,
            ..Self::with_kind(ParticleKind::Choice)
        }
    }

    /// A sequence group
    pub fn seq(children: Vec<ContentParticle>) -> Self {
        Self {
            children,
            ..Self::with_kind(ParticleKind::Seq)
        }
    }

    /// Set the occurrence indicator
    pub fn with_quantity(mut self, quantity: Quantity) -> Self {
        self.quantity = quantity;
        self
    }
}

impl fmt::Display for ContentParticle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ParticleKind::Empty => f.write_str("EMPTY"),
            ParticleKind::Any => f.write_str("ANY"),
            ParticleKind::Mixed => {
                f.write_str("(#PCDATA")?;
                for child in &self.children {
                    write!(f, "|{}", child)?;
                }
                write!(f, "){}", self.quantity.suffix())
            }
            ParticleKind::Name => write!(
                f,
                "{}{}",
                self.name.as_deref().unwrap_or_default(),
                self.quantity.suffix()
            ),
            ParticleKind::Choice | ParticleKind::Seq => {
                let sep = if self.kind == ParticleKind::Choice { "|" } else { "," };
                f.write_str("(")?;
                for (i, child) in self.children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(sep)?;
                    }
                    write!(f, "{}", child)?;
                }
                write!(f, "){}", self.quantity.suffix())
            }
        }
    }
}

/// An entity declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDecl {
    /// Entity name
    pub name: String,
    /// Declared with `%`
    pub is_parameter: bool,
    /// Replacement text of internal entities
    pub value: Option<String>,
    /// System identifier of external entities
    pub system_id: Option<String>,
    /// Public identifier of external entities
    pub public_id: Option<String>,
    /// Notation of unparsed entities (`NDATA`)
    pub notation: Option<String>,
}

impl EntityDecl {
    /// Whether the entity text lives in another resource
    pub fn is_external(&self) -> bool {
        self.system_id.is_some()
    }

    /// Whether the entity is an unparsed (`NDATA`) entity
    pub fn is_unparsed(&self) -> bool {
        self.notation.is_some()
    }
}

/// Receiver of DTD declarations.
///
/// Attribute types are given in the form `CDATA`, `ID`, `(a|b)` or
/// `NOTATION(x|y)`. Defaults map as follows: `#REQUIRED` is
/// `(None, true)`, `#IMPLIED` is `(None, false)`, `#FIXED "v"` is
/// `(Some("v"), true)` and a plain `"v"` is `(Some("v"), false)`.
pub trait DeclHandler {
    /// An element declaration
    fn element_decl(&mut self, name: &str, model: &ContentParticle) -> Result<()>;

    /// One attribute definition of an attribute-list declaration
    fn attribute_decl(
        &mut self,
        element: &str,
        attribute: &str,
        att_type: &str,
        default: Option<&str>,
        is_required: bool,
    ) -> Result<()>;

    /// An entity declaration, general or parameter
    fn entity_decl(&mut self, _decl: &EntityDecl) -> Result<()> {
        Ok(())
    }

    /// A notation declaration
    fn notation_decl(
        &mut self,
        _name: &str,
        _system_id: Option<&str>,
        _public_id: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    /// Fetch the text of an external parameter entity.
    ///
    /// Returns the pathname used in error reports and the entity text,
    /// or `None` to skip the entity.
    fn external_entity(
        &mut self,
        _system_id: &str,
        _public_id: Option<&str>,
    ) -> Result<Option<(String, String)>> {
        Ok(None)
    }
}

/// Parser for DTD subsets.
///
/// Parameter entities persist across calls to [`DtdParser::parse`], so the
/// internal subset and the external subset of a document share them when
/// parsed with the same parser. The first declaration of an entity binds.
pub struct DtdParser<'h, H: DeclHandler + ?Sized> {
    handler: &'h mut H,
    limits: Limits,
    parameter_entities: IndexMap<String, EntityDecl>,
    entity_depth: usize,
    expanded: usize,
}

impl<'h, H: DeclHandler + ?Sized> DtdParser<'h, H> {
    /// Create a parser reporting to `handler`
    pub fn new(handler: &'h mut H) -> Self {
        Self {
            handler,
            limits: Limits::default(),
            parameter_entities: IndexMap::new(),
            entity_depth: 0,
            expanded: 0,
        }
    }

    /// Set the limits
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Declared parameter entities
    pub fn parameter_entities(&self) -> &IndexMap<String, EntityDecl> {
        &self.parameter_entities
    }

    /// Parse the declarations of a DTD subset.
    ///
    /// `pathname` names the resource in error reports.
    pub fn parse(&mut self, text: &str, pathname: Option<&str>) -> Result<()> {
        let text = strip_text_decl(text);
        let mut cur = Cursor::new(text);
        let result = self.parse_declarations(&mut cur);
        match (result, pathname) {
            (Err(Error::Parse(err)), Some(path)) => Err(Error::Parse(err.with_pathname(path))),
            (result, _) => result,
        }
    }

    /// Fetch an external subset through the handler and parse it.
    ///
    /// Returns false if the handler declined to supply the text.
    pub fn parse_external(&mut self, system_id: &str, public_id: Option<&str>) -> Result<bool> {
        self.limits.check_entity_depth(self.entity_depth + 1)?;
        let Some((pathname, text)) = self.handler.external_entity(system_id, public_id)? else {
            debug!(system_id, "external subset not read");
            return Ok(false);
        };

        debug!(system_id, pathname = %pathname, "parsing external subset");
        self.entity_depth += 1;
        let result = self.parse(&text, Some(&pathname));
        self.entity_depth -= 1;
        result.map(|()| true)
    }

    fn parse_declarations(&mut self, cur: &mut Cursor) -> Result<()> {
        let mut include_depth = 0usize;

        loop {
            cur.skip_ws();
            if cur.is_eof() {
                break;
            }

            if cur.starts_with("<!--") {
                cur.skip_past("-->", "Unterminated comment")?;
            } else if cur.starts_with("<?") {
                cur.skip_past("?>", "Unterminated processing instruction")?;
            } else if cur.starts_with("<![") {
                cur.advance(3);
                self.skip_ws_pe(cur)?;
                let keyword = cur.read_token();
                self.skip_ws_pe(cur)?;
                if !cur.eat("[") {
                    return Err(cur.error("Expected '[' in conditional section"));
                }
                match keyword.as_str() {
                    "INCLUDE" => include_depth += 1,
                    "IGNORE" => skip_ignored_section(cur)?,
                    _ => {
                        return Err(cur.error(format!(
                            "Unknown conditional section keyword '{}'",
                            keyword
                        )))
                    }
                }
            } else if cur.starts_with("]]>") {
                if include_depth == 0 {
                    return Err(cur.error("Unexpected ']]>' outside conditional section"));
                }
                include_depth -= 1;
                cur.advance(3);
            } else if cur.starts_with("<!ELEMENT") {
                self.parse_element_decl(cur)?;
            } else if cur.starts_with("<!ATTLIST") {
                self.parse_attlist_decl(cur)?;
            } else if cur.starts_with("<!ENTITY") {
                self.parse_entity_decl(cur)?;
            } else if cur.starts_with("<!NOTATION") {
                self.parse_notation_decl(cur)?;
            } else if cur.starts_with("%") {
                cur.advance(1);
                let name = self.parse_name(cur)?;
                if !cur.eat(";") {
                    return Err(cur.error(format!("Expected ';' after '%{}'", name)));
                }
                self.include_parameter_entity(&name)?;
            } else {
                return Err(cur.error("Unexpected content in DTD"));
            }
        }

        if include_depth > 0 {
            return Err(cur.error("Unterminated conditional section"));
        }
        Ok(())
    }

    /// A parameter entity reference between declarations
    fn include_parameter_entity(&mut self, name: &str) -> Result<()> {
        let Some(decl) = self.parameter_entities.get(name).cloned() else {
            warn!(entity = name, "reference to undeclared parameter entity");
            return Ok(());
        };

        self.limits.check_entity_depth(self.entity_depth + 1)?;
        let Some((pathname, text)) = self.entity_text(&decl)? else {
            return Ok(());
        };

        debug!(entity = name, depth = self.entity_depth + 1, "parsing parameter entity");
        self.entity_depth += 1;
        let result = self.parse(&text, pathname.as_deref());
        self.entity_depth -= 1;
        result
    }

    fn entity_text(&mut self, decl: &EntityDecl) -> Result<Option<(Option<String>, String)>> {
        if let Some(value) = &decl.value {
            return Ok(Some((None, value.clone())));
        }
        let Some(system_id) = decl.system_id.as_deref() else {
            return Ok(None);
        };
        match self
            .handler
            .external_entity(system_id, decl.public_id.as_deref())?
        {
            Some((pathname, text)) => Ok(Some((Some(pathname), text))),
            None => {
                debug!(entity = %decl.name, system_id, "external parameter entity not read");
                Ok(None)
            }
        }
    }

    /// Skip whitespace, expanding parameter entity references in place.
    ///
    /// Returns whether anything was skipped.
    fn skip_ws_pe(&mut self, cur: &mut Cursor) -> Result<bool> {
        let mut skipped = false;
        loop {
            if cur.skip_ws() > 0 {
                skipped = true;
            }
            if !cur.at_pe_reference() {
                return Ok(skipped);
            }

            let start = cur.pos;
            cur.advance(1);
            let name = self.parse_name(cur)?;
            if !cur.eat(";") {
                return Err(cur.error(format!("Expected ';' after '%{}'", name)));
            }

            let text = match self.parameter_entities.get(&name).cloned() {
                Some(decl) => self
                    .entity_text(&decl)?
                    .map(|(_, text)| strip_text_decl(&text).to_string())
                    .unwrap_or_default(),
                None => {
                    warn!(entity = %name, "reference to undeclared parameter entity");
                    String::new()
                }
            };

            self.expanded += text.len();
            self.limits.check_document_size(self.expanded)?;
            cur.splice(start, &format!(" {} ", text));
            skipped = true;
        }
    }

    fn require_ws(&mut self, cur: &mut Cursor, context: &str) -> Result<()> {
        if self.skip_ws_pe(cur)? {
            Ok(())
        } else {
            Err(cur.error(format!("Whitespace required {}", context)))
        }
    }

    fn parse_name(&mut self, cur: &mut Cursor) -> Result<String> {
        let token = cur.read_token();
        if is_valid_name(&token) {
            Ok(token)
        } else if token.is_empty() {
            Err(cur.error("Expected a name"))
        } else {
            Err(cur.error(format!("Invalid name '{}'", token)))
        }
    }

    /// ```text
    /// [45] elementdecl ::= '<!ELEMENT' S Name S contentspec S? '>'
    /// [46] contentspec ::= 'EMPTY' | 'ANY' | Mixed | children
    /// ```
    fn parse_element_decl(&mut self, cur: &mut Cursor) -> Result<()> {
        cur.advance("<!ELEMENT".len());
        self.require_ws(cur, "after '<!ELEMENT'")?;
        let name = self.parse_name(cur)?;
        self.require_ws(cur, "after element name")?;

        let model = if cur.eat("EMPTY") {
            ContentParticle::empty()
        } else if cur.eat("ANY") {
            ContentParticle::any()
        } else if cur.eat("(") {
            self.parse_group(cur, true)?
        } else {
            return Err(cur.error(format!("Invalid content specification for '{}'", name)));
        };

        self.skip_ws_pe(cur)?;
        if !cur.eat(">") {
            return Err(cur.error(format!("Expected '>' to end declaration of '{}'", name)));
        }

        debug!(element = %name, model = %model, "element declaration");
        self.handler.element_decl(&name, &model)
    }

    /// Parse a group after its opening parenthesis.
    ///
    /// ```text
    /// [47] children ::= (choice | seq) ('?' | '*' | '+')?
    /// [48] cp       ::= (Name | choice | seq) ('?' | '*' | '+')?
    /// [49] choice   ::= '(' S? cp ( S? '|' S? cp )+ S? ')'
    /// [50] seq      ::= '(' S? cp ( S? ',' S? cp )* S? ')'
    /// [51] Mixed    ::= '(' S? '#PCDATA' (S? '|' S? Name)* S? ')*'
    ///                 | '(' S? '#PCDATA' S? ')'
    /// ```
    fn parse_group(&mut self, cur: &mut Cursor, outermost: bool) -> Result<ContentParticle> {
        self.skip_ws_pe(cur)?;

        if cur.starts_with("#PCDATA") {
            if !outermost {
                return Err(cur.error("#PCDATA is only allowed in the outermost group"));
            }
            cur.advance("#PCDATA".len());
            let mut names = Vec::new();
            loop {
                self.skip_ws_pe(cur)?;
                if !cur.eat("|") {
                    break;
                }
                self.skip_ws_pe(cur)?;
                names.push(self.parse_name(cur)?);
            }
            if !cur.eat(")") {
                return Err(cur.error("Expected ')' to end mixed content"));
            }
            let repeated = cur.eat("*");
            if !names.is_empty() && !repeated {
                return Err(cur.error("Mixed content with element names must end with ')*'"));
            }
            return Ok(ContentParticle::mixed(names));
        }

        let mut children = vec![self.parse_cp(cur)?];
        let mut separator: Option<char> = None;
        loop {
            self.skip_ws_pe(cur)?;
            match cur.peek() {
                Some(')') => {
                    cur.advance(1);
                    break;
                }
                Some(c @ ('|' | ',')) => {
                    if separator.is_some_and(|s| s != c) {
                        return Err(cur.error("Mixed '|' and ',' in a content model group"));
                    }
                    separator = Some(c);
                    cur.advance(1);
                    self.skip_ws_pe(cur)?;
                    children.push(self.parse_cp(cur)?);
                }
                _ => return Err(cur.error("Expected '|', ',' or ')' in content model")),
            }
        }

        let group = if separator == Some('|') {
            ContentParticle::choice(children)
        } else {
            ContentParticle::seq(children)
        };
        Ok(group.with_quantity(cur.read_quantity()))
    }

    fn parse_cp(&mut self, cur: &mut Cursor) -> Result<ContentParticle> {
        if cur.eat("(") {
            self.parse_group(cur, false)
        } else {
            let name = self.parse_name(cur)?;
            Ok(ContentParticle::name(name).with_quantity(cur.read_quantity()))
        }
    }

    /// ```text
    /// [52] AttlistDecl ::= '<!ATTLIST' S Name AttDef* S? '>'
    /// [53] AttDef      ::= S Name S AttType S DefaultDecl
    /// [60] DefaultDecl ::= '#REQUIRED' | '#IMPLIED' | (('#FIXED' S)? AttValue)
    /// ```
    fn parse_attlist_decl(&mut self, cur: &mut Cursor) -> Result<()> {
        cur.advance("<!ATTLIST".len());
        self.require_ws(cur, "after '<!ATTLIST'")?;
        let element = self.parse_name(cur)?;

        loop {
            let had_ws = self.skip_ws_pe(cur)?;
            if cur.eat(">") {
                break;
            }
            if !had_ws {
                return Err(cur.error("Whitespace required before attribute definition"));
            }

            let attribute = self.parse_name(cur)?;
            self.require_ws(cur, "after attribute name")?;
            let att_type = self.parse_att_type(cur)?;
            self.require_ws(cur, "after attribute type")?;

            let (default, is_required) = if cur.eat("#REQUIRED") {
                (None, true)
            } else if cur.eat("#IMPLIED") {
                (None, false)
            } else if cur.eat("#FIXED") {
                self.require_ws(cur, "after '#FIXED'")?;
                (Some(cur.read_literal()?), true)
            } else {
                (Some(cur.read_literal()?), false)
            };

            let default = match default {
                Some(raw) => {
                    let value = expand_char_refs(&raw).map_err(|msg| cur.error(msg))?;
                    Some(normalize_attribute_value(&value, att_type == "CDATA"))
                }
                None => None,
            };

            debug!(element = %element, attribute = %attribute, att_type = %att_type, "attribute declaration");
            self.handler.attribute_decl(
                &element,
                &attribute,
                &att_type,
                default.as_deref(),
                is_required,
            )?;
        }
        Ok(())
    }

    /// ```text
    /// [54] AttType        ::= StringType | TokenizedType | EnumeratedType
    /// [58] NotationType   ::= 'NOTATION' S '(' S? Name (S? '|' S? Name)* S? ')'
    /// [59] Enumeration    ::= '(' S? Nmtoken (S? '|' S? Nmtoken)* S? ')'
    /// ```
    fn parse_att_type(&mut self, cur: &mut Cursor) -> Result<String> {
        if cur.eat("(") {
            let values = self.parse_token_list(cur, is_valid_nmtoken)?;
            return Ok(format!("({})", values.join("|")));
        }

        let keyword = cur.read_token();
        match keyword.as_str() {
            "CDATA" | "ID" | "IDREF" | "IDREFS" | "ENTITY" | "ENTITIES" | "NMTOKEN"
            | "NMTOKENS" => Ok(keyword),
            "NOTATION" => {
                self.require_ws(cur, "after 'NOTATION'")?;
                if !cur.eat("(") {
                    return Err(cur.error("Expected '(' after 'NOTATION'"));
                }
                let names = self.parse_token_list(cur, is_valid_name)?;
                Ok(format!("NOTATION({})", names.join("|")))
            }
            _ => Err(cur.error(format!("Unknown attribute type '{}'", keyword))),
        }
    }

    fn parse_token_list(
        &mut self,
        cur: &mut Cursor,
        is_valid: fn(&str) -> bool,
    ) -> Result<Vec<String>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_ws_pe(cur)?;
            let token = cur.read_token();
            if !is_valid(&token) {
                return Err(cur.error(format!("Invalid enumerated value '{}'", token)));
            }
            tokens.push(token);
            self.skip_ws_pe(cur)?;
            if cur.eat(")") {
                return Ok(tokens);
            }
            if !cur.eat("|") {
                return Err(cur.error("Expected '|' or ')' in enumeration"));
            }
        }
    }

    /// ```text
    /// [71] GEDecl ::= '<!ENTITY' S Name S EntityDef S? '>'
    /// [72] PEDecl ::= '<!ENTITY' S '%' S Name S PEDef S? '>'
    /// [73] EntityDef ::= EntityValue | (ExternalID NDataDecl?)
    /// ```
    fn parse_entity_decl(&mut self, cur: &mut Cursor) -> Result<()> {
        cur.advance("<!ENTITY".len());
        self.require_ws(cur, "after '<!ENTITY'")?;

        let is_parameter = cur.peek() == Some('%');
        if is_parameter {
            cur.advance(1);
            self.require_ws(cur, "after '%'")?;
        }
        let name = self.parse_name(cur)?;
        self.require_ws(cur, "after entity name")?;

        let mut decl = EntityDecl {
            name,
            is_parameter,
            value: None,
            system_id: None,
            public_id: None,
            notation: None,
        };

        if matches!(cur.peek(), Some('"' | '\'')) {
            let raw = cur.read_literal()?;
            decl.value = Some(self.entity_value(cur, &raw)?);
        } else {
            let (system_id, public_id) = self.parse_external_id(cur, false)?;
            decl.system_id = system_id;
            decl.public_id = public_id;

            let had_ws = self.skip_ws_pe(cur)?;
            if cur.starts_with("NDATA") {
                if !had_ws || is_parameter {
                    return Err(cur.error("Unexpected NDATA in entity declaration"));
                }
                cur.advance("NDATA".len());
                self.require_ws(cur, "after 'NDATA'")?;
                decl.notation = Some(self.parse_name(cur)?);
            }
        }

        self.skip_ws_pe(cur)?;
        if !cur.eat(">") {
            return Err(cur.error(format!("Expected '>' to end entity '{}'", decl.name)));
        }

        if is_parameter {
            if self.parameter_entities.contains_key(&decl.name) {
                debug!(entity = %decl.name, "ignoring redeclared parameter entity");
                return Ok(());
            }
            self.parameter_entities
                .insert(decl.name.clone(), decl.clone());
        }
        self.handler.entity_decl(&decl)
    }

    /// Replacement text of an entity value literal: parameter entity and
    /// character references are expanded, general entity references
    /// (including the predefined ones) are kept for the point of use.
    fn entity_value(&mut self, cur: &Cursor, raw: &str) -> Result<String> {
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(i) = rest.find('%') {
            out.push_str(&rest[..i]);
            let after = &rest[i + 1..];
            let Some(end) = after.find(';') else {
                return Err(cur.error("Unterminated parameter entity reference in entity value"));
            };
            let name = &after[..end];
            if !is_valid_name(name) {
                return Err(cur.error(format!("Invalid parameter entity reference '%{};'", name)));
            }
            if let Some(decl) = self.parameter_entities.get(name).cloned() {
                self.limits.check_entity_depth(self.entity_depth + 1)?;
                if let Some((_, text)) = self.entity_text(&decl)? {
                    self.entity_depth += 1;
                    let nested = self.entity_value(cur, strip_text_decl(&text));
                    self.entity_depth -= 1;
                    let nested = nested?;
                    self.expanded += nested.len();
                    self.limits.check_document_size(self.expanded)?;
                    out.push_str(&nested);
                }
            } else {
                warn!(entity = name, "reference to undeclared parameter entity");
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        expand_refs(&out, false).map_err(|msg| cur.error(msg))
    }

    /// ```text
    /// [75] ExternalID ::= 'SYSTEM' S SystemLiteral
    ///                   | 'PUBLIC' S PubidLiteral S SystemLiteral
    /// [83] PublicID   ::= 'PUBLIC' S PubidLiteral
    /// ```
    ///
    /// Notation declarations may omit the system literal after `PUBLIC`.
    fn parse_external_id(
        &mut self,
        cur: &mut Cursor,
        public_only_allowed: bool,
    ) -> Result<(Option<String>, Option<String>)> {
        if cur.eat("SYSTEM") {
            self.require_ws(cur, "after 'SYSTEM'")?;
            Ok((Some(cur.read_literal()?), None))
        } else if cur.eat("PUBLIC") {
            self.require_ws(cur, "after 'PUBLIC'")?;
            let public_id = cur.read_literal()?;
            let had_ws = self.skip_ws_pe(cur)?;
            if had_ws && matches!(cur.peek(), Some('"' | '\'')) {
                Ok((Some(cur.read_literal()?), Some(public_id)))
            } else if public_only_allowed {
                Ok((None, Some(public_id)))
            } else {
                Err(cur.error("Expected system literal after public identifier"))
            }
        } else {
            Err(cur.error("Expected 'SYSTEM' or 'PUBLIC'"))
        }
    }

    /// ```text
    /// [82] NotationDecl ::= '<!NOTATION' S Name S (ExternalID | PublicID) S? '>'
    /// ```
    fn parse_notation_decl(&mut self, cur: &mut Cursor) -> Result<()> {
        cur.advance("<!NOTATION".len());
        self.require_ws(cur, "after '<!NOTATION'")?;
        let name = self.parse_name(cur)?;
        self.require_ws(cur, "after notation name")?;
        let (system_id, public_id) = self.parse_external_id(cur, true)?;
        self.skip_ws_pe(cur)?;
        if !cur.eat(">") {
            return Err(cur.error(format!("Expected '>' to end notation '{}'", name)));
        }

        debug!(notation = %name, "notation declaration");
        self.handler
            .notation_decl(&name, system_id.as_deref(), public_id.as_deref())
    }
}

/// Text of one subset being parsed. Parameter entity expansion inside
/// declarations rewrites the buffer.
struct Cursor {
    buf: String,
    pos: usize,
}

impl Cursor {
    fn new(text: &str) -> Self {
        Self {
            buf: text.to_string(),
            pos: 0,
        }
    }

    fn rest(&self) -> &str {
        &self.buf[self.pos..]
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    fn advance(&mut self, bytes: usize) {
        self.pos = (self.pos + bytes).min(self.buf.len());
    }

    fn eat(&mut self, s: &str) -> bool {
        if self.starts_with(s) {
            self.advance(s.len());
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) -> usize {
        let skipped = self
            .rest()
            .find(|c: char| !is_xml_whitespace(c))
            .unwrap_or(self.rest().len());
        self.advance(skipped);
        skipped
    }

    fn skip_past(&mut self, end: &str, message: &str) -> Result<()> {
        match self.rest().find(end) {
            Some(i) => {
                self.advance(i + end.len());
                Ok(())
            }
            None => Err(self.error(message)),
        }
    }

    fn at_pe_reference(&self) -> bool {
        let mut chars = self.rest().chars();
        chars.next() == Some('%')
            && chars
                .next()
                .is_some_and(|c| is_valid_name(c.encode_utf8(&mut [0; 4])))
    }

    /// Read up to the next delimiter of declaration syntax
    fn read_token(&mut self) -> String {
        let len = self
            .rest()
            .find(|c: char| {
                is_xml_whitespace(c)
                    || matches!(
                        c,
                        '|' | ',' | '(' | ')' | '?' | '*' | '+' | '>' | '%' | ';' | '"' | '\''
                            | '[' | ']'
                    )
            })
            .unwrap_or(self.rest().len());
        let token = self.rest()[..len].to_string();
        self.advance(len);
        token
    }

    fn read_quantity(&mut self) -> Quantity {
        let quantity = match self.peek() {
            Some('?') => Quantity::Opt,
            Some('*') => Quantity::Rep,
            Some('+') => Quantity::Plus,
            _ => return Quantity::None,
        };
        self.advance(1);
        quantity
    }

    fn read_literal(&mut self) -> Result<String> {
        let quote = match self.peek() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.error("Expected quoted literal")),
        };
        self.advance(1);
        match self.rest().find(quote) {
            Some(end) => {
                let literal = self.rest()[..end].to_string();
                self.advance(end + 1);
                Ok(literal)
            }
            None => Err(self.error("Unterminated literal")),
        }
    }

    fn splice(&mut self, start: usize, text: &str) {
        self.buf.replace_range(start..self.pos, text);
        self.pos = start;
    }

    fn position(&self) -> Position {
        Position::from_offset(&self.buf, self.pos)
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Parse(ParseError::new(message).with_position(self.position()))
    }
}

/// Skip the body of an `IGNORE` section, including nested sections
fn skip_ignored_section(cur: &mut Cursor) -> Result<()> {
    let mut depth = 1usize;
    while depth > 0 {
        let rest = cur.rest();
        let open = rest.find("<![");
        let close = rest.find("]]>");
        match (open, close) {
            (Some(o), Some(c)) if o < c => {
                depth += 1;
                cur.advance(o + 3);
            }
            (_, Some(c)) => {
                depth -= 1;
                cur.advance(c + 3);
            }
            (_, None) => return Err(cur.error("Unterminated IGNORE section")),
        }
    }
    Ok(())
}

/// Drop a leading `<?xml ...?>` text declaration of an external entity
fn strip_text_decl(text: &str) -> &str {
    let text = text.strip_prefix('\u{FEFF}').unwrap_or(text);
    if text.starts_with("<?xml")
        && text[5..].starts_with(|c: char| is_xml_whitespace(c))
    {
        if let Some(end) = text.find("?>") {
            return &text[end + 2..];
        }
    }
    text
}

/// Expand character references and the predefined entities.
///
/// Other general entity references are left untouched.
pub fn expand_char_refs(text: &str) -> std::result::Result<String, String> {
    expand_refs(text, true)
}

fn expand_refs(text: &str, predefined: bool) -> std::result::Result<String, String> {
    if !text.contains('&') {
        return Ok(text.to_string());
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(i) = rest.find('&') {
        out.push_str(&rest[..i]);
        let after = &rest[i + 1..];
        let Some(end) = after.find(';') else {
            return Err(format!("Unterminated reference in '{}'", text));
        };
        let name = &after[..end];
        if let Some(number) = name.strip_prefix('#') {
            out.push(char_ref(number)?);
        } else if let Some(c) = predefined_entity(name).filter(|_| predefined) {
            out.push_str(c);
        } else {
            out.push('&');
            out.push_str(name);
            out.push(';');
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// The character of a reference `&#<number>;`, decimal or `x` hex
pub fn char_ref(number: &str) -> std::result::Result<char, String> {
    let code = match number.strip_prefix('x') {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => number.parse::<u32>(),
    };
    code.ok()
        .and_then(char::from_u32)
        .ok_or_else(|| format!("Invalid character reference '&#{};'", number))
}

/// Replacement text of the five predefined entities
pub fn predefined_entity(name: &str) -> Option<&'static str> {
    match name {
        "lt" => Some("<"),
        "gt" => Some(">"),
        "amp" => Some("&"),
        "apos" => Some("'"),
        "quot" => Some("\""),
        _ => None,
    }
}

/// Attribute-value normalization: whitespace characters become spaces,
/// and for non-CDATA types runs of spaces collapse and are trimmed.
pub fn normalize_attribute_value(value: &str, is_cdata: bool) -> String {
    let spaced: String = value
        .chars()
        .map(|c| if is_xml_whitespace(c) { ' ' } else { c })
        .collect();
    if is_cdata {
        spaced
    } else {
        spaced.split(' ').filter(|t| !t.is_empty()).collect::<Vec<_>>().join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Recorder {
        elements: Vec<(String, String)>,
        attributes: Vec<(String, String, String, Option<String>, bool)>,
        entities: Vec<EntityDecl>,
        notations: Vec<String>,
        external: Vec<(String, String)>,
    }

    impl DeclHandler for Recorder {
        fn element_decl(&mut self, name: &str, model: &ContentParticle) -> Result<()> {
            self.elements.push((name.to_string(), model.to_string()));
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
            self.attributes.push((
                element.to_string(),
                attribute.to_string(),
                att_type.to_string(),
                default.map(str::to_string),
                is_required,
            ));
            Ok(())
        }

        fn entity_decl(&mut self, decl: &EntityDecl) -> Result<()> {
            self.entities.push(decl.clone());
            Ok(())
        }

        fn notation_decl(
            &mut self,
            name: &str,
            _system_id: Option<&str>,
            _public_id: Option<&str>,
        ) -> Result<()> {
            self.notations.push(name.to_string());
            Ok(())
        }

        fn external_entity(
            &mut self,
            system_id: &str,
            _public_id: Option<&str>,
        ) -> Result<Option<(String, String)>> {
            Ok(self
                .external
                .iter()
                .find(|(id, _)| id == system_id)
                .map(|(id, text)| (id.clone(), text.clone())))
        }
    }

    fn parse(text: &str) -> Recorder {
        let mut recorder = Recorder::default();
        DtdParser::new(&mut recorder).parse(text, None).unwrap();
        recorder
    }

    #[test]
    fn test_element_declarations() {
        let rec = parse(
            r#"
            <!ELEMENT doc (a, b*, c?)>
            <!ELEMENT a EMPTY>
            <!ELEMENT b ANY>
            <!ELEMENT c (#PCDATA)>
            <!ELEMENT d (#PCDATA | a | b)*>
            <!ELEMENT e ((a | b)+, (c))>
            "#,
        );

        let models: Vec<&str> = rec.elements.iter().map(|(_, m)| m.as_str()).collect();
        assert_eq!(
            models,
            vec!["(a,b*,c?)", "EMPTY", "ANY", "(#PCDATA)", "(#PCDATA|a|b)*", "((a|b)+,(c))"]
        );
    }

    #[test]
    fn test_single_item_group_is_seq() {
        let mut recorder = Recorder::default();
        let mut parser = DtdParser::new(&mut recorder);
        parser.parse("<!ELEMENT x (y)+>", None).unwrap();
        drop(parser);
        assert_eq!(recorder.elements[0].1, "(y)+");
    }

    #[test]
    fn test_content_particle_structure() {
        struct Capture(Option<ContentParticle>);
        impl DeclHandler for Capture {
            fn element_decl(&mut self, _name: &str, model: &ContentParticle) -> Result<()> {
                self.0 = Some(model.clone());
                Ok(())
            }
            fn attribute_decl(&mut self, _: &str, _: &str, _: &str, _: Option<&str>, _: bool) -> Result<()> {
                Ok(())
            }
        }

        let mut capture = Capture(None);
        DtdParser::new(&mut capture)
            .parse("<!ELEMENT x (a | b)*>", None)
            .unwrap();
        let model = capture.0.unwrap();
        assert_eq!(model.kind, ParticleKind::Choice);
        assert_eq!(model.quantity, Quantity::Rep);
        assert_eq!(model.children.len(), 2);
        assert_eq!(model.children[1].name.as_deref(), Some("b"));
    }

    #[test]
    fn test_attribute_declarations() {
        let rec = parse(
            r#"<!ATTLIST item
                id ID #REQUIRED
                kind (big|small) "small"
                ver CDATA #FIXED "1.0"
                note CDATA #IMPLIED
                fmt NOTATION (gif | png) #IMPLIED
                refs IDREFS "  a
                   b ">"#,
        );

        assert_eq!(rec.attributes.len(), 6);
        assert_eq!(
            rec.attributes[0],
            ("item".into(), "id".into(), "ID".into(), None, true)
        );
        assert_eq!(rec.attributes[1].2, "(big|small)");
        assert_eq!(rec.attributes[1].3.as_deref(), Some("small"));
        assert!(!rec.attributes[1].4);
        assert_eq!(rec.attributes[2].3.as_deref(), Some("1.0"));
        assert!(rec.attributes[2].4);
        assert_eq!(rec.attributes[3].3, None);
        assert!(!rec.attributes[3].4);
        assert_eq!(rec.attributes[4].2, "NOTATION(gif|png)");
        assert_eq!(rec.attributes[5].3.as_deref(), Some("a b"));
    }

    #[test]
    fn test_entities_and_notations() {
        let rec = parse(
            r#"
            <!NOTATION gif SYSTEM "image/gif">
            <!NOTATION png PUBLIC "-//PNG//EN">
            <!ENTITY copy "&#169; ACME">
            <!ENTITY logo SYSTEM "logo.gif" NDATA gif>
            <!ENTITY % common "(#PCDATA)">
            "#,
        );

        assert_eq!(rec.notations, vec!["gif", "png"]);
        assert_eq!(rec.entities.len(), 3);
        assert_eq!(rec.entities[0].value.as_deref(), Some("\u{A9} ACME"));
        assert!(rec.entities[1].is_unparsed());
        assert!(rec.entities[1].is_external());
        assert!(rec.entities[2].is_parameter);
    }

    #[test]
    fn test_parameter_entity_inside_declaration() {
        let rec = parse(
            r#"
            <!ENTITY % inline "b | i">
            <!ENTITY % text "(#PCDATA | %inline;)*">
            <!ELEMENT p %text;>
            <!ELEMENT q (a, (%inline;))>
            "#,
        );

        assert_eq!(rec.elements[0], ("p".into(), "(#PCDATA|b|i)*".into()));
        assert_eq!(rec.elements[1], ("q".into(), "(a,(b|i))".into()));
    }

    #[test]
    fn test_parameter_entity_between_declarations() {
        let rec = parse(
            r#"
            <!ENTITY % decls "<!ELEMENT a EMPTY><!ELEMENT b EMPTY>">
            %decls;
            "#,
        );
        assert_eq!(rec.elements.len(), 2);
    }

    #[test]
    fn test_external_parameter_entity() {
        let mut recorder = Recorder::default();
        recorder.external.push((
            "mod.ent".to_string(),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><!ELEMENT m EMPTY>".to_string(),
        ));
        DtdParser::new(&mut recorder)
            .parse("<!ENTITY % mod SYSTEM \"mod.ent\"> %mod;", None)
            .unwrap();
        assert_eq!(recorder.elements[0].0, "m");
    }

    #[test]
    fn test_external_subset_shares_parameter_entities() {
        let mut recorder = Recorder::default();
        recorder
            .external
            .push(("doc.dtd".to_string(), "<!ELEMENT doc %content;>".to_string()));

        let mut parser = DtdParser::new(&mut recorder);
        parser.parse("<!ENTITY % content \"(a|b)*\">", None).unwrap();
        assert!(parser.parse_external("doc.dtd", None).unwrap());
        assert!(!parser.parse_external("missing.dtd", None).unwrap());
        assert_eq!(recorder.elements, vec![("doc".to_string(), "(a|b)*".to_string())]);
    }

    #[test]
    fn test_first_parameter_entity_binds() {
        let rec = parse(
            r#"
            <!ENTITY % m "(a)">
            <!ENTITY % m "(b)">
            <!ELEMENT x %m;>
            "#,
        );
        assert_eq!(rec.elements[0].1, "(a)");
    }

    #[test]
    fn test_conditional_sections() {
        let rec = parse(
            r#"
            <![INCLUDE[ <!ELEMENT a EMPTY> ]]>
            <![IGNORE[ <!ELEMENT b EMPTY> <![INCLUDE[ <!ELEMENT c EMPTY> ]]> ]]>
            <!-- <!ELEMENT d EMPTY> -->
            <?pi data?>
            "#,
        );
        assert_eq!(rec.elements.len(), 1);
        assert_eq!(rec.elements[0].0, "a");
    }

    #[test]
    fn test_recursive_parameter_entity_is_bounded() {
        let mut recorder = Recorder::default();
        let result = DtdParser::new(&mut recorder)
            .parse("<!ENTITY % r \"%r;\"> %r;", None);
        // the self reference is undeclared while the value is read
        assert!(result.is_ok());

        let mut recorder = Recorder::default();
        recorder
            .external
            .push(("loop.ent".to_string(), "%loop;".to_string()));
        let result = DtdParser::new(&mut recorder)
            .parse("<!ENTITY % loop SYSTEM \"loop.ent\"> %loop;", None);
        assert!(matches!(result, Err(Error::LimitExceeded(_))));
    }

    #[test]
    fn test_syntax_errors() {
        let mut recorder = Recorder::default();
        let mut parser = DtdParser::new(&mut recorder);

        let err = parser.parse("<!ELEMENT a (b|c,d)>", Some("bad.dtd")).unwrap_err();
        match err {
            Error::Parse(p) => {
                assert!(p.message.contains("Mixed"));
                assert_eq!(p.pathname.as_deref(), Some("bad.dtd"));
                assert!(p.position.is_some());
            }
            other => panic!("unexpected error {:?}", other),
        }

        assert!(parser.parse("<!ELEMENT a (#PCDATA|b)>", None).is_err());
        assert!(parser.parse("<!ELEMENT 1a EMPTY>", None).is_err());
        assert!(parser.parse("<!ATTLIST a b BOGUS #IMPLIED>", None).is_err());
        assert!(parser.parse("<!ELEMENT a ((#PCDATA))>", None).is_err());
        assert!(parser.parse("junk", None).is_err());
    }

    #[test]
    fn test_expand_char_refs() {
        assert_eq!(expand_char_refs("a&#x41;&#66;&lt;&foo;").unwrap(), "aAB<&foo;");
        assert!(expand_char_refs("&#xZZ;").is_err());
        assert!(expand_char_refs("&amp").is_err());
        assert_eq!(char_ref("x3C").unwrap(), '<');
        assert!(char_ref("xD800").is_err());
    }

    #[test]
    fn test_entity_value_keeps_general_references() {
        let rec = parse(r#"<!ENTITY a "&#65; &amp; &b;">"#);
        assert_eq!(rec.entities[0].value.as_deref(), Some("A &amp; &b;"));
    }

    #[test]
    fn test_normalize_attribute_value() {
        assert_eq!(normalize_attribute_value("a\tb\n", true), "a b ");
        assert_eq!(normalize_attribute_value("  a \n b  ", false), "a b");
    }
}
