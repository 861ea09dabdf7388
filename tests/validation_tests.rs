//! Validation integration tests
//!
//! These tests drive the validator through the public API, both directly
//! with element events and through the XmlParser wrapper.

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use dtdval::validators::{Category, Validator};
use dtdval::{
    Attributes, DtdParser, Error, ErrorKind, Loader, ParserHandler, Position, ValidationError,
    XmlParser,
};

fn fixtures_dir() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path
}

fn validator(dtd: &str, document_element: &str) -> Validator {
    let mut validator = Validator::new();
    DtdParser::new(&mut validator)
        .parse(dtd, None)
        .expect("DTD should parse");
    validator.set_document_element(document_element);
    validator
}

fn pos() -> Position {
    Position::default()
}

/// Run `doc` with the given children (all EMPTY), returning the first error
fn run_children(v: &mut Validator, children: &[&str]) -> Option<ErrorKind> {
    v.reset();
    let result = (|| {
        v.start_element("doc", &[], pos())?;
        for child in children {
            v.start_element(child, &[], pos())?;
            v.end_element(pos())?;
        }
        v.end_element(pos())
    })();
    result.err().map(|e| e.kind)
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_scenario_sequence_with_quantities() {
    let mut v = validator(
        "<!ELEMENT doc (a,b*,c?)><!ELEMENT a EMPTY><!ELEMENT b EMPTY><!ELEMENT c EMPTY>",
        "doc",
    );

    assert_eq!(run_children(&mut v, &["a", "b", "b", "c"]), None);
    assert_eq!(run_children(&mut v, &["a"]), None);
    assert_eq!(run_children(&mut v, &["a", "c", "b"]), Some(ErrorKind::InvalidElement));
    assert_eq!(run_children(&mut v, &["b", "a"]), Some(ErrorKind::InvalidElement));
    assert_eq!(run_children(&mut v, &[]), Some(ErrorKind::InvalidElementPattern));
}

#[test]
fn test_scenario_mixed_content() {
    let mut v = validator(
        "<!ELEMENT doc (#PCDATA|a)*><!ELEMENT a EMPTY><!ELEMENT b EMPTY>",
        "doc",
    );

    v.start_element("doc", &[], pos()).unwrap();
    v.character_data("text", pos()).unwrap();
    v.start_element("a", &[], pos()).unwrap();
    v.end_element(pos()).unwrap();
    v.character_data("more", pos()).unwrap();
    v.start_element("a", &[], pos()).unwrap();
    v.end_element(pos()).unwrap();
    v.end_element(pos()).unwrap();

    v.reset();
    v.start_element("doc", &[], pos()).unwrap();
    let err = v.start_element("b", &[], pos()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidElement);
    assert_eq!(err.containing_element, "doc");
}

#[test]
fn test_scenario_duplicate_id() {
    let mut v = validator(
        "<!ELEMENT doc (item*)><!ELEMENT item EMPTY><!ATTLIST item id ID #REQUIRED>",
        "doc",
    );

    v.start_element("doc", &[], pos()).unwrap();
    v.start_element("item", &[("id", "x")], pos()).unwrap();
    v.end_element(pos()).unwrap();
    let err = v.start_element("item", &[("id", "x")], pos()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DuplicateId);
}

#[test]
fn test_scenario_wrong_document_element_shuts_down() {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&errors);
    let mut v = validator("<!ELEMENT root ANY><!ELEMENT other ANY>", "root")
        .with_handler(move |e: &ValidationError| sink.borrow_mut().push(e.clone()));

    let err = v.start_element("other", &[], pos()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidDocumentElement);
    assert!(v.is_shut_down());

    // everything after the first error is rejected with the same error
    assert_eq!(v.start_element("root", &[], pos()).unwrap_err(), err);
    assert_eq!(v.character_data("x", pos()).unwrap_err(), err);
    assert_eq!(v.end_element(pos()).unwrap_err(), err);
    assert_eq!(errors.borrow().len(), 1);
}

// ============================================================================
// Content model boundaries
// ============================================================================

#[test]
fn test_empty_rejects_content() {
    let mut v = validator("<!ELEMENT doc EMPTY><!ELEMENT a EMPTY>", "doc");
    assert_eq!(run_children(&mut v, &["a"]), Some(ErrorKind::InvalidElement));

    v.reset();
    v.start_element("doc", &[], pos()).unwrap();
    v.character_data("  \n", pos()).unwrap();
    let err = v.character_data("x", pos()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NoCharacterData);
}

#[test]
fn test_any_accepts_declared_elements_recursively() {
    let mut v = validator("<!ELEMENT doc ANY><!ELEMENT a EMPTY>", "doc");

    v.start_element("doc", &[], pos()).unwrap();
    v.character_data("text", pos()).unwrap();
    v.start_element("doc", &[], pos()).unwrap();
    v.start_element("doc", &[], pos()).unwrap();
    v.start_element("a", &[], pos()).unwrap();
    v.end_element(pos()).unwrap();
    v.end_element(pos()).unwrap();
    v.end_element(pos()).unwrap();
    v.end_element(pos()).unwrap();
    assert!(!v.is_shut_down());

    v.reset();
    v.start_element("doc", &[], pos()).unwrap();
    let err = v.start_element("zzz", &[], pos()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UndeclaredElement);
}

#[test]
fn test_plus_sequence_repeats_whole_sequence() {
    let mut v = validator(
        "<!ELEMENT doc (a,b)+><!ELEMENT a EMPTY><!ELEMENT b EMPTY>",
        "doc",
    );
    assert_eq!(v.dfa("doc").unwrap().category(), Category::PureSeq);

    assert_eq!(run_children(&mut v, &["a", "b"]), None);
    assert_eq!(run_children(&mut v, &["a", "b", "a", "b"]), None);
    assert_eq!(run_children(&mut v, &[]), Some(ErrorKind::InvalidElementPattern));
    assert_eq!(run_children(&mut v, &["a", "b", "a"]), Some(ErrorKind::InvalidElementPattern));
    assert_eq!(run_children(&mut v, &["a", "a"]), Some(ErrorKind::InvalidElement));
}

#[test]
fn test_complex_model() {
    let mut v = validator(
        "<!ELEMENT doc ((a|b)*,a,b,b)><!ELEMENT a EMPTY><!ELEMENT b EMPTY>",
        "doc",
    );
    assert_eq!(v.dfa("doc").unwrap().category(), Category::Complex);

    assert_eq!(run_children(&mut v, &["a", "b", "b"]), None);
    assert_eq!(run_children(&mut v, &["b", "a", "a", "b", "b"]), None);
    assert_eq!(run_children(&mut v, &["a", "b"]), Some(ErrorKind::InvalidElementPattern));
    assert_eq!(run_children(&mut v, &["a", "b", "b", "a"]), Some(ErrorKind::InvalidElementPattern));
}

#[test]
fn test_identical_models_share_one_dfa() {
    let v = validator(
        r#"
        <!ELEMENT doc (x|y)*>
        <!ELEMENT one (x | y)*>
        <!ELEMENT two ((x|y))*>
        <!ELEMENT x EMPTY>
        <!ELEMENT y EMPTY>
        "#,
        "doc",
    );

    assert_eq!(v.dfa_count(), 2);
    let doc = v.dfa("doc").unwrap();
    assert!(std::ptr::eq(doc, v.dfa("one").unwrap()));
    assert!(std::ptr::eq(doc, v.dfa("two").unwrap()));
    assert_eq!(doc.model().signature(), "C*(N-x,N-y)");
}

// ============================================================================
// ID / IDREF and reset
// ============================================================================

#[test]
fn test_idref_checked_at_document_close() {
    let mut v = validator(
        r#"
        <!ELEMENT doc (item*)>
        <!ELEMENT item EMPTY>
        <!ATTLIST item id ID #IMPLIED ref IDREF #IMPLIED>
        "#,
        "doc",
    );

    v.start_element("doc", &[], pos()).unwrap();
    // the reference is only resolved when the document element closes
    v.start_element("item", &[("ref", "nowhere")], pos()).unwrap();
    v.end_element(pos()).unwrap();
    v.start_element("item", &[("id", "here")], pos()).unwrap();
    v.end_element(pos()).unwrap();

    let err = v.end_element(Position::new(9, 3, 120)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::IdNotFound);
    assert_eq!(err.current_element, "nowhere");
    assert_eq!(err.position.line, 9);
}

#[test]
fn test_reset_replay_is_idempotent() {
    let mut v = validator(
        r#"
        <!ELEMENT doc (item+)>
        <!ELEMENT item EMPTY>
        <!ATTLIST item id ID #REQUIRED ref IDREFS #IMPLIED>
        "#,
        "doc",
    );

    for _ in 0..2 {
        v.reset();
        v.start_element("doc", &[], pos()).unwrap();
        v.start_element("item", &[("id", "a"), ("ref", "a b")], pos()).unwrap();
        v.end_element(pos()).unwrap();
        v.start_element("item", &[("id", "b")], pos()).unwrap();
        v.end_element(pos()).unwrap();
        v.end_element(pos()).unwrap();

        assert!(!v.is_shut_down());
        assert!(v.ids().is_empty());
        assert!(v.id_refs().is_empty());
    }
}

// ============================================================================
// XmlParser
// ============================================================================

#[derive(Default)]
struct Collector {
    elements: Vec<(String, String)>,
    text: String,
    errors: Vec<ValidationError>,
}

impl ParserHandler for Collector {
    fn start_element(&mut self, container: &str, name: &str, _attributes: &Attributes) -> dtdval::Result<()> {
        self.elements.push((container.to_string(), name.to_string()));
        Ok(())
    }

    fn character_data(&mut self, _container: &str, data: &str) -> dtdval::Result<()> {
        self.text.push_str(data);
        Ok(())
    }

    fn validation_error(&mut self, error: &ValidationError) {
        self.errors.push(error.clone());
    }
}

#[test]
fn test_parse_file_with_external_dtd() {
    let mut parser = XmlParser::new().build_dom(true);
    let mut collector = Collector::default();
    parser
        .parse_file(fixtures_dir().join("book.xml"), &mut collector)
        .unwrap();

    assert!(collector.errors.is_empty());
    assert_eq!(collector.elements[0], (String::new(), "book".to_string()));
    assert_eq!(collector.elements[1], ("book".to_string(), "title".to_string()));
    assert!(collector.text.contains("A short book"));

    let book = parser.dom().unwrap();
    let attributes = book.attributes().unwrap();
    assert_eq!(attributes.get_str("lang"), Some(("en", true)));
    assert_eq!(attributes.get_f64("version").unwrap(), Some((1.0, true)));
    assert_eq!(book.find_children("chapter").count(), 2);
}

#[test]
fn test_parse_file_reports_validation_error() {
    let mut parser = XmlParser::new();
    let mut collector = Collector::default();
    let err = parser
        .parse_file(fixtures_dir().join("invalid_book.xml"), &mut collector)
        .unwrap_err();

    let Error::Validation(err) = err else {
        panic!("expected a validation error, got {:?}", err);
    };
    assert_eq!(err.kind, ErrorKind::InvalidElement);
    assert_eq!(err.current_element, "para");
    assert_eq!(err.containing_element, "chapter");
    assert_eq!(err.position.line, 6);
    assert!(err.pathname.unwrap().ends_with("invalid_book.xml"));
    assert_eq!(collector.errors.len(), 1);
}

#[test]
fn test_in_memory_document_resolves_against_base() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("list.dtd"),
        "<!ELEMENT list (item*)><!ELEMENT item (#PCDATA)>",
    )
    .unwrap();

    let mut parser = XmlParser::new().with_loader(Loader::new().with_base(dir.path()));
    parser
        .parse_str(
            "<!DOCTYPE list SYSTEM \"list.dtd\"><list><item>1</item><item>2</item></list>",
            &mut (),
        )
        .unwrap();
    assert_eq!(parser.validator().dfa_count(), 2);

    let err = parser
        .parse_str("<!DOCTYPE list SYSTEM \"list.dtd\"><list>loose</list>", &mut ())
        .unwrap_err();
    assert!(matches!(err, Error::Validation(ref e) if e.kind == ErrorKind::NoCharacterData));
}

#[test]
fn test_mapped_url_and_internal_subset_order() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("note.dtd"),
        "<!ENTITY % body \"(#PCDATA)\"><!ELEMENT note %body;><!ATTLIST note kind CDATA 'external'>",
    )
    .unwrap();

    let loader = Loader::new().with_url_mapping("http://example.com/dtd/", dir.path());
    let mut parser = XmlParser::new().with_loader(loader).build_dom(true);
    parser
        .parse_str(
            r#"<!DOCTYPE note SYSTEM "http://example.com/dtd/note.dtd" [
                <!ENTITY % body "(#PCDATA|b)*">
                <!ELEMENT b EMPTY>
                <!ATTLIST note kind CDATA 'internal'>
            ]><note>x<b/>y</note>"#,
            &mut (),
        )
        .unwrap();

    // the internal subset comes first, so its declarations bind
    let note = parser.dom().unwrap();
    assert_eq!(note.attributes().unwrap().get_str("kind"), Some(("internal", true)));
    assert_eq!(note.child_data(), "xy");
}

#[test]
fn test_unmapped_remote_dtd_is_a_resource_error() {
    let mut parser = XmlParser::new();
    let err = parser
        .parse_str(
            "<!DOCTYPE a SYSTEM \"http://example.com/a.dtd\"><a/>",
            &mut (),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Resource(_)));
}

#[test]
fn test_parse_dtd_file() {
    let mut parser = XmlParser::new();
    parser.parse_dtd_file(fixtures_dir().join("book.dtd")).unwrap();
    let v = parser.validator();

    assert!(v.element_decl("book").unwrap().is_declared());
    assert!(v.is_mixed("para"));
    assert!(!v.is_mixed("chapter"));
    assert_eq!(v.dfa("title").unwrap().category(), Category::Mixed);
    // title and para share the mixed model
    assert!(std::ptr::eq(v.dfa("title").unwrap(), v.dfa("para").unwrap()));
}
