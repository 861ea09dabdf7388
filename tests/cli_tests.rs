//! CLI integration tests
//!
//! These tests verify the CLI commands work correctly by running the binary.

#![cfg(feature = "cli")]

use std::path::PathBuf;
use std::process::Command;

fn dtdval_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_dtdval"))
}

fn fixtures_dir() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path
}

// ============================================================================
// Validate Command Tests
// ============================================================================

#[test]
fn test_cli_validate_valid() {
    let output = Command::new(dtdval_bin())
        .args(["validate", fixtures_dir().join("book.xml").to_str().unwrap()])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "validate should succeed");
    assert!(stdout.contains("Document is valid"));
}

#[test]
fn test_cli_validate_invalid() {
    let output = Command::new(dtdval_bin())
        .args(["validate", fixtures_dir().join("invalid_book.xml").to_str().unwrap()])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!output.status.success(), "validate should fail");
    assert!(stdout.contains("Document is invalid"));
    assert!(stdout.contains("para"), "should name the offending element");
    assert!(stdout.contains("line 6"), "should give the line");
}

#[test]
fn test_cli_validate_json() {
    let output = Command::new(dtdval_bin())
        .args([
            "validate",
            "--json",
            fixtures_dir().join("invalid_book.xml").to_str().unwrap(),
        ])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("should be valid JSON");
    assert_eq!(json["valid"], false);
    assert_eq!(json["error"]["kind"], "InvalidElement");
    assert_eq!(json["error"]["current_element"], "para");
    assert_eq!(json["error"]["position"]["line"], 6);
}

#[test]
fn test_cli_validate_missing_file() {
    let output = Command::new(dtdval_bin())
        .args(["validate", "/nonexistent/doc.xml"])
        .output()
        .expect("Failed to execute command");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success());
    assert!(stderr.contains("Error"));
}

// ============================================================================
// Inspect Command Tests
// ============================================================================

#[test]
fn test_cli_inspect_basic() {
    let output = Command::new(dtdval_bin())
        .args(["inspect", fixtures_dir().join("book.dtd").to_str().unwrap()])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "inspect should succeed");
    assert!(stdout.contains("dtdval v"), "should show version");
    assert!(stdout.contains("ELEMENT book"));
    assert!(stdout.contains("ATTLIST id ID #REQUIRED"));
}

#[test]
fn test_cli_inspect_element_json() {
    let output = Command::new(dtdval_bin())
        .args([
            "inspect",
            "--json",
            "--element",
            "chapter",
            fixtures_dir().join("book.dtd").to_str().unwrap(),
        ])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("should be valid JSON");
    assert_eq!(json["name"], "chapter");
    assert_eq!(json["model"], "(title,para*)");
    assert_eq!(json["mixed"], false);
    assert_eq!(json["attributes"][0], "id ID #REQUIRED");
}

#[test]
fn test_cli_inspect_unknown_element() {
    let output = Command::new(dtdval_bin())
        .args([
            "inspect",
            "--element",
            "nope",
            fixtures_dir().join("book.dtd").to_str().unwrap(),
        ])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
}
