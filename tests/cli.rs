use std::path::Path;
use std::process::{Command, Output};

const DOCUMENT: &str = r#"{
  "reg_id": "GB-50054",
  "title": "Low-voltage distribution",
  "blocks": [
    {"text": "1. General", "page_num": 1, "y": 0, "label": "section_header"},
    {"text": "This code applies to low-voltage distribution design.", "page_num": 1, "y": 10},
    {"text": "2. Conductors", "page_num": 1, "y": 20, "label": "section_header"},
    {"cells": [["Section", "Current"], ["10", "57"]], "page_num": 1, "y": 30, "label": "table"},
    {"cells": [["16", "76"], ["25", "101"]], "page_num": 2, "y": 0, "label": "table"},
    {"text": "Neutral conductors shall match phase conductors, see 1.", "page_num": 2, "y": 10}
  ]
}"#;

fn regdoc(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_regdoc"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn json(output: &Output) -> serde_json::Value {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

fn ingested() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("doc.json"), DOCUMENT).unwrap();
    let report = json(&regdoc(
        dir.path(),
        &["ingest", "doc.json", "--format", "json"],
    ));
    assert_eq!(report["regId"], "GB-50054");
    assert_eq!(report["totalPages"], 2);
    assert_eq!(report["crossPageTables"], 1);
    assert_eq!(report["replaced"], false);
    dir
}

#[test]
fn ingest_then_query_every_surface() {
    let dir = ingested();
    let path = dir.path();

    let listed = json(&regdoc(path, &["list", "--format", "json"]));
    assert_eq!(listed[0]["regId"], "GB-50054");

    let toc = json(&regdoc(path, &["toc", "GB-50054", "--format", "json"]));
    assert_eq!(toc["entries"].as_array().unwrap().len(), 2);

    let results = json(&regdoc(
        path,
        &["search", "neutral conductors", "--reg-id", "GB-50054", "--format", "json"],
    ));
    let results = results.as_array().unwrap();
    assert!(!results.is_empty());
    assert!(results.len() <= 10);

    let tables = json(&regdoc(
        path,
        &["search", "current", "--type", "table", "--format", "json"],
    ));
    assert!(tables
        .as_array()
        .unwrap()
        .iter()
        .all(|r| r["blockType"] == "table"));

    let pages = regdoc(path, &["pages", "GB-50054", "2"]);
    assert!(pages.status.success());
    let markdown = String::from_utf8_lossy(&pages.stdout);
    assert!(markdown.contains("| 10 | 57 |"));
    assert!(markdown.contains("| 25 | 101 |"));

    let table = json(&regdoc(
        path,
        &["table", "GB-50054", "t0001-003", "--format", "json"],
    ));
    assert_eq!(table["rowCount"], 3);

    let resolved = json(&regdoc(
        path,
        &["resolve", "GB-50054", "see clause 2", "--format", "json"],
    ));
    assert_eq!(resolved["kind"], "chapter");
    assert_eq!(resolved["sectionNumber"], "2");
}

#[test]
fn bare_block_array_needs_reg_id() {
    let dir = tempfile::tempdir().unwrap();
    let blocks = r#"[{"text": "1. Scope", "page_num": 1, "label": "section_header"},
                     {"text": "Scope text.", "page_num": 1, "y": 5}]"#;
    std::fs::write(dir.path().join("blocks.json"), blocks).unwrap();

    let missing = regdoc(dir.path(), &["ingest", "blocks.json"]);
    assert!(!missing.status.success());

    let report = json(&regdoc(
        dir.path(),
        &["ingest", "blocks.json", "--reg-id", "DL-5222", "--format", "json"],
    ));
    assert_eq!(report["regId"], "DL-5222");
}

#[test]
fn errors_exit_non_zero() {
    let dir = ingested();
    let path = dir.path();

    assert!(!regdoc(path, &["toc", "NOPE"]).status.success());
    assert!(!regdoc(path, &["pages", "GB-50054", "1", "11"]).status.success());
    assert!(!regdoc(path, &["search", "x", "--type", "figure"]).status.success());

    assert!(regdoc(path, &["delete", "GB-50054"]).status.success());
    let listed = json(&regdoc(path, &["list", "--format", "json"]));
    assert!(listed.as_array().unwrap().is_empty());
}
