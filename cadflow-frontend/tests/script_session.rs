use std::fs;

use cadflow_config::AppConfig;
use cadflow_frontend::{
    CliOptions, DocumentSource, LoadedDocument, load_document, parse_script, run_cli, run_session,
};
use tempfile::tempdir;

const DRAWING: &str = "\
# 一条线段加一个圆，随后撤销圆并重做
op Create Line
click 0 0
move 5 5
click 10 10
wait

op Create Circle
click 20 0
click 23 4
wait

undo
redo
";

#[test]
fn script_builds_document_and_saved_file_reloads() {
    let dir = tempdir().unwrap();
    let mut config = AppConfig::default();
    config.storage.default_directory = Some(dir.path().to_path_buf());

    let script = parse_script(&format!("{DRAWING}save drawing.cadflow\n")).unwrap();
    let (listing, document) = run_session(&config, &script, LoadedDocument::empty()).unwrap();

    assert_eq!(listing.tree, vec!["Line, 1".to_string(), "Circle, 2".to_string()]);
    assert_eq!(listing.history_level, 2);
    assert_eq!(listing.entities[0].vertices, vec![[0.0, 0.0, 0.0], [10.0, 10.0, 0.0]]);
    assert_eq!(listing.entities[1].radius, Some(5.0));

    let reloaded = load_document(Some(&dir.path().join("drawing.cadflow")), &config.storage);
    assert!(matches!(reloaded.source, DocumentSource::File(_)));
    assert_eq!(reloaded.document.entities(), document.entities());
}

#[test]
fn listing_serializes_to_json() {
    let script = parse_script(DRAWING).unwrap();
    let (listing, _) =
        run_session(&AppConfig::default(), &script, LoadedDocument::empty()).unwrap();
    let value = serde_json::to_value(&listing).unwrap();

    assert_eq!(value["source"], "empty");
    assert_eq!(value["entities"][0]["kind"], "Line");
    assert!(value["entities"][0].get("radius").is_none());
    assert_eq!(value["entities"][1]["radius"], 5.0);
    assert_eq!(value["operations"][1]["outcome"], "committed");
}

#[test]
fn run_cli_reads_script_opens_and_saves_files() {
    let dir = tempdir().unwrap();
    let script_path = dir.path().join("session.txt");
    fs::write(&script_path, DRAWING).unwrap();
    let first = dir.path().join("first.cadflow");

    let options = CliOptions {
        script: Some(script_path),
        save: Some(first.clone()),
        ..CliOptions::default()
    };
    run_cli(&AppConfig::default(), &options).unwrap();
    assert_eq!(load_document(Some(&first), &AppConfig::default().storage).document.len(), 2);

    let extend = dir.path().join("extend.txt");
    fs::write(&extend, "op Create Arc\nclick 0 0\nclick 2 0\nclick 0 2\nwait\n").unwrap();
    let second = dir.path().join("second.cadflow");
    let options = CliOptions {
        open: Some(first),
        script: Some(extend),
        save: Some(second.clone()),
        json: true,
    };
    run_cli(&AppConfig::default(), &options).unwrap();

    let document = load_document(Some(&second), &AppConfig::default().storage).document;
    assert_eq!(document.len(), 3);
    assert!(document.contains(cadflow_core::entity::Uid::new(3)));
}

#[test]
fn missing_script_is_reported() {
    let dir = tempdir().unwrap();
    let options = CliOptions {
        script: Some(dir.path().join("none.txt")),
        ..CliOptions::default()
    };
    let err = run_cli(&AppConfig::default(), &options).unwrap_err();
    assert!(matches!(err, cadflow_frontend::errors::FrontendError::ReadScript { .. }));
}
