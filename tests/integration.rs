use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn pidtag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("pidtag");
    path
}

const PAGE_H: f64 = 800.0;

fn run_json(text: &str, x: f64, y: f64, w: f64, h: f64) -> serde_json::Value {
    json!({
        "text": text,
        "transform": [h, 0.0, 0.0, h, x, PAGE_H - y - h],
        "width": w,
        "height": h,
    })
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let dump = json!({
        "pdfFileName": "unit-100.pdf",
        "pages": [{
            "pageNumber": 1,
            "viewport": {"width": 1000.0, "height": PAGE_H, "viewBox": [0.0, 0.0, 1000.0, PAGE_H]},
            "textRuns": [
                run_json("PT", 100.0, 100.0, 14.0, 10.0),
                run_json("101", 98.0, 112.0, 18.0, 10.0),
                run_json("PIC", 300.0, 100.0, 20.0, 10.0),
                run_json("101", 300.0, 112.0, 18.0, 10.0),
                run_json("NOTE 1", 130.0, 100.0, 40.0, 10.0),
                run_json("SET 150 PSIG", 95.0, 130.0, 50.0, 10.0),
                run_json("2\"-CW-1001", 100.0, 300.0, 80.0, 10.0),
                run_json("1. VENDOR SUPPLIED", 600.0, 400.0, 150.0, 10.0),
                run_json("12345A-100-XY", 850.0, 770.0, 100.0, 10.0),
            ],
        }],
    });
    fs::write(root.join("unit-100.pages.json"), dump.to_string()).unwrap();

    let config_content = r#"[tolerances]
vertical = 20.0
horizontal = 20.0
auto_link_distance = 50.0

[export.instrument_types.PT]
instrument_type = "Pressure Transmitter"
io_type = "AI"

[export.instrument_types.PIC]
instrument_type = "Pressure Controller"
io_type = "AO"
"#;
    let config_path = root.join("pidtag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_pidtag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = pidtag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run pidtag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Extract the test page into `project.json` next to the config.
fn extract(tmp: &TempDir, config_path: &Path) -> PathBuf {
    let pages = tmp.path().join("unit-100.pages.json");
    let project = tmp.path().join("project.json");
    let (stdout, stderr, success) = run_pidtag(
        config_path,
        &[
            "extract",
            pages.to_str().unwrap(),
            "-o",
            project.to_str().unwrap(),
            "--detect-notes",
        ],
    );
    assert!(success, "extract failed: {}", stderr);
    assert!(stdout.contains("extract unit-100.pdf"), "stdout: {}", stdout);
    project
}

#[test]
fn test_init_writes_config_once() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("conf").join("pidtag.toml");

    let (stdout, stderr, success) = run_pidtag(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Wrote"));
    let written = fs::read_to_string(&config_path).unwrap();
    assert!(written.contains("[tolerances]"));

    let (_, stderr, success) = run_pidtag(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("already exists"), "stderr: {}", stderr);
}

#[test]
fn test_extract_writes_project() {
    let (tmp, config_path) = setup_test_env();
    let project = extract(&tmp, &config_path);

    let content = fs::read_to_string(&project).unwrap();
    let value: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(value["pdfFileName"], "unit-100.pdf");
    assert!(value["exportDate"].is_string());

    let mut tags: Vec<String> = value["tags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["text"].as_str().unwrap().to_string())
        .collect();
    tags.sort();
    assert_eq!(
        tags,
        vec!["12345A-100-XY", "2\"-CW-1001", "NOTE 1", "PIC-101", "PT-101"]
    );
    assert_eq!(value["descriptions"].as_array().unwrap().len(), 1);
    assert_eq!(value["rawTextItems"].as_array().unwrap().len(), 1);
}

#[test]
fn test_link_then_export_csv() {
    let (tmp, config_path) = setup_test_env();
    let project = extract(&tmp, &config_path);
    let project_arg = project.to_str().unwrap();

    let (stdout, stderr, success) = run_pidtag(&config_path, &["link", project_arg]);
    assert!(success, "link failed: {}", stderr);
    assert!(stdout.contains("annotations: 1 relationships added"), "stdout: {}", stdout);
    assert!(stdout.contains("notes: 1 relationships added"));
    assert!(stdout.contains("descriptions: 1 relationships added"));
    assert!(stdout.contains("loops: 1 created"));

    // A second run adds nothing.
    let (stdout, _, success) = run_pidtag(&config_path, &["link", project_arg]);
    assert!(success);
    assert!(stdout.contains("annotations: 0 relationships added"), "stdout: {}", stdout);
    assert!(stdout.contains("loops: 0 created"));

    let (stdout, stderr, success) = run_pidtag(&config_path, &["export", project_arg]);
    assert!(success, "export failed: {}", stderr);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines[0],
        "No.,Drawing Number,Loop No.,Tag,Line,Instrument Type,IO Type,Notes"
    );
    assert_eq!(
        lines[1],
        r#"1,12345A-100-XY,P-101,PT-101,"2""-CW-1001",Pressure Transmitter,AI,NOTE 1: VENDOR SUPPLIED"#
    );
    assert_eq!(
        lines[2],
        r#"2,12345A-100-XY,P-101,PIC-101,"2""-CW-1001",Pressure Controller,AO,"#
    );
    assert_eq!(lines.len(), 3);
}

#[test]
fn test_link_single_step() {
    let (tmp, config_path) = setup_test_env();
    let project = extract(&tmp, &config_path);

    let (stdout, stderr, success) =
        run_pidtag(&config_path, &["link", project.to_str().unwrap(), "--loops"]);
    assert!(success, "link failed: {}", stderr);
    assert!(stdout.contains("loops: 1 created"));
    assert!(!stdout.contains("annotations"));

    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&project).unwrap()).unwrap();
    assert_eq!(value["relationships"].as_array().unwrap().len(), 0);
    assert_eq!(value["loops"][0]["id"], "P-101");
}

#[test]
fn test_export_to_file() {
    let (tmp, config_path) = setup_test_env();
    let project = extract(&tmp, &config_path);
    let csv_path = tmp.path().join("out").join("instruments.csv");

    let (stdout, stderr, success) = run_pidtag(
        &config_path,
        &[
            "export",
            project.to_str().unwrap(),
            "-o",
            csv_path.to_str().unwrap(),
        ],
    );
    assert!(success, "export failed: {}", stderr);
    assert!(stdout.is_empty());
    assert!(stderr.contains("Exported 2 instruments"));
    let csv = fs::read_to_string(&csv_path).unwrap();
    assert_eq!(csv.lines().count(), 3);
}

#[test]
fn test_stats_and_validate() {
    let (tmp, config_path) = setup_test_env();
    let project = extract(&tmp, &config_path);
    let project_arg = project.to_str().unwrap();
    let (_, _, success) = run_pidtag(&config_path, &["link", project_arg]);
    assert!(success);

    let (stdout, stderr, success) = run_pidtag(&config_path, &["stats", project_arg]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("P&ID Tagger: Project Stats"));
    assert!(stdout.contains("Tags: 5"), "stdout: {}", stdout);
    assert!(stdout.contains("Relationships: 3"));
    assert!(stdout.contains("Loops:         1"));

    let (stdout, stderr, success) = run_pidtag(&config_path, &["validate", project_arg]);
    assert!(success, "validate failed: {}", stderr);
    assert!(stdout.starts_with("ok:"));
    assert!(stdout.contains("5 tags"));
}

#[test]
fn test_invalid_project_is_rejected() {
    let (tmp, config_path) = setup_test_env();
    let bad = tmp.path().join("bad.json");
    fs::write(
        &bad,
        r#"{"pdfFileName":"x.pdf","exportDate":"2024-01-01T00:00:00Z","relationships":[],"rawTextItems":[]}"#,
    )
    .unwrap();

    let (_, stderr, success) = run_pidtag(&config_path, &["validate", bad.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Failed to load project"), "stderr: {}", stderr);

    let (_, _, success) = run_pidtag(&config_path, &["export", bad.to_str().unwrap()]);
    assert!(!success);
}

#[test]
fn test_invalid_pattern_in_config_fails() {
    let (tmp, config_path) = setup_test_env();
    fs::write(&config_path, "[patterns]\nline = \"([unclosed\"\n").unwrap();

    let pages = tmp.path().join("unit-100.pages.json");
    let out = tmp.path().join("project.json");
    let (_, stderr, success) = run_pidtag(
        &config_path,
        &["extract", pages.to_str().unwrap(), "-o", out.to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.contains("invalid pattern"), "stderr: {}", stderr);
    assert!(!out.exists());
}

#[test]
fn test_optimize_tolerances_json() {
    let (tmp, config_path) = setup_test_env();
    let pages = tmp.path().join("unit-100.pages.json");

    let (stdout, stderr, success) = run_pidtag(
        &config_path,
        &["optimize", "tolerances", pages.to_str().unwrap(), "--quick", "--json"],
    );
    assert!(success, "optimize failed: {}", stderr);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["pagesTested"], json!([1]));
    assert!(value["score"].as_f64().unwrap() >= value["baselineScore"].as_f64().unwrap());
    assert!(value["tolerances"]["Instrument"]["vertical"].is_number());
}

#[test]
fn test_optimize_notes_reports_multiplier() {
    let (tmp, config_path) = setup_test_env();
    let project = extract(&tmp, &config_path);

    let (stdout, stderr, success) = run_pidtag(
        &config_path,
        &["optimize", "notes", project.to_str().unwrap(), "--json"],
    );
    assert!(success, "optimize failed: {}", stderr);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["noteCount"], 1);
    assert_eq!(value["instrumentCount"], 2);
    assert_eq!(value["connections"].as_array().unwrap().len(), 1);
    assert_eq!(value["connections"][0]["page"], 1);
}

#[test]
fn test_completions() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("pidtag.toml");
    let (stdout, stderr, success) = run_pidtag(&config_path, &["completions", "bash"]);
    assert!(success, "completions failed: {}", stderr);
    assert!(stdout.contains("pidtag"));
}
