//! Basic CLI integration tests.

#![allow(deprecated)] // Command::cargo_bin deprecated for custom build-dir; still works for default

use assert_cmd::Command;
use pretty_assertions::assert_eq;

fn mailpack() -> Command {
    let mut cmd = Command::cargo_bin("mailpack").unwrap();
    for key in ["WEBLETTER_URL", "WEBLETTER_TOKEN", "PROXY", "GATE_IMAGE_SIZE", "COMPRESSION_RATIO"] {
        cmd.env_remove(key);
    }
    cmd
}

#[test]
fn help_prints_and_exits_success() {
    mailpack().arg("--help").assert().success();
}

#[test]
fn print_config_json_valid() {
    let out = mailpack().args(["--print-config", "--json"]).assert().success();
    let stdout = std::str::from_utf8(&out.get_output().stdout).unwrap();
    let value: serde_json::Value = serde_json::from_str(stdout).expect("--print-config --json should output valid JSON");
    assert_eq!(value["image_dir_name"], "images");
}

#[test]
fn print_config_masks_token() {
    let out = mailpack()
        .env("WEBLETTER_TOKEN", "super-secret")
        .args(["--print-config"])
        .assert()
        .success();
    let stdout = std::str::from_utf8(&out.get_output().stdout).unwrap();
    assert!(!stdout.contains("super-secret"));
    let token_line = stdout.lines().find(|l| l.starts_with("Webletter token:"));
    assert_eq!(token_line, Some("Webletter token: ********"));
}

#[test]
fn missing_path_argument_fails() {
    mailpack().assert().failure();
}

#[test]
fn nonexistent_file_fails() {
    let out = mailpack().arg("/nonexistent/template.html").assert().failure();
    let stderr = std::str::from_utf8(&out.get_output().stderr).unwrap();
    assert!(stderr.contains("not found"), "{stderr}");
}

#[test]
fn unsupported_extension_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "hello").unwrap();
    let out = mailpack().arg(&path).assert().failure();
    let stderr = std::str::from_utf8(&out.get_output().stderr).unwrap();
    assert!(stderr.contains("Unsupported"), "{stderr}");
    assert_eq!(stderr.lines().filter(|l| l.starts_with("Error: ")).count(), 1);
}

#[test]
fn invalid_config_value_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.html");
    std::fs::write(&path, "<p>hi</p>").unwrap();
    mailpack()
        .env("COMPRESSION_RATIO", "12")
        .arg(&path)
        .assert()
        .failure();
}

#[test]
fn packages_template_without_images() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("letter.html");
    std::fs::write(
        &path,
        r#"<!DOCTYPE html><html><head><meta http-equiv="Content-Type" content="text/html; charset=utf-8" /></head><body><p>Hello   world</p></body></html>"#,
    )
    .unwrap();

    let out = mailpack().arg(&path).arg("--json").assert().success();
    let stdout = std::str::from_utf8(&out.get_output().stdout).unwrap();
    let report: serde_json::Value = serde_json::from_str(stdout).unwrap();
    assert_eq!(report["images"].as_array().map(Vec::len), Some(0));
    assert!(dir.path().join("letter.zip").is_file());
}

#[test]
fn zip_input_is_extracted() {
    let dir = tempfile::tempdir().unwrap();
    let html = dir.path().join("letter.html");
    std::fs::write(&html, "<html><head></head><body><p>x</p></body></html>").unwrap();
    mailpack().arg(&html).assert().success();

    mailpack().arg(dir.path().join("letter.zip")).assert().success();
    assert!(dir.path().join("build/index.html").is_file());
}
