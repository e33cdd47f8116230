use assert_cmd::Command;
use predicates::str::contains;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn bin() -> Command {
    let path = assert_cmd::cargo::cargo_bin!("rcd");
    Command::new(path)
}

fn parse_json(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).expect("json output")
}

fn scaffold_install(root: &Path) {
    fs::create_dir_all(root.join("warehouse").join("config")).unwrap();
    fs::create_dir_all(root.join("nebula")).unwrap();
}

#[test]
fn no_arguments_shows_help() {
    bin()
        .assert()
        .success()
        .stdout(contains("Usage"))
        .stdout(contains("install"));
}

#[test]
fn unknown_command_routes_to_help() {
    bin()
        .arg("frobnicate")
        .assert()
        .success()
        .stdout(contains("Usage"))
        .stderr(contains("unknown command"));
}

#[test]
fn install_fails_when_destination_is_a_file() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("rsl");
    fs::write(&dest, "occupied").unwrap();

    bin()
        .env("RCD_SKIP_ENV_CHECKS", "1")
        .arg("install")
        .arg("--dest")
        .arg(&dest)
        .arg("--python")
        .arg("python3")
        .arg("--defaults")
        .assert()
        .failure()
        .stderr(contains("not a directory"));

    assert!(dest.is_file());
}

#[test]
fn install_failure_uses_json_envelope() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("rsl");
    fs::write(&dest, "occupied").unwrap();

    let output = bin()
        .env("RCD_SKIP_ENV_CHECKS", "1")
        .arg("--json")
        .arg("install")
        .arg("--dest")
        .arg(&dest)
        .arg("--python")
        .arg("python3")
        .arg("--defaults")
        .assert()
        .failure()
        .get_output()
        .stdout
        .clone();

    let value = parse_json(&output);
    assert_eq!(value["ok"], Value::Bool(false));
    assert!(value["error"]
        .as_str()
        .expect("error message")
        .contains("not a directory"));
}

#[test]
fn doctor_json_reports_missing_prerequisites() {
    let output = bin()
        .env("PATH", "")
        .arg("--json")
        .arg("doctor")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = parse_json(&output);
    assert_eq!(value["ok"], Value::Bool(false));
    let checks = value["result"]["checks"].as_array().expect("checks array");
    let systemd = checks
        .iter()
        .find(|check| check["id"] == "systemd")
        .expect("systemd check");
    assert_eq!(systemd["ok"], Value::Bool(false));
    assert_eq!(systemd["severity"], "error");
    assert!(checks.iter().any(|check| check["id"] == "node_runtime"));
}

#[test]
fn doctor_fails_without_prerequisites_outside_json_mode() {
    bin()
        .env("PATH", "")
        .arg("doctor")
        .arg("--strict")
        .assert()
        .failure()
        .stdout(contains("[fail]"));
}

#[test]
fn uninstall_requires_yes() {
    let dir = tempdir().unwrap();
    bin()
        .arg("uninstall")
        .arg("--dest")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(contains("--yes"));
}

#[test]
fn uninstall_dry_run_reports_plan_and_preserves_files() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("rsl");
    scaffold_install(&root);

    let output = bin()
        .arg("--json")
        .arg("uninstall")
        .arg("--dest")
        .arg(&root)
        .arg("--dry-run")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = parse_json(&output);
    assert_eq!(value["ok"], Value::Bool(true));
    assert_eq!(value["result"]["dry_run"], Value::Bool(true));
    let plan = value["result"]["would_remove"]
        .as_array()
        .expect("removal plan");
    assert_eq!(plan.len(), 2);
    assert!(root.join("warehouse").is_dir());
    assert!(root.join("nebula").is_dir());
}

#[test]
fn update_fails_without_an_existing_install() {
    let dir = tempdir().unwrap();
    bin()
        .arg("update")
        .arg("--dest")
        .arg(dir.path().join("missing"))
        .arg("--python")
        .arg("python3")
        .assert()
        .failure()
        .stderr(contains("rcd install"));
}

#[test]
fn up_rejects_unknown_service() {
    bin()
        .arg("up")
        .arg("frobnicator")
        .assert()
        .failure()
        .stderr(contains("unknown service"));
}
