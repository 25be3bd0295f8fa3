use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn stockroom_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("stockroom"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("STOCKROOM_CDN_KEY")
        .env_remove("STOCKROOM_PAYMENTS_KEY")
        .current_dir(home);
    cmd
}

fn init_project(home: &TempDir) -> std::path::PathBuf {
    let dir = home.path().join("shop");
    stockroom_cmd(home.path())
        .args(["init", dir.to_str().expect("utf-8 path")])
        .assert()
        .success();
    dir
}

#[test]
fn init_scaffolds_a_valid_project() {
    let home = TempDir::new().expect("home");
    let dir = init_project(&home);

    assert!(dir.join("stockroom.yaml").is_file());
    assert!(dir.join("manifest.json").is_file());
    assert!(dir.join("media").is_dir());

    stockroom_cmd(home.path())
        .args(["validate", "--config"])
        .arg(dir.join("stockroom.yaml"))
        .assert()
        .success()
        .stdout(contains("0 products"));
}

#[test]
fn init_leaves_existing_files_alone() {
    let home = TempDir::new().expect("home");
    let dir = init_project(&home);
    fs::write(dir.join("manifest.json"), "{\"version\": 1}\n").expect("write");

    init_project(&home);
    assert_eq!(
        fs::read_to_string(dir.join("manifest.json")).expect("read"),
        "{\"version\": 1}\n"
    );
}

#[test]
fn validate_rejects_invalid_manifest() {
    let home = TempDir::new().expect("home");
    let dir = init_project(&home);
    fs::write(
        dir.join("manifest.json"),
        r#"{"version":1,"products":[
            {"id":"x","name":"X","basePrice":1},
            {"id":"x","name":"X","basePrice":1}]}"#,
    )
    .expect("write");

    stockroom_cmd(home.path())
        .args(["validate", "--config"])
        .arg(dir.join("stockroom.yaml"))
        .assert()
        .failure()
        .stderr(contains("duplicate product id 'x'"));
}

#[test]
fn config_is_found_in_the_working_directory() {
    let home = TempDir::new().expect("home");
    let dir = init_project(&home);

    stockroom_cmd(home.path())
        .current_dir(&dir)
        .arg("validate")
        .assert()
        .success();
}

#[test]
fn dry_run_sync_reports_and_writes_nothing() {
    let home = TempDir::new().expect("home");
    let dir = init_project(&home);
    let manifest = r#"{"version":1,"products":[
        {"id":"mug","name":"Mug","basePrice":1200,"sellStatus":"for-sale"}]}"#;
    fs::write(dir.join("manifest.json"), manifest).expect("write");

    let output = stockroom_cmd(home.path())
        .args(["sync", "--dry-run", "--json", "--config"])
        .arg(dir.join("stockroom.yaml"))
        .output()
        .expect("run");
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["dry_run"], true);
    assert_eq!(report["catalog"]["created"], 1);
    assert_eq!(report["persistence"]["ran"], false);

    assert_eq!(
        fs::read_to_string(dir.join("manifest.json")).expect("read"),
        manifest
    );
    assert!(!dir.join("stockroom.db").exists());
}

#[test]
fn real_sync_without_credentials_fails() {
    let home = TempDir::new().expect("home");
    let dir = init_project(&home);

    stockroom_cmd(home.path())
        .args(["sync", "--config"])
        .arg(dir.join("stockroom.yaml"))
        .assert()
        .failure()
        .stderr(contains("STOCKROOM_CDN_KEY"));
}
