use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn ovm() -> Command {
    Command::new(env!("CARGO_BIN_EXE_ovm"))
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[test]
fn test_convert_requires_reference() {
    ovm()
        .arg("convert")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("<REFERENCE>"));
}

#[test]
fn test_convert_rejects_unknown_filesystem() {
    ovm()
        .args(["convert", "library/ubuntu", "--fs", "vfat"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("vfat"));
}

#[test]
fn test_convert_rejects_unknown_flag() {
    ovm()
        .args(["convert", "library/ubuntu", "--bogus"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--bogus"));
}

#[test]
fn test_convert_stops_before_work_area_without_tools() {
    let work = TempDir::new().unwrap();

    ovm()
        .args(["convert", "library/ubuntu"])
        .env("PATH", "")
        .env("OVM_WORK_DIR", work.path())
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(
            predicate::str::contains("missing required tool: skopeo")
                .or(predicate::str::contains("requires root privileges")),
        );

    assert!(fs::read_dir(work.path()).unwrap().next().is_none());
}

#[test]
fn test_inspect_summary() {
    ovm()
        .arg("inspect")
        .arg(fixture("ubuntu-manifest.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("ubuntu:22.04"))
        .stdout(predicate::str::contains("disk layers"))
        .stdout(predicate::str::contains("firecracker, cloud-hypervisor"));
}

#[test]
fn test_inspect_json_round_trips_fields() {
    let output = ovm()
        .arg("inspect")
        .arg("--json")
        .arg(fixture("ubuntu-manifest.json"))
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["schemaVersion"], 1);
    assert_eq!(value["mediaType"], "application/vnd.ovms.manifest.v1+json");
    assert_eq!(value["diskLayers"].as_array().unwrap().len(), 2);
    assert_eq!(value["devices"][1]["mmio_addr"], "0xd0001000");
}

#[test]
fn test_inspect_rejects_foreign_media_type() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("manifest.json");
    let original = fs::read_to_string(fixture("ubuntu-manifest.json")).unwrap();
    fs::write(
        &path,
        original.replace("application/vnd.ovms.manifest.v1+json", "application/json"),
    )
    .unwrap();

    ovm()
        .arg("inspect")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("mediaType"));
}

#[test]
fn test_inspect_missing_file() {
    ovm()
        .args(["inspect", "/nonexistent/ovm-manifest.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load manifest"));
}
