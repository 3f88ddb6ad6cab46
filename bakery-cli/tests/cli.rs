//! End-to-end tests for the generated command line, via `bakery-shout`.

#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use std::fs;
use tempfile::TempDir;

fn shout() -> Command {
    Command::cargo_bin("bakery-shout").expect("bakery-shout binary")
}

fn sandbox(input: &str) -> TempDir {
    let td = tempfile::tempdir().expect("tempdir");
    fs::write(td.path().join("in.txt"), input).unwrap();
    fs::create_dir_all(td.path().join("ws")).unwrap();
    td
}

fn run_in(td: &TempDir) -> Command {
    let mut cmd = shout();
    cmd.current_dir(td.path()).args(["--workspace-dir", "ws"]);
    cmd
}

#[test]
fn test_shouts_into_output_file() {
    let td = sandbox("hello");

    run_in(&td)
        .args(["--x", "in.txt", "--z", "out.txt"])
        .assert()
        .success();

    assert_eq!(fs::read_to_string(td.path().join("out.txt")).unwrap(), "HELLO!");
    assert_eq!(fs::read_dir(td.path().join("ws")).unwrap().count(), 0);
}

#[test]
fn test_missing_input_exits_2() {
    let td = sandbox("hello");

    run_in(&td)
        .args(["--x", "nope.txt", "--z", "out.txt"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("error[MissingInputPathError]"));

    assert!(!td.path().join("out.txt").exists());
}

#[test]
fn test_existing_output_needs_overwrite() {
    let td = sandbox("hello");
    fs::write(td.path().join("out.txt"), "keep me").unwrap();

    run_in(&td)
        .args(["--x", "in.txt", "--z", "out.txt"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("OutputExistsError"));
    assert_eq!(fs::read_to_string(td.path().join("out.txt")).unwrap(), "keep me");

    run_in(&td)
        .args(["--x", "in.txt", "--z", "out.txt", "--overwrite"])
        .assert()
        .success();
    assert_eq!(fs::read_to_string(td.path().join("out.txt")).unwrap(), "HELLO!");
}

#[test]
fn test_config_file_enables_overwrite() {
    let td = sandbox("hi");
    fs::write(td.path().join("out.txt"), "old").unwrap();
    fs::write(td.path().join("bakery.toml"), "[driver]\noverwrite = true\n").unwrap();

    run_in(&td)
        .args(["--x", "in.txt", "--z", "out.txt"])
        .assert()
        .success();
    assert_eq!(fs::read_to_string(td.path().join("out.txt")).unwrap(), "HI!");
}

#[test]
fn test_broken_config_exits_2() {
    let td = sandbox("hi");
    fs::write(td.path().join("custom.toml"), "[driver\n").unwrap();

    run_in(&td)
        .args(["--x", "in.txt", "--z", "out.txt", "--config", "custom.toml"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("error[ConfigError]"));
}

#[test]
fn test_missing_tag_flag_is_a_usage_error() {
    let td = sandbox("hello");

    run_in(&td)
        .args(["--x", "in.txt"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--z"));
}

#[test]
fn test_commit_failure_exits_1_and_changes_nothing() {
    let td = sandbox("hello");
    fs::create_dir_all(td.path().join("out.txt").join("inner")).unwrap();

    run_in(&td)
        .args(["--x", "in.txt", "--z", "out.txt", "--overwrite"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("commit error"));

    assert!(td.path().join("out.txt").join("inner").is_dir());
}

#[test]
fn test_report_is_written_as_json() {
    let td = sandbox("hello");

    run_in(&td)
        .args(["--x", "in.txt", "--z", "out.txt", "--report", "reports/run.json"])
        .assert()
        .success();

    let json = fs::read_to_string(td.path().join("reports").join("run.json")).unwrap();
    let report: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(report["schema"], "bakery.run.v1");
    assert_eq!(report["transform"], "shout");
    assert_eq!(report["state"], "completed");
    assert_eq!(report["outputs"][0]["tag"], "z");
    assert_eq!(report["outputs"][0]["bytes"], 6);
}

#[test]
fn test_report_is_written_on_failure_too() {
    let td = sandbox("hello");

    run_in(&td)
        .args(["--x", "gone.txt", "--z", "out.txt", "--report", "run.json"])
        .assert()
        .code(2);

    let json = fs::read_to_string(td.path().join("run.json")).unwrap();
    let report: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(report["state"], "rolled_back");
    assert_eq!(report["error"]["category"], "resolution");
}

#[test]
fn test_summary_prints_markdown() {
    let td = sandbox("hello");

    run_in(&td)
        .args(["--x", "in.txt", "--z", "out.txt", "--summary"])
        .assert()
        .success()
        .stdout(predicate::str::contains("# bakery run"))
        .stdout(predicate::str::contains("`completed`"));
}

#[test]
fn test_describe_needs_no_tag_flags() {
    shout()
        .arg("--describe")
        .assert()
        .success()
        .stdout(predicate::str::contains("# bakery transform: shout"))
        .stdout(predicate::str::contains("`uppercase` (leaf) x → y"));
}

#[test]
fn test_help_lists_tag_flags() {
    shout()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--x <PATH>"))
        .stdout(predicate::str::contains("--z <PATH>"));
}
