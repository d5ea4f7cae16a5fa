use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_version_output() {
    let mut cmd = Command::cargo_bin("cendol-embed").expect("binary built");
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("cendol-embed version "))
        .stdout(predicate::str::contains("Target: "));
}

#[test]
fn test_verbose_prints_jobs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("one.c");
    fs::write(&source, "int one(void) { return 1; }\n").expect("write");

    let mut cmd = Command::cargo_bin("cendol-embed").expect("binary built");
    cmd.current_dir(dir.path())
        .args(["-v", "--target=x86_64-unknown-linux-gnu", "-c", "one.c"])
        .assert()
        .success()
        .stderr(predicate::str::contains(" -cc1 --triple x86_64-unknown-linux-gnu --emit-obj"));
    assert!(dir.path().join("one.o").exists());
}

#[test]
fn test_errors_exit_with_failure() {
    let mut cmd = Command::cargo_bin("cendol-embed").expect("binary built");
    cmd.arg("-c")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no input files"));
}
