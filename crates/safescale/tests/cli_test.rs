#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;

mod common;
use common::TestTenant;

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("safescale").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("host"))
        .stdout(predicate::str::contains("network"))
        .stdout(predicate::str::contains("subnet"))
        .stdout(predicate::str::contains("template"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("safescale").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("safescale"));
}

#[test]
fn test_host_create_help() {
    let mut cmd = Command::cargo_bin("safescale").unwrap();
    cmd.args(["host", "create", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--network"))
        .stdout(predicate::str::contains("--cpu"))
        .stdout(predicate::str::contains("--keep-on-failure"));
}

#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("safescale").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

#[test]
fn test_template_list() {
    let tenant = TestTenant::new();
    tenant
        .command()
        .args(["template", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("s1.tiny"))
        .stdout(predicate::str::contains("g4.large"));
}

#[test]
fn test_image_list() {
    let tenant = TestTenant::new();
    tenant
        .command()
        .args(["image", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Ubuntu 22.04"));
}

#[test]
fn test_inspect_unknown_host_is_a_user_error() {
    let tenant = TestTenant::new();
    tenant
        .command()
        .args(["host", "inspect", "nope"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_invalid_tenant_file() {
    let tenant = TestTenant::new();
    std::fs::write(tenant.path().join("safescale.yaml"), "name: [unclosed").unwrap();
    tenant
        .command()
        .args(["host", "list"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("tenant file"));
}
