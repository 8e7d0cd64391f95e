use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::TempDir;

fn mangum_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("mangum"))
}

#[test]
fn completion_outputs_script() {
    mangum_cmd()
        .args(["completion", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mangum"))
        .stdout(predicate::str::contains("create-bucket"));
}

#[test]
fn completion_installs_into_file() {
    let tmp = TempDir::new().unwrap();
    let rc = tmp.path().join("bashrc");
    fs::write(&rc, "# existing\n").unwrap();

    mangum_cmd()
        .args(["completion", "bash"])
        .arg(&rc)
        .arg("--append")
        .assert()
        .success()
        .stdout(predicate::str::contains("bash completion installed in"));

    let contents = fs::read_to_string(&rc).unwrap();
    assert!(contents.starts_with("# existing\n"));
    assert!(contents.contains("mangum"));

    mangum_cmd()
        .args(["completion", "zsh"])
        .arg(&rc)
        .assert()
        .success();
    assert!(!fs::read_to_string(&rc).unwrap().contains("# existing"));
}

#[test]
fn completion_append_requires_path() {
    mangum_cmd()
        .args(["completion", "bash", "--append"])
        .assert()
        .failure();
}
