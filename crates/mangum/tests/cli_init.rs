use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::TempDir;

fn mangum_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("mangum"));
    cmd.env_remove("MANGUM_PROJECT").env_remove("RUST_LOG");
    cmd
}

#[test]
fn init_writes_descriptor_and_requirement() {
    let tmp = TempDir::new().unwrap();

    mangum_cmd()
        .args(["init", "shop-api", "shop-code", "eu-west-1", "python3.11"])
        .arg("--no-dynamodb-access")
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Generating initial configuration..."))
        .stdout(predicate::str::contains("Configuration saved to:"))
        .stdout(predicate::str::contains("WARNING").not());

    let descriptor = fs::read_to_string(tmp.path().join("mangum.yml")).unwrap();
    assert_eq!(
        descriptor,
        "name: shop-api\n\
         code_dir: app\n\
         handler: asgi.handler\n\
         bucket_name: shop-code\n\
         region_name: eu-west-1\n\
         runtime: python3.11\n\
         websockets: false\n\
         timeout: 300\n\
         s3_access: true\n\
         dynamodb_access: false\n"
    );

    let requirements = fs::read_to_string(tmp.path().join("requirements.txt")).unwrap();
    assert_eq!(requirements, "mangum\n");
}

#[test]
fn init_defaults_leave_optional_fields_null() {
    let tmp = TempDir::new().unwrap();

    mangum_cmd()
        .args(["init", "shop"])
        .current_dir(tmp.path())
        .assert()
        .success();

    let descriptor = fs::read_to_string(tmp.path().join("mangum.yml")).unwrap();
    assert!(descriptor.contains("bucket_name: null"));
    assert!(descriptor.contains("region_name: null"));
    assert!(descriptor.contains("runtime: python3.12"));
    assert!(descriptor.contains("s3_access: true"));
    assert!(descriptor.contains("dynamodb_access: true"));
}

#[test]
fn illegal_stack_name_warns_but_writes_descriptor() {
    let tmp = TempDir::new().unwrap();

    mangum_cmd()
        .args(["init", "shop_api"])
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("*** WARNING ***"))
        .stdout(predicate::str::contains("Illegal stack name."));

    assert!(tmp.path().join("mangum.yml").is_file());
}

#[test]
fn repeated_init_keeps_single_requirement_line() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("requirements.txt"), "fastapi\n").unwrap();

    for _ in 0..2 {
        mangum_cmd()
            .args(["init", "shop"])
            .current_dir(tmp.path())
            .assert()
            .success();
    }

    let requirements = fs::read_to_string(tmp.path().join("requirements.txt")).unwrap();
    assert_eq!(requirements, "fastapi\nmangum\n");
}

#[test]
fn init_uses_project_override() {
    let tmp = TempDir::new().unwrap();
    let project_dir = tmp.path().join("service");

    mangum_cmd()
        .arg("--project")
        .arg(&project_dir)
        .args(["init", "service"])
        .current_dir(tmp.path())
        .assert()
        .success();

    assert!(project_dir.join("mangum.yml").is_file());
    assert!(!tmp.path().join("mangum.yml").exists());
}

#[test]
fn last_access_flag_wins() {
    let cases = [
        (["--no-s3-access", "--s3-access"], "s3_access: true"),
        (["--s3-access", "--no-s3-access"], "s3_access: false"),
        (["--no-dynamodb-access", "--dynamodb-access"], "dynamodb_access: true"),
        (["--dynamodb-access", "--no-dynamodb-access"], "dynamodb_access: false"),
    ];

    for (flags, expected) in cases {
        let tmp = TempDir::new().unwrap();
        mangum_cmd()
            .args(["init", "shop"])
            .args(flags)
            .current_dir(tmp.path())
            .assert()
            .success();

        let descriptor = fs::read_to_string(tmp.path().join("mangum.yml")).unwrap();
        assert!(descriptor.contains(expected), "{flags:?}: {descriptor}");
    }
}

#[test]
fn init_help_documents_every_access_flag() {
    mangum_cmd()
        .args(["init", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Grant the function full S3 access"))
        .stdout(predicate::str::contains("Deny the function S3 access"))
        .stdout(predicate::str::contains("Deny the function DynamoDB access"));
}
