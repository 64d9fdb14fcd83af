use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("shelfdb-cli").unwrap();
    cmd.env_remove("SHELFDB_PASSWORD")
        .env_remove("SHELFDB_CONFIG")
        .env("RUST_LOG", "off");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("test"))
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("save-default"));
}

#[test]
fn test_corrupt_host_fails_without_dialing() {
    cli()
        .args([
            "test",
            "--kind",
            "postgresql",
            "--host",
            "smtp.gmail.com",
            "--username",
            "app",
            "--password",
            "pw",
            "--database",
            "shop",
        ])
        .timeout(std::time::Duration::from_secs(5))
        .assert()
        .code(1)
        .stdout(predicate::str::diff("FAILED\n"));
}

#[test]
fn test_missing_credentials_fail_init_with_code() {
    cli()
        .args(["init", "--kind", "mysql", "--database", "shop"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E_CONFIG"));
}

#[test]
fn test_save_then_show_default_redacts_password() {
    let temp_dir = TempDir::new().unwrap();
    let store = temp_dir.path().join("default.json");

    cli()
        .args(["save-default", "--store"])
        .arg(&store)
        .args([
            "--kind",
            "mongodb",
            "--host",
            "mongo.internal",
            "--username",
            "app",
            "--password",
            "hunter2",
            "--database",
            "shop",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved default target"));

    cli()
        .args(["show-default", "--store"])
        .arg(&store)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"host\": \"mongo.internal\""))
        .stdout(predicate::str::contains("***"))
        .stdout(predicate::str::contains("hunter2").not());
}

#[test]
fn test_show_default_without_store_file() {
    let temp_dir = TempDir::new().unwrap();

    cli()
        .args(["show-default", "--store"])
        .arg(temp_dir.path().join("missing.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("No default target saved"));
}

#[test]
fn test_bad_settings_file_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let settings = temp_dir.path().join("shelfdb.toml");
    std::fs::write(&settings, "dial_timeout_secs = 0\n").unwrap();

    cli()
        .arg("--settings")
        .arg(&settings)
        .args(["show-default", "--store"])
        .arg(temp_dir.path().join("default.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("dial_timeout_secs"));
}

#[test]
fn test_verbose_logs_loaded_settings() {
    let temp_dir = TempDir::new().unwrap();

    cli()
        .env_remove("RUST_LOG")
        .arg("--verbose")
        .args(["show-default", "--store"])
        .arg(temp_dir.path().join("missing.json"))
        .assert()
        .success()
        .stderr(predicate::str::contains("Manager settings"))
        .stderr(predicate::str::contains("dial_timeout_secs"));
}
