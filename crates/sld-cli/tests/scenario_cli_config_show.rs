use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn yaml_file(body: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(body.as_bytes()).unwrap();
    f
}

fn sld() -> Command {
    let mut cmd = Command::cargo_bin("sld").unwrap();
    cmd.env_remove("SLD_DATABASE_URL")
        .env_remove("SLD_PRICE_WS_URL")
        .env_remove("SLD_DAEMON_ADDR");
    cmd
}

#[test]
fn config_show_prints_hash_and_redacts_database_url() {
    let base = yaml_file(
        "price_stream:\n  url: ws://127.0.0.1:8081/prices\ndatabase:\n  url: postgres://sld@db.internal/sld\n",
    );
    let local = yaml_file("execution:\n  max_attempts: 3\n");

    sld()
        .args(["config", "show"])
        .arg(base.path())
        .arg(local.path())
        .assert()
        .success()
        .stdout(predicate::str::is_match("config_hash=[0-9a-f]{64}").unwrap())
        .stdout(predicate::str::contains("REDACTED"))
        .stdout(predicate::str::contains("\"max_attempts\": 3"))
        .stdout(predicate::str::contains("db.internal").not());
}

#[test]
fn config_show_refuses_secret_literals() {
    let bad = yaml_file("database:\n  url: postgres://sld:hunter2@db/sld\n");

    sld()
        .args(["config", "show"])
        .arg(bad.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_SECRET_DETECTED"))
        .stderr(predicate::str::contains("hunter2").not());
}

#[test]
fn config_show_with_no_layers_prints_defaults() {
    sld()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"queue_capacity\": 1024"));
}
