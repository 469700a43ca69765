use std::{fs, time::Duration};

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::tempdir;

const STDIN_CONFIG: &str = r#"version: "1"
event_source:
  kind: stdin
grace_period: "1s"
launchers:
  sh: sh
slots:
  - uid: "2dxQ"
    program: "long.sh"
  - uid: "2dyi"
    program: "hello.mp3"
  - uid: "2dy4"
    program: "../demo.py -e"
"#;

#[test]
fn check_prints_slot_table() {
    let temp = tempdir().expect("failed to create tempdir");
    let config_path = temp.path().join("toggled.yaml");
    fs::write(&config_path, STDIN_CONFIG).expect("failed to write config");

    Command::new(assert_cmd::cargo::cargo_bin!("toggled"))
        .arg("check")
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .assert()
        .success()
        .stdout(contains("event source: stdin"))
        .stdout(contains("sh long.sh"))
        .stdout(contains("mpg123 hello.mp3"))
        .stdout(contains("python3 ../demo.py -e"));
}

#[test]
fn check_emits_json() {
    let temp = tempdir().expect("failed to create tempdir");
    let config_path = temp.path().join("toggled.yaml");
    fs::write(&config_path, STDIN_CONFIG).expect("failed to write config");

    let output = Command::new(assert_cmd::cargo::cargo_bin!("toggled"))
        .args(["--log-level", "off", "check", "--json", "--config"])
        .arg(config_path.to_str().unwrap())
        .output()
        .expect("failed to run toggled");
    assert!(output.status.success());

    let rows: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    let rows = rows.as_array().expect("array of slots");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1]["uid"], "2dyi");
    assert_eq!(rows[1]["command"][0], "mpg123");
}

#[test]
fn check_rejects_invalid_config() {
    let temp = tempdir().expect("failed to create tempdir");
    let config_path = temp.path().join("toggled.yaml");
    fs::write(
        &config_path,
        r#"version: "1"
slots:
  - uid: ""
    program: "a.py"
"#,
    )
    .expect("failed to write config");

    Command::new(assert_cmd::cargo::cargo_bin!("toggled"))
        .arg("check")
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .assert()
        .failure()
        .stderr(contains("ConfigError"));
}

#[test]
fn run_exits_cleanly_when_stdin_closes() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let config_path = dir.join("toggled.yaml");
    fs::write(&config_path, STDIN_CONFIG).expect("failed to write config");
    fs::write(dir.join("long.sh"), "sleep 30\n").expect("failed to write script");

    Command::new(assert_cmd::cargo::cargo_bin!("toggled"))
        .arg("run")
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .env("NO_COLOR", "1")
        .write_stdin("2dxQ 1\n2dxQ 0\n")
        .timeout(Duration::from_secs(20))
        .assert()
        .success()
        .stdout(contains("Service running with 3 button(s)"))
        .stdout(contains("Stopping program for slot 0"))
        .stdout(contains("Shutdown complete"));
}

#[test]
fn run_fails_when_button_daemon_is_unreachable() {
    let temp = tempdir().expect("failed to create tempdir");
    let config_path = temp.path().join("toggled.yaml");

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    fs::write(
        &config_path,
        format!(
            r#"version: "1"
event_source:
  kind: tcp
  address: "{address}"
slots:
  - uid: "2dxQ"
    program: "a.py"
"#
        ),
    )
    .expect("failed to write config");

    Command::new(assert_cmd::cargo::cargo_bin!("toggled"))
        .arg("run")
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .timeout(Duration::from_secs(20))
        .assert()
        .failure()
        .stdout(contains("Failed to connect to event source"))
        .stderr(contains("Connection"));
}
