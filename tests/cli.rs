//! Tests for the netlab binary
//!
//! Everything that materializes a topology uses the sim backend so these
//! run without privileges.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

/// Helper function to create a command instance for the netlab binary
fn cli_command() -> Command {
    Command::cargo_bin("netlab").expect("Failed to find netlab binary")
}

#[test]
fn test_cli_help() {
    cli_command()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("show"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn test_cli_list_command() {
    cli_command()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Built-in presets:"))
        .stdout(predicate::str::contains("routed"))
        .stdout(predicate::str::contains("switched"))
        .stdout(predicate::str::contains("result1.txt"));
}

#[test]
fn test_cli_show_preset_is_json() {
    let output = cli_command()
        .args(["show", "switched"])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["name"], "switched");
    assert_eq!(json["nodes"].as_array().unwrap().len(), 5);
}

#[test]
fn test_cli_run_routed_on_sim() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("routed.txt");

    cli_command()
        .args(["run", "routed", "--backend", "sim", "--output"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Routes: 9 applied, 0 failed"))
        .stdout(predicate::str::contains("4/4 probes succeeded"));

    let artifact = std::fs::read_to_string(&output).unwrap();
    assert!(artifact.starts_with("==== h1 → 10.0.2.2 ====\n"));
}

#[test]
fn test_cli_run_scenario_file() {
    let dir = tempdir().unwrap();
    let scenario = dir.path().join("pair.json");
    let output = dir.path().join("pair.txt");
    std::fs::write(
        &scenario,
        r#"{
            "name": "pair",
            "nodes": [
                { "id": "a", "role": "host", "address": "192.168.5.1/24" },
                { "id": "b", "role": "host", "address": "192.168.5.2/24" }
            ],
            "links": [ { "a": { "node": "a" }, "b": { "node": "b" } } ],
            "probes": [
                { "source": "a", "destination": "192.168.5.2" },
                { "source": "b", "destination": "192.168.9.9" }
            ]
        }"#,
    )
    .unwrap();

    cli_command()
        .arg("run")
        .arg(&scenario)
        .args(["--backend", "sim", "-o"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("1/2 probes succeeded"));

    let artifact = std::fs::read_to_string(&output).unwrap();
    assert!(artifact.contains("==== b → 192.168.9.9 ====\nping: connect: Network is unreachable"));
}

#[test]
fn test_cli_config_file_selects_backend() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("lab.json");
    let output = dir.path().join("out.txt");
    std::fs::write(
        &config,
        format!(
            r#"{{ "backend": "sim", "output": {} }}"#,
            serde_json::to_string(&output).unwrap()
        ),
    )
    .unwrap();

    cli_command()
        .arg("--config")
        .arg(&config)
        .args(["run", "switched"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2/2 probes succeeded"));
    assert!(output.exists());
}

#[test]
fn test_cli_unknown_scenario() {
    cli_command()
        .args(["run", "nonexistent_scenario", "--backend", "sim"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown scenario"));
}

#[test]
fn test_cli_invalid_scenario_file() {
    let dir = tempdir().unwrap();
    let scenario = dir.path().join("broken.json");
    std::fs::write(
        &scenario,
        r#"{ "name": "broken", "nodes": [ { "id": "h1", "role": "host" } ],
             "links": [ { "a": { "node": "h1" }, "b": { "node": "ghost" } } ] }"#,
    )
    .unwrap();

    cli_command()
        .arg("run")
        .arg(&scenario)
        .args(["--backend", "sim"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ghost"));
}

#[test]
fn test_cli_check_with_sim_backend() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("lab.json");
    std::fs::write(&config, r#"{ "backend": "sim" }"#).unwrap();

    cli_command()
        .arg("--config")
        .arg(&config)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("Network namespaces: "));
}
