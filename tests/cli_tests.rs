use assert_cmd::Command;
use predicates::str::contains;
use serde_json::Value;

fn cmem() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("cmem"));
    cmd.env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_cli_help() {
    cmem()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("simulate"))
        .stdout(contains("demo-surprise"));
}

#[test]
fn test_cli_version() {
    cmem().arg("--version").assert().success();
}

#[test]
fn test_cli_config_reads_environment() {
    let output = cmem()
        .arg("config")
        .env("CONTINUUM_OUTER_LOOP_FREQUENCY", "7")
        .output()
        .unwrap();
    assert!(output.status.success());

    let config: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(config["orchestrator"]["outer_loop_frequency"], 7);
    assert!(config["strata"]["capacities"].is_object());
}

#[test]
fn test_cli_demo_surprise() {
    cmem()
        .arg("demo-surprise")
        .assert()
        .success()
        .stdout(contains("Contradicted prediction is more surprising."));
}

#[test]
fn test_cli_simulate_json() {
    let output = cmem()
        .args(["simulate", "--agent", "tester", "--cycles", "20", "--seed", "7", "--json"])
        .env("CONTINUUM_OUTER_LOOP_FREQUENCY", "5")
        .output()
        .unwrap();
    assert!(output.status.success());

    let summary: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["cycles"], 20);
    assert_eq!(summary["outer_loops"], 4);
    assert_eq!(summary["statistics"]["strata"]["cycle_count"], 20);
    assert!(summary["statistics"]["strata"]["total_memories"].as_u64().unwrap() > 0);
}

#[test]
fn test_cli_simulate_text() {
    cmem()
        .args(["simulate", "--cycles", "6", "--seed", "1"])
        .assert()
        .success()
        .stdout(contains("Simulation for"))
        .stdout(contains("Outer loops: 1"))
        .stdout(contains("Strata:"));
}

#[test]
fn test_cli_rejects_unknown_command() {
    cmem().arg("explode").assert().failure();
}
