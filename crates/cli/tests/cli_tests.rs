//! CLI integration tests

use std::io::Write;
use std::process::{Command, Output};

fn k20s(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_k20s"))
        .args(args)
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to execute command")
}

fn write_temp(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(contents.as_bytes()).expect("Failed to write temp file");
    file
}

const SCALE_PROFILE: &str = r#"{
    "metadata": { "name": "web", "namespace": "shop" },
    "spec": {
        "selector": { "matchLabels": { "app": "web" } },
        "cpuThresholds": { "min": 20, "max": 60 },
        "optimizationPolicy": "Scale"
    }
}"#;

const WORKLOADS: &str = r#"[
    {
        "kind": "Deployment",
        "namespace": "shop",
        "name": "web",
        "labels": { "app": "web" },
        "replicas": 2,
        "containers": [ { "name": "app", "cpuRequest": "500m" } ]
    }
]"#;

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = k20s(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("K20s resource optimizer"), "Should show about text");
    assert!(stdout.contains("evaluate"), "Should show evaluate command");
    assert!(stdout.contains("resize"), "Should show resize command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = k20s(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("k20s"), "Should show binary name");
}

#[test]
fn test_resize_table_output() {
    let output = k20s(&[
        "resize",
        "--current",
        "500m",
        "--observed",
        "90",
        "--min",
        "30",
        "--max",
        "70",
    ]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(
        output.status.success(),
        "resize should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.contains("1125m"), "Should show new request, got {}", stdout);
}

#[test]
fn test_resize_json_respects_max_cpu() {
    let output = k20s(&[
        "--format",
        "json",
        "resize",
        "--current",
        "500m",
        "--observed",
        "90",
        "--max-cpu",
        "1",
    ]);
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("resize json");
    assert_eq!(json["recommended"], "1");
    assert_eq!(json["current"], "500m");
}

#[test]
fn test_resize_rejects_bad_quantity() {
    let output = k20s(&["resize", "--current", "lots", "--observed", "90"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid current request"));
}

#[test]
fn test_evaluate_scale_up_json() {
    let profile = write_temp(SCALE_PROFILE);
    let workloads = write_temp(WORKLOADS);

    let output = k20s(&[
        "--format",
        "json",
        "evaluate",
        "--profile",
        profile.path().to_str().unwrap(),
        "--workloads",
        workloads.path().to_str().unwrap(),
        "--samples",
        "70,80",
    ]);
    assert!(
        output.status.success(),
        "evaluate failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("decision json");
    assert_eq!(json["action"], "ScaleUp");
    assert_eq!(json["value"], 75.0);
    assert_eq!(json["outcomes"][0]["outcome"], "applied");
    assert_eq!(json["status"]["lastAction"]["type"], "ScaleUp");
}

#[test]
fn test_evaluate_saved_status_blocks_next_run() {
    let profile = write_temp(SCALE_PROFILE);
    let workloads = write_temp(WORKLOADS);
    let saved = tempfile::NamedTempFile::new().unwrap();

    let first = k20s(&[
        "evaluate",
        "-p",
        profile.path().to_str().unwrap(),
        "-w",
        workloads.path().to_str().unwrap(),
        "-s",
        "90",
        "--at",
        "2026-01-01T00:00:00Z",
        "--save",
        saved.path().to_str().unwrap(),
    ]);
    assert!(first.status.success(), "first run failed: {}", String::from_utf8_lossy(&first.stderr));

    let second = k20s(&[
        "--format",
        "json",
        "evaluate",
        "-p",
        saved.path().to_str().unwrap(),
        "-w",
        workloads.path().to_str().unwrap(),
        "-s",
        "90",
        "--at",
        "2026-01-01T00:01:00Z",
    ]);
    assert!(second.status.success());

    let json: serde_json::Value = serde_json::from_slice(&second.stdout).expect("decision json");
    assert_eq!(json["action"], "ScaleUp");
    assert!(json["newActionRecord"].is_null(), "cooldown should block the second action");
    assert!(json["outcomes"].as_array().unwrap().is_empty());
}

#[test]
fn test_evaluate_without_samples_reports_no_data() {
    let profile = write_temp(SCALE_PROFILE);

    let path = profile.path().to_str().unwrap();
    let output = k20s(&["--format", "json", "evaluate", "--profile", path]);
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("decision json");
    assert!(json["value"].is_null());
    assert_eq!(json["status"]["observedMetrics"]["cpu_usage"], "no_data");
}

#[test]
fn test_evaluate_missing_profile_fails() {
    let output = k20s(&["evaluate", "--profile", "/nonexistent/profile.json"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to read"));
}
