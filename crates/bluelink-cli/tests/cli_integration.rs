//! CLI integration tests.
//!
//! Most tests drive the binary with `--demo`, which swaps the Bluetooth radio
//! for a simulated heart-rate peripheral named `DUT-1`.
//!
//! Run hardware tests:
//! ```
//! BLUELINK_DUT="My HRM" cargo test --package bluelink-cli --test cli_integration -- --ignored --nocapture
//! ```

use std::path::Path;
use std::process::{Command, Output};

fn bluelink(workdir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bluelink"))
        .args(args)
        .arg("--config")
        .arg(workdir.join("config.toml"))
        .arg("--log-dir")
        .arg(workdir.join("logs"))
        .arg("--no-color")
        .env_remove("BLUELINK_DUT")
        .env_remove("BLUELINK_DEMO")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run bluelink binary")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_help_lists_commands() {
    let dir = tempfile::tempdir().unwrap();
    let output = bluelink(dir.path(), &["--help"]);
    assert!(output.status.success());

    let text = stdout(&output);
    for cmd in ["scan", "cases", "run", "explore", "logs", "config"] {
        assert!(text.contains(cmd), "help should list {cmd}");
    }
}

#[test]
fn test_cases_json() {
    let dir = tempfile::tempdir().unwrap();
    let output = bluelink(dir.path(), &["cases", "--format", "json"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let cases: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let ids: Vec<&str> = cases
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["TC01", "TC02", "TC03", "TC04"]);
}

#[test]
fn test_demo_scan_case_writes_log() {
    let dir = tempfile::tempdir().unwrap();
    let output = bluelink(
        dir.path(),
        &["--demo", "--quiet", "run", "--dut", "DUT-1", "TC01", "--format", "json"],
    );
    assert!(output.status.success(), "{}", stderr(&output));

    let run: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(run["dut_name"], "DUT-1");
    assert_eq!(run["results"][0]["id"], "TC01");
    assert_eq!(run["results"][0]["outcome"]["status"], "passed");
    assert!(dir.path().join("logs").join("TC01_Scan_log.txt").exists());

    let logs = bluelink(dir.path(), &["logs", "TC01"]);
    assert!(logs.status.success(), "{}", stderr(&logs));
    let text = stdout(&logs);
    assert!(text.contains("Target device found: DUT-1"));
    assert!(text.lines().last().unwrap().contains("PASS:"));
}

#[test]
fn test_demo_run_uses_demo_dut_name() {
    let dir = tempfile::tempdir().unwrap();
    let output = bluelink(dir.path(), &["--demo", "--quiet", "run", "TC01"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("1 passed, 0 failed (1 case(s) against DUT-1)"));
}

#[test]
fn test_unknown_case_is_not_implemented() {
    let dir = tempfile::tempdir().unwrap();
    let output = bluelink(
        dir.path(),
        &["--demo", "--quiet", "run", "TC99", "--format", "json"],
    );
    assert!(output.status.success(), "{}", stderr(&output));

    let run: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(run["results"][0]["outcome"]["status"], "not_implemented");
}

#[test]
fn test_run_without_cases_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = bluelink(dir.path(), &["--demo", "--quiet", "run"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("No test case selected"));
}

#[test]
fn test_config_set_dut_persists() {
    let dir = tempfile::tempdir().unwrap();
    let set = bluelink(dir.path(), &["config", "set-dut", "Bench HRM"]);
    assert!(set.status.success(), "{}", stderr(&set));

    let show = bluelink(dir.path(), &["config", "show"]);
    assert!(stdout(&show).contains("dut = \"Bench HRM\""));

    let path = bluelink(dir.path(), &["config", "path"]);
    assert_eq!(
        stdout(&path).trim(),
        dir.path().join("config.toml").display().to_string()
    );

    let unset = bluelink(dir.path(), &["config", "unset-dut"]);
    assert!(unset.status.success());
    assert!(!stdout(&bluelink(dir.path(), &["config", "show"])).contains("Bench HRM"));
}

#[test]
fn test_logs_for_missing_tag_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = bluelink(dir.path(), &["logs", "TC02"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("No log for TC02_Connect"));
}

/// A config with a short settle delay so connected demo runs stay quick.
fn fast_settle(workdir: &Path) {
    std::fs::write(
        workdir.join("config.toml"),
        "[timing]\nsettle_delay_ms = 50\n",
    )
    .unwrap();
}

#[test]
fn test_demo_read_prints_value() {
    let dir = tempfile::tempdir().unwrap();
    fast_settle(dir.path());
    let output = bluelink(dir.path(), &["--demo", "--quiet", "read", "-s", "180D", "-c", "2A38"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "180D/2A38 42");

    let logs = bluelink(dir.path(), &["logs", "gatt_read"]);
    assert!(stdout(&logs).contains("Read success: Value = 42"));
}

#[test]
fn test_demo_watch_stops_after_count() {
    let dir = tempfile::tempdir().unwrap();
    fast_settle(dir.path());
    let output = bluelink(
        dir.path(),
        &["--demo", "--quiet", "watch", "-c", "2A37", "-n", "2", "--duration", "10"],
    );
    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| l.starts_with("180D/2A37 0 ")));
}

#[test]
fn test_demo_explore_lists_services() {
    let dir = tempfile::tempdir().unwrap();
    fast_settle(dir.path());
    let output = bluelink(dir.path(), &["--demo", "--quiet", "explore"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.starts_with("DUT-1 (00:11:22:33:44:55)"));
    assert!(text.contains("Heart Rate [180D]"));
    assert!(text.contains("Body Sensor Location [2A38] READ"));
}

#[test]
#[ignore = "requires BLE hardware"]
fn test_scan_with_hardware() {
    let dir = tempfile::tempdir().unwrap();
    let output = bluelink(dir.path(), &["scan", "--timeout", "5", "--format", "json"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let result: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert!(result["count"].as_u64().is_some());
}

#[test]
#[ignore = "requires BLE hardware"]
fn test_explore_with_hardware() {
    let Ok(dut) = std::env::var("BLUELINK_DUT") else {
        eprintln!("BLUELINK_DUT not set, skipping");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let output = bluelink(dir.path(), &["explore", "--dut", &dut]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains(&dut));
}
