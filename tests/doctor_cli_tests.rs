mod common;

use std::process::Command;

use common::TestEnv;

#[test]
fn doctor_subcommand_is_available() {
    let output = Command::new(env!("CARGO_BIN_EXE_parcelcam"))
        .args(["doctor", "--help"])
        .output()
        .expect("failed to execute parcelcam");

    assert!(
        output.status.success(),
        "doctor --help should succeed\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn doctor_command_runs() {
    let env = TestEnv::new();
    env.write_storage_config();
    let output = env.run(&["doctor"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(
        output.status.success(),
        "doctor should run successfully\nstdout:\n{}\nstderr:\n{}",
        stdout,
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.contains("parcelcam doctor"));
    assert!(stdout.contains("ffmpeg"));
    assert!(stdout.contains("server: not configured"));
}

#[test]
fn doctor_json_is_parseable() {
    let env = TestEnv::new();
    env.write_storage_config();
    let output = env.run(&["doctor", "--json"]);
    assert!(output.status.success());

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("doctor --json should print JSON");
    assert_eq!(report["save_mode"], "local");
    assert!(report["server"].is_null());

    let checks = report["checks"].as_array().expect("checks array");
    let library = checks
        .iter()
        .find(|check| check["name"] == "library")
        .expect("library check");
    assert_eq!(library["status"], "ok");
}
