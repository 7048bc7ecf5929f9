use assert_cmd::Command;
use predicates::prelude::*;
use std::time::{Duration, Instant};

fn vortex() -> Command {
    Command::new(env!("CARGO_BIN_EXE_vortex"))
}

/// PIDs of live processes whose command line contains `marker`
fn processes_matching(marker: &str) -> Vec<i32> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| {
            let pid: i32 = entry.file_name().to_str()?.parse().ok()?;
            let cmdline = std::fs::read(entry.path().join("cmdline")).ok()?;
            String::from_utf8_lossy(&cmdline)
                .contains(marker)
                .then_some(pid)
        })
        .collect()
}

fn assert_no_survivors(marker: &str) {
    for _ in 0..40 {
        if processes_matching(marker).is_empty() {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("processes survived: {:?}", processes_matching(marker));
}

#[test]
fn test_help_command() {
    vortex()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("graceful stop"))
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("version"));
}

#[test]
fn test_run_help_lists_stop_options() {
    vortex()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--stop-timeout"))
        .stdout(predicate::str::contains("--stop-signal"))
        .stdout(predicate::str::contains("--restart"));
}

#[test]
fn test_version_command() {
    vortex()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("vortex"));

    vortex()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_invalid_command() {
    vortex()
        .arg("invalid")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_run_without_id() {
    vortex()
        .args(["run", "--", "/bin/echo", "test"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn test_run_without_command() {
    vortex()
        .args(["run", "--id", "test"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn test_exit_code_is_propagated() {
    vortex()
        .args(["run", "--id", "exit3", "--", "sh", "-c", "exit 3"])
        .assert()
        .code(3)
        .stdout(predicate::str::contains("exited with code 3"));
}

#[test]
fn test_stop_after_sends_sigterm() {
    let start = Instant::now();

    vortex()
        .args(["run", "--id", "sleeper", "--stop-after", "1", "--", "sleep", "30"])
        .timeout(Duration::from_secs(20))
        .assert()
        .code(143)
        .stdout(predicate::str::contains("exited with code 143"));

    assert!(start.elapsed() < Duration::from_secs(15));
}

#[test]
fn test_stop_escalates_to_kill() {
    // Neither the shell nor its sleep child reacts to SIGTERM
    vortex()
        .args([
            "run",
            "--id",
            "stubborn",
            "--stop-after",
            "1",
            "--stop-timeout",
            "1",
            "--",
            "sh",
            "-c",
            "trap '' TERM; sleep 33.19; true",
        ])
        .timeout(Duration::from_secs(20))
        .assert()
        .code(137);

    assert_no_survivors("33.19");
}

#[test]
fn test_stop_reaches_shell_children() {
    vortex()
        .args([
            "run",
            "--id",
            "shell",
            "--stop-after",
            "1",
            "--",
            "sh",
            "-c",
            "sleep 34.23 && exit 42",
        ])
        .timeout(Duration::from_secs(20))
        .assert()
        .code(143);

    assert_no_survivors("34.23");
}

#[test]
fn test_invalid_stop_timeout_names_literal() {
    vortex()
        .args(["run", "--id", "bad", "--stop-timeout", "soon", "--", "true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"soon\""));
}

#[test]
fn test_invalid_container_id() {
    vortex()
        .args(["run", "--id", "not valid", "--", "true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid container ID"));
}

#[test]
fn test_invalid_restart_policy() {
    vortex()
        .args(["run", "--id", "r", "--restart", "sometimes", "--", "true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid restart policy"));
}
