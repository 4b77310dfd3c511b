//! Integration tests for core CLI contract behavior.
//!
//! Everything here runs without a connected controller: the firmware
//! image is validated before any device is opened, so file errors and
//! argument errors are deterministic.

use {predicates::prelude::*, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("elanflash")
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("elanflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("elanflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn help_lists_all_subcommands() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("update")
                .and(predicate::str::contains("info"))
                .and(predicate::str::contains("counter"))
                .and(predicate::str::contains("calibrate")),
        );
}

// ============================================================================
// Exit Code Tests
// ============================================================================

/// Exit code 2: usage error (unknown command, invalid arguments)
#[test]
fn exit_code_two_for_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_invalid_flag() {
    let mut cmd = cli_cmd();
    cmd.arg("--invalid-flag-xyz")
        .arg("info")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_missing_update_file() {
    let mut cmd = cli_cmd();
    cmd.arg("update")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("FIRMWARE"));
}

#[test]
fn exit_code_two_for_invalid_pid() {
    let mut cmd = cli_cmd();
    cmd.args(["--pid", "notahexnumber", "info"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("hex"));
}

/// Exit code 1: runtime error, reported with the vendor numeric kind
#[test]
fn update_with_missing_file_reports_file_not_found_code() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir.path().join("does_not_exist.ekt");

    let mut cmd = cli_cmd();
    cmd.arg("update")
        .arg(nonexistent.as_os_str())
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("0x0105"));
}

#[test]
fn update_quiet_still_reports_the_failure() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir.path().join("does_not_exist.ekt");

    let mut cmd = cli_cmd();
    cmd.arg("--quiet")
        .arg("update")
        .arg(nonexistent.as_os_str())
        .assert()
        .failure()
        .stderr(predicate::str::contains("0x0105"));
}

// ============================================================================
// -- Option Terminator Tests
// ============================================================================

#[test]
fn option_terminator_allows_dash_prefixed_operand() {
    let dir = tempdir().expect("tempdir should be created");
    let dashed = dir.path().join("-touch.ekt");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("update")
        .arg("--")
        .arg(&dashed)
        .assert()
        .failure()
        // Parses as a path; fails as a missing file, not a usage error.
        .code(1)
        .stderr(predicate::str::contains("0x0105"));
}

// ============================================================================
// TTY Detection Tests (colors disabled on non-TTY)
// ============================================================================

#[test]
fn colors_disabled_when_not_tty() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir.path().join("does_not_exist.ekt");

    let mut cmd = cli_cmd();
    let output = cmd
        .arg("update")
        .arg(nonexistent.as_os_str())
        .assert()
        .failure()
        .get_output()
        .clone();

    let stderr = String::from_utf8(output.stderr).expect("stderr should be utf-8");
    assert!(
        !stderr.contains("\x1b["),
        "Colors should be disabled in non-TTY mode"
    );
}
