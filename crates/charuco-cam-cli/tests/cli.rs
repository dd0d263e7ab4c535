use assert_cmd::Command;
use predicates::prelude::*;

fn cmd() -> Command {
    Command::cargo_bin("charuco-cam").expect("binary")
}

#[test]
fn help_lists_all_modes() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("board"))
        .stdout(predicate::str::contains("calibrate"))
        .stdout(predicate::str::contains("undistort"));
}

#[test]
fn unknown_subcommand_is_rejected() {
    cmd()
        .arg("frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized"));
}

#[test]
fn undistort_with_missing_calibration_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    cmd()
        .current_dir(dir.path())
        .args(["undistort", "--calibration", "does-not-exist.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn calibrate_rejects_non_numeric_frame_count() {
    cmd()
        .args(["calibrate", "--frames", "many"])
        .assert()
        .failure();
}
