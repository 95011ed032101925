use assert_cmd::Command;
use std::time::Duration;

#[test]
fn test_binary_help() {
    let bin_path = env!("CARGO_BIN_EXE_remora");
    let mut cmd = Command::new(bin_path);
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("remora"));
}

#[test]
fn test_missing_upstream_cmd_is_an_error() {
    let bin_path = env!("CARGO_BIN_EXE_remora");
    let mut cmd = Command::new(bin_path);
    cmd.assert().failure();
}

#[test]
fn test_parse_error_reply_over_real_stdio() {
    // Malformed input must be answered on stdout without dialing the
    // upstream, and the proxy must exit cleanly when stdin closes.
    let bin_path = env!("CARGO_BIN_EXE_remora");
    let mut cmd = Command::new(bin_path);
    cmd.arg("--upstream-cmd")
        .arg("cat")
        .write_stdin("{ not json\n")
        .timeout(Duration::from_secs(5))
        .assert()
        .success()
        .stdout(predicates::str::contains("-32700"));
}
