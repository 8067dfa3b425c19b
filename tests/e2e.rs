use std::process::Command;

const HEADER: &str = "user,balance,frozen,pending,available,status";

fn run(fixture: &str) -> (String, String, bool) {
    let path = format!("tests/fixtures/{fixture}");
    let output = Command::new(env!("CARGO_BIN_EXE_invest-ledger"))
        .arg(&path)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn full_investment_cycle() {
    let (stdout, stderr, success) = run("valid.csv");

    assert!(success);
    assert!(stderr.is_empty(), "unexpected stderr: {stderr}");

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], HEADER);
    // 5000 - 100 fee - 2000 invested + 800 profit - 400 auto-reinvested
    assert_eq!(lines[1], "1,3300.0000,0.0000,0.0000,3300.0000,active");
    assert_eq!(lines[2], "2,2400.0000,0.0000,0.0000,2400.0000,active");
}

#[test]
fn errors_warn_but_do_not_block() {
    let (stdout, stderr, success) = run("with_errors.csv");

    assert!(success);
    assert!(stderr.contains("unrecognized command type"));
    assert!(stderr.contains("missing amount"));

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], HEADER);
    assert_eq!(lines[1], "1,75.0000,0.0000,0.0000,75.0000,active");
}

#[test]
fn missing_input_fails() {
    let (_, stderr, success) = run("does_not_exist.csv");

    assert!(!success);
    assert!(stderr.contains("cannot open"));
}
