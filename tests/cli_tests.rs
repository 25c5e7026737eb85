use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::str;

/// Fresh working directory so no stray `.env` or terminal list is picked up
fn workdir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("terminal-harness-{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir).expect("Failed to create work dir");
    dir
}

fn harness(dir: &PathBuf, args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_terminal-harness"));
    cmd.current_dir(dir)
        .args(args)
        .env_remove("TOKEN")
        .env_remove("TERMINALS_FILE")
        .env_remove("ENDPOINT_URL")
        .env_remove("LOG_LEVEL")
        .env_remove("RUST_LOG");
    cmd
}

fn combined(output: &Output) -> String {
    format!(
        "{}{}",
        str::from_utf8(&output.stdout).unwrap_or(""),
        str::from_utf8(&output.stderr).unwrap_or("")
    )
}

#[test]
fn test_missing_token_exits_with_config_error() {
    let dir = workdir();
    let output = harness(&dir, &[])
        .output()
        .expect("Failed to execute terminal-harness");

    let text = combined(&output);
    assert_eq!(output.status.code(), Some(1), "output: {}", text);
    assert!(text.contains("Configuration error"), "output: {}", text);
    assert!(text.contains("TOKEN"), "output: {}", text);
}

#[test]
fn test_missing_terminal_list_exits_with_config_error() {
    let dir = workdir();
    let output = harness(&dir, &["-f", "nowhere.csv"])
        .env("TOKEN", "secret123")
        .output()
        .expect("Failed to execute terminal-harness");

    let text = combined(&output);
    assert_eq!(output.status.code(), Some(1), "output: {}", text);
    assert!(text.contains("nowhere.csv"), "output: {}", text);
    assert!(!text.contains("secret123"), "token leaked: {}", text);
}

#[test]
fn test_token_from_dotenv_file() {
    let dir = workdir();
    fs::write(dir.join(".env"), "TOKEN=fromdotenv\n").unwrap();
    fs::write(dir.join("terminals.csv"), "mid,tid\n").unwrap();

    let output = harness(&dir, &["-f", "terminals.csv"])
        .output()
        .expect("Failed to execute terminal-harness");

    // Token accepted; the empty list is what gets rejected
    let text = combined(&output);
    assert_eq!(output.status.code(), Some(1), "output: {}", text);
    assert!(!text.contains("TOKEN not found"), "output: {}", text);
    assert!(!text.contains("fromdotenv"), "token leaked: {}", text);
}

#[test]
fn test_help_exits_cleanly() {
    let dir = workdir();
    let output = harness(&dir, &["--help"])
        .output()
        .expect("Failed to execute terminal-harness");

    let text = combined(&output);
    assert!(output.status.success(), "output: {}", text);
    assert!(text.contains("--terminals"));
    assert!(text.contains("--token"));
}
