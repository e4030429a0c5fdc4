//! End-to-end runs of the `novelsaga-client` binary.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

const MISSING_SERVER: &str = "novelsaga-server-that-does-not-exist";

fn run_client(args: &[&Path], stdin: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_novelsaga-client"))
        .args(args)
        .env("RUST_LOG", "off")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let config = dir.join("client.toml");
    fs::write(
        &config,
        format!("[server]\ncommand = \"{MISSING_SERVER}\"\nstop_timeout_secs = 1\n"),
    )
    .unwrap();
    config
}

#[test]
fn start_failures_are_reported_and_exit_is_clean() {
    let dir = tempfile::tempdir().unwrap();
    let book = dir.path().join("book");
    let notes = dir.path().join("notes");
    fs::create_dir(&book).unwrap();
    fs::create_dir(&notes).unwrap();
    let config = write_config(dir.path());

    let added = serde_json::json!({
        "event": "folders",
        "added": [{ "path": notes }],
        "removed": [],
    });
    let stdin = format!("{added}\nthis line is not json\n{{\"event\":\"shutdown\"}}\n");
    let output = run_client(&[Path::new("--config"), &config, &book], &stdin);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "{stderr}");
    assert!(
        stderr.contains("Failed to start NovelSaga server for book"),
        "{stderr}"
    );
    assert!(
        stderr.contains("Failed to start NovelSaga server for notes"),
        "{stderr}"
    );
    assert!(stderr.contains(MISSING_SERVER), "{stderr}");
}

#[test]
fn stdin_eof_shuts_down() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let output = run_client(&[Path::new("--config"), &config, dir.path()], "");

    assert!(output.status.success());
}

#[test]
fn unreadable_config_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("client.toml");
    fs::write(&config, "[server\n").unwrap();

    let output = run_client(&[Path::new("--config"), &config, dir.path()], "");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success());
    assert!(stderr.contains("failed to parse config"), "{stderr}");
}
