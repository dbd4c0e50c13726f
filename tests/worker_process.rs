//! Runs the real binary. Needs the mock engine:
//! `cargo test --no-default-features --features mock`.
#![cfg(feature = "mock")]

mod common;

use std::io::{ErrorKind, Write};
use std::path::Path;
use std::process::{Command, Output, Stdio};

use common::Fixture;

fn run_binary(model: &Path, cache: &Path, input: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_llama_worker"))
        .env("MODEL_PATH", model)
        .env("LLAMA_WORKER_CACHE_DIR", cache)
        .env_remove("LLAMA_WORKER_CONFIG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    // Dropping stdin after the write closes it. A worker that failed startup
    // may already be gone.
    let mut stdin = child.stdin.take().unwrap();
    if let Err(e) = stdin.write_all(input.as_bytes()) {
        assert_eq!(e.kind(), ErrorKind::BrokenPipe);
    }
    drop(stdin);
    child.wait_with_output().unwrap()
}

fn sentinel_lines(output: &Output) -> usize {
    String::from_utf8_lossy(&output.stderr)
        .lines()
        .filter(|line| *line == "MODEL_READY")
        .count()
}

#[test]
fn test_closed_stdin_exits_zero_after_ready() {
    let fixture = Fixture::new();
    let output = run_binary(&fixture.model, &fixture.cache_dir(), "");

    assert!(output.status.success(), "{output:?}");
    assert_eq!(sentinel_lines(&output), 1);
    assert!(output.stdout.is_empty());
}

#[test]
fn test_serves_request_then_exits() {
    let fixture = Fixture::new();
    let output = run_binary(
        &fixture.model,
        &fixture.cache_dir(),
        "{\"prompt\": \"Hello\"}\nnot json\n",
    );

    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("{\"text\":\"Hello, "));
    assert!(lines[1].starts_with("{\"error\":"));
}

#[test]
fn test_startup_failure_exits_nonzero_without_ready() {
    let fixture = Fixture::new();
    let missing = fixture.dir.path().join("missing.gguf");
    let output = run_binary(&missing, &fixture.cache_dir(), "{\"prompt\": \"Hello\"}\n");

    assert!(!output.status.success());
    assert_eq!(sentinel_lines(&output), 0);
    assert!(output.stdout.is_empty());
}
