#![allow(missing_docs)]
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::TempDir;

use claude_mcp::config::ClaudeSettings;
use claude_mcp::{ClaudeExecutor, ExecutionOutcome, ExecutionRequest};

/// Stand-in for `claude`: prompts arrive on stdin, `--continue` prompts as $3.
const ECHO_STUB: &str = r#"if [ "$1" = "--continue" ]; then printf '%s' "$3"; else cat; fi"#;

fn stub(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("claude");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn executor(dir: &TempDir, body: &str) -> ClaudeExecutor {
    ClaudeExecutor::new(ClaudeSettings {
        executable: stub(dir.path(), body),
        working_dir: Some(dir.path().to_path_buf()),
        trace_dir: Some(dir.path().join("traces")),
        grace_period_ms: 300,
        ..ClaudeSettings::default()
    })
}

fn stdout_of(outcome: ExecutionOutcome) -> String {
    match outcome {
        ExecutionOutcome::Success { stdout, .. } => stdout,
        other => panic!("expected success, got {other:?}"),
    }
}

/// Shell metacharacters in a prompt reach the CLI byte-for-byte.
#[tokio::test]
async fn test_prompt_with_shell_specials_round_trips() {
    let dir = TempDir::new().unwrap();
    let exec = executor(&dir, ECHO_STUB);
    let prompt = "Fix `main` in \"src/a.rs\"; don't run $(rm -rf ~) or $HOME\n\ttabs & 'quotes' \\ done";

    let outcome = exec
        .execute(ExecutionRequest::prompt(prompt, vec!["Read".into()], Duration::from_secs(10)))
        .await;

    assert_eq!(stdout_of(outcome), prompt);
    assert!(!dir.path().join("~").exists());
}

#[tokio::test]
async fn test_continue_prompt_round_trips() {
    let dir = TempDir::new().unwrap();
    let exec = executor(&dir, ECHO_STUB);
    let prompt = "Summarize \"what\" you `changed` $(date)";
    let raw = claude_mcp::claude::cli::continue_command(prompt);

    let outcome = exec
        .execute(ExecutionRequest::raw(raw, vec![], Duration::from_secs(10)))
        .await;

    assert_eq!(stdout_of(outcome), prompt);
}

#[tokio::test]
async fn test_unicode_prompt_round_trips() {
    let dir = TempDir::new().unwrap();
    let exec = executor(&dir, ECHO_STUB);
    let prompt = "Explique la fonction « résumé » 🚀";

    let outcome = exec
        .execute(ExecutionRequest::prompt(prompt, vec![], Duration::from_secs(10)))
        .await;

    assert_eq!(stdout_of(outcome), prompt);
}

/// Concurrent executions never see each other's prompts.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_executions_are_isolated() {
    let dir = TempDir::new().unwrap();
    let exec = executor(&dir, ECHO_STUB);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let exec = exec.clone();
            tokio::spawn(async move {
                let sentinel = format!("sentinel-{i}");
                let outcome = exec
                    .execute(
                        ExecutionRequest::prompt(sentinel.clone(), vec![], Duration::from_secs(20))
                            .with_label(format!("concurrent-{i}")),
                    )
                    .await;
                (sentinel, outcome)
            })
        })
        .collect();

    for handle in handles {
        let (sentinel, outcome) = handle.await.unwrap();
        assert_eq!(stdout_of(outcome), sentinel);
    }
}

#[tokio::test]
async fn test_timeout_bounded_by_grace_period() {
    let dir = TempDir::new().unwrap();
    let exec = executor(&dir, "trap '' TERM; sleep 30");

    let started = Instant::now();
    let outcome = exec
        .execute(ExecutionRequest::raw("", vec![], Duration::from_millis(200)))
        .await;

    assert!(matches!(outcome, ExecutionOutcome::TimedOut { .. }), "{outcome:?}");
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_trace_file_written_per_execution() {
    let dir = TempDir::new().unwrap();
    let exec = executor(&dir, ECHO_STUB);

    exec.execute(ExecutionRequest::prompt("one", vec![], Duration::from_secs(10)).with_label("first"))
        .await;
    exec.execute(ExecutionRequest::prompt("two", vec![], Duration::from_secs(10)).with_label("second"))
        .await;

    let traces: Vec<_> = std::fs::read_dir(dir.path().join("traces"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(traces.len(), 2, "{traces:?}");
    assert!(traces.iter().any(|t| t.starts_with("first-")));
    assert!(traces.iter().any(|t| t.starts_with("second-")));
}

/// Whether `pid` is still a live process. Zombies reparented to an init that
/// has not reaped them yet count as gone.
fn is_running(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if kill(Pid::from_raw(pid), None).is_err() {
        return false;
    }
    std::fs::read_to_string(format!("/proc/{pid}/stat")).map_or(true, |stat| {
        !stat
            .rsplit(')')
            .next()
            .is_some_and(|rest| rest.trim_start().starts_with('Z'))
    })
}

async fn assert_gone(pid: i32) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while is_running(pid) {
        assert!(Instant::now() < deadline, "process {pid} still running");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn read_pid(dir: &Path, name: &str) -> i32 {
    std::fs::read_to_string(dir.join(name))
        .unwrap()
        .trim()
        .parse()
        .unwrap()
}

#[tokio::test]
async fn test_timeout_leaves_no_process_in_group() {
    let dir = TempDir::new().unwrap();
    let exec = executor(
        &dir,
        "echo $$ > leader.pid\nsleep 30 &\necho $! > background.pid\ntrap '' TERM\nwhile true; do sleep 0.05; done",
    );

    let outcome = exec
        .execute(ExecutionRequest::raw("", vec![], Duration::from_millis(500)))
        .await;

    assert!(matches!(outcome, ExecutionOutcome::TimedOut { .. }), "{outcome:?}");
    assert_gone(read_pid(dir.path(), "leader.pid")).await;
    assert_gone(read_pid(dir.path(), "background.pid")).await;
}

#[tokio::test]
async fn test_background_process_holding_output_is_swept() {
    let dir = TempDir::new().unwrap();
    let exec = executor(
        &dir,
        "printf 'the answer'\nsleep 30 &\necho $! > background.pid\nexit 0",
    );

    let outcome = exec
        .execute(ExecutionRequest::raw("", vec![], Duration::from_secs(10)))
        .await;

    assert_eq!(stdout_of(outcome), "the answer");
    assert_gone(read_pid(dir.path(), "background.pid")).await;
}
