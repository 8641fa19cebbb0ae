//! Claude Code process executor
//!
//! Runs one `claude` process per request, captures its output, and races
//! the process against a deadline. Every path produces an
//! `ExecutionOutcome`; nothing here returns an error.

use std::process::ExitStatus;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cli::build_command;
use super::environment::{is_wsl, locate_executable};
use super::request::{ExecutionOutcome, ExecutionRequest};
use crate::config::ClaudeSettings;
use crate::log::TraceLog;

/// Executes Claude Code CLI requests with the process-wide settings.
///
/// Cheap to clone; concurrent executions share nothing but the settings.
#[derive(Debug, Clone)]
pub struct ClaudeExecutor {
    settings: Arc<ClaudeSettings>,
}

impl ClaudeExecutor {
    /// Create an executor with the given settings
    #[must_use]
    pub fn new(settings: ClaudeSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    /// The settings this executor launches with.
    #[must_use]
    pub fn settings(&self) -> &ClaudeSettings {
        &self.settings
    }

    /// Run a request to completion, timeout, or spawn failure.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        let settings = &self.settings;
        let trace = Arc::new(TraceLog::create(
            &settings.resolved_trace_dir(),
            &request.log_label,
        ));

        info!(
            kind = request.kind(),
            label = %request.log_label,
            tools = %request.allowed_tools.join(", "),
            "Executing Claude CLI"
        );

        trace.line(&format!("WSL: {}", is_wsl()));
        trace.line(&format!(
            "User directory: {}",
            settings.resolved_working_dir().display()
        ));
        trace.line(&format!("Claude path: {}", settings.executable.display()));
        trace.line(&format!("Allowed tools: {}", request.allowed_tools.join(", ")));
        trace.line(&format!("Timeout: {}ms", request.timeout.as_millis()));

        let outcome = self.run(&request, &trace).await;

        match &outcome {
            ExecutionOutcome::Success { empty_output, .. } => {
                trace.line("Command completed successfully");
                if *empty_output {
                    trace.line("Warning: Command produced no output");
                    info!(label = %request.log_label, "Command succeeded but produced no output");
                }
            }
            failure => {
                let message = failure.error_message().unwrap_or_default();
                trace.line(&format!("Command failed: {message}"));
                warn!(label = %request.log_label, "Command failed: {message}");
            }
        }

        outcome
    }

    async fn run(&self, request: &ExecutionRequest, trace: &Arc<TraceLog>) -> ExecutionOutcome {
        let settings = &self.settings;

        if let Err(message) = locate_executable(settings) {
            trace.line(&format!("Process error: {message}"));
            return ExecutionOutcome::SpawnError { message };
        }

        let mut cmd = build_command(request, settings);
        if let Some(line) = cmd.as_std().get_args().nth(1) {
            trace.line(&format!("Command: {}", line.to_string_lossy()));
        }

        let start = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                trace.line(&format!("Process error: {e}"));
                return ExecutionOutcome::SpawnError {
                    message: e.to_string(),
                };
            }
        };
        debug!(pid = ?child.id(), "Spawned Claude CLI");

        // The pid is gone once the child is reaped; the group id is not
        let group = child.id();
        let stdout = child
            .stdout
            .take()
            .map(|out| Capture::spawn(out, "STDOUT", Arc::clone(trace)));
        let stderr = child
            .stderr
            .take()
            .map(|err| Capture::spawn(err, "STDERR", Arc::clone(trace)));

        tokio::select! {
            status = child.wait() => {
                let grace = settings.grace_period();
                let (stdout, stderr) = tokio::join!(
                    Capture::finish(stdout, grace),
                    Capture::finish(stderr, grace)
                );
                if !(stdout.complete && stderr.complete) && group_has_members(group) {
                    warn!("Output pipe still open after process exit, killing leftover processes");
                    trace.line("Output pipe still open after process exit");
                    signal_group(&mut child, group, Termination::Forced);
                }
                match status {
                    Ok(status) => exited(status, stdout.text, stderr.text, trace),
                    Err(e) => ExecutionOutcome::ProcessFailure {
                        stdout: stdout.text,
                        stderr: stderr.text,
                        exit_code: None,
                        message: format!("Failed waiting for process: {e}"),
                    },
                }
            }
            () = tokio::time::sleep(request.timeout) => {
                let elapsed = start.elapsed();
                warn!(
                    timeout_ms = request.timeout.as_millis(),
                    "Command execution timed out"
                );
                trace.line(&format!(
                    "Command execution timed out after {}ms",
                    request.timeout.as_millis()
                ));
                terminate(&mut child, group, settings.grace_period(), trace).await;
                for capture in [stdout, stderr].into_iter().flatten() {
                    capture.task.abort();
                }
                ExecutionOutcome::TimedOut { elapsed }
            }
        }
    }
}

/// Map a natural exit to an outcome.
fn exited(status: ExitStatus, stdout: String, stderr: String, trace: &TraceLog) -> ExecutionOutcome {
    match status.code() {
        Some(0) => {
            trace.line("Process exited with code 0");
            let empty_output = stdout.trim().is_empty();
            ExecutionOutcome::Success {
                stdout,
                exit_code: 0,
                empty_output,
            }
        }
        Some(code) => {
            trace.line(&format!("Process exited with code {code}"));
            ExecutionOutcome::ProcessFailure {
                stdout,
                stderr,
                exit_code: Some(code),
                message: format!("Process exited with code {code}"),
            }
        }
        None => {
            let message = signal_message(status);
            trace.line(&message);
            ExecutionOutcome::ProcessFailure {
                stdout,
                stderr,
                exit_code: None,
                message,
            }
        }
    }
}

#[cfg(unix)]
fn signal_message(status: ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map_or_else(
        || "Process terminated without exit code".to_string(),
        |sig| format!("Process terminated by signal {sig}"),
    )
}

#[cfg(not(unix))]
fn signal_message(_status: ExitStatus) -> String {
    "Process terminated without exit code".to_string()
}

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// One output stream being read into a buffer that outlives its reader task.
struct Capture {
    buffer: SharedBuffer,
    task: JoinHandle<()>,
}

/// What was read from a stream, and whether it reached EOF.
struct Captured {
    text: String,
    complete: bool,
}

impl Capture {
    fn spawn<R>(reader: R, stream: &'static str, trace: Arc<TraceLog>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = SharedBuffer::default();
        let task = tokio::spawn(read_chunks(reader, stream, trace, Arc::clone(&buffer)));
        Self { buffer, task }
    }

    /// Wait up to `grace` for EOF. Bytes read before giving up are kept.
    async fn finish(capture: Option<Self>, grace: Duration) -> Captured {
        let Some(Self { buffer, mut task }) = capture else {
            return Captured {
                text: String::new(),
                complete: true,
            };
        };
        let complete = tokio::time::timeout(grace, &mut task).await.is_ok();
        if !complete {
            task.abort();
        }
        let bytes = buffer.lock().unwrap_or_else(PoisonError::into_inner);
        Captured {
            text: String::from_utf8_lossy(&bytes).into_owned(),
            complete,
        }
    }
}

/// Read a stream to EOF, tracing each chunk as it arrives.
async fn read_chunks<R>(mut reader: R, stream: &'static str, trace: Arc<TraceLog>, buffer: SharedBuffer)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = &buf[..n];
                trace.chunk(stream, chunk);
                debug!(stream, "{}", String::from_utf8_lossy(chunk).trim_end());
                buffer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(chunk);
            }
            Err(e) => {
                warn!(stream, "Failed reading process output: {e}");
                break;
            }
        }
    }
}

/// Terminate a timed-out child: SIGTERM to its process group, then SIGKILL
/// if anything in the group outlives `grace`. The child is always reaped.
async fn terminate(child: &mut Child, group: Option<u32>, grace: Duration, trace: &TraceLog) {
    trace.line("Attempting to terminate process...");
    signal_group(child, group, Termination::Graceful);

    let leader_survived = tokio::time::timeout(grace, child.wait()).await.is_err();
    // Never signal an emptied group: its id may already belong to another process
    if leader_survived || group_has_members(group) {
        warn!("Process group survived SIGTERM, forcing termination with SIGKILL");
        trace.line("Forcing process termination with SIGKILL...");
        signal_group(child, group, Termination::Forced);
    }
    if let Err(e) = child.kill().await {
        debug!("kill after termination: {e}");
    }
}

#[derive(Debug, Clone, Copy)]
enum Termination {
    Graceful,
    Forced,
}

#[cfg(unix)]
fn signal_group(_child: &mut Child, group: Option<u32>, how: Termination) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = group.and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    let signal = match how {
        Termination::Graceful => Signal::SIGTERM,
        Termination::Forced => Signal::SIGKILL,
    };
    if let Err(e) = killpg(Pid::from_raw(pgid), signal) {
        debug!(pgid, ?signal, "killpg failed: {e}");
    }
}

#[cfg(unix)]
fn group_has_members(group: Option<u32>) -> bool {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    group
        .and_then(|id| i32::try_from(id).ok())
        .is_some_and(|pgid| killpg(Pid::from_raw(pgid), None).is_ok())
}

#[cfg(not(unix))]
const fn group_has_members(_group: Option<u32>) -> bool {
    false
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _group: Option<u32>, _how: Termination) {
    if let Err(e) = child.start_kill() {
        debug!("start_kill failed: {e}");
    }
}
