//! Shell Executor (C7): spawns a subprocess with streamed stdout/stderr, an optional
//! cwd/environment overlay, a timeout, and cooperative cancellation.
//!
//! Grounded on the teacher's scan-command execution (`commands/build/mod.rs`):
//! `tokio::process::Command` with piped stdout/stderr, one `tokio::spawn` task per
//! stream reading `AsyncBufReadExt::lines()`, and `child.wait()` awaited alongside.
//! The echo-sink split (`NONE`/`SINGLE_LINE`/`LINE`) is the `spec.md` §9 redesign of the
//! original's interleaved stdout/stderr-with-terminal-overwrite: a trait instead of an
//! in-place `print` call, so tests substitute a capturing sink.

use crate::errors::{AutoForgeError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::timeout as tokio_timeout;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

/// Grace period between a cooperative terminate (SIGTERM) and a forced kill (SIGKILL)
/// for a process group that doesn't exit on its own. See `spec.md` §4.7/§8.
pub const TERMINATE_GRACE: Duration = Duration::from_millis(500);

/// How a shell invocation's output is rendered while it runs. See `spec.md` §4.7 and
/// GLOSSARY "Echo Policy".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoPolicy {
    None,
    SingleLine,
    Line,
}

/// Renders streamed output according to an [`EchoPolicy`]. Implementations substitute
/// for production terminal rendering in tests.
pub trait EchoSink: Send + Sync {
    fn on_line(&self, line: &str, is_stderr: bool);
    fn on_exit(&self, return_code: i32);
}

/// Discards everything. `EchoPolicy::None`.
pub struct NoneSink;
impl EchoSink for NoneSink {
    fn on_line(&self, _line: &str, _is_stderr: bool) {}
    fn on_exit(&self, _return_code: i32) {}
}

/// Streams each line, prefixed with an optional leading string. `EchoPolicy::Line`.
pub struct LineSink {
    pub leading_text: Option<String>,
}
impl EchoSink for LineSink {
    fn on_line(&self, line: &str, is_stderr: bool) {
        let prefix = self.leading_text.as_deref().unwrap_or("");
        if is_stderr {
            eprintln!("{prefix}{line}");
        } else {
            println!("{prefix}{line}");
        }
    }
    fn on_exit(&self, _return_code: i32) {}
}

/// Overwrites a single status line with the most recent output. `EchoPolicy::SingleLine`.
pub struct SingleLineSink;
impl EchoSink for SingleLineSink {
    fn on_line(&self, line: &str, _is_stderr: bool) {
        print!("\r\x1b[2K{line}");
        let _ = std::io::Write::flush(&mut std::io::stdout());
    }
    fn on_exit(&self, _return_code: i32) {
        println!();
    }
}

/// Captures every line instead of rendering anything. Used by tests and by callers
/// that need the transcript even when an [`EchoPolicy`] is also rendering it live.
#[derive(Default)]
pub struct CapturingSink {
    pub lines: Mutex<Vec<(bool, String)>>,
}
impl EchoSink for CapturingSink {
    fn on_line(&self, line: &str, is_stderr: bool) {
        self.lines.lock().unwrap().push((is_stderr, line.to_string()));
    }
    fn on_exit(&self, _return_code: i32) {}
}

/// Either a pre-tokenized argument vector or a single string requiring shell
/// interpretation (`spec.md` §4.7 "command_and_args").
#[derive(Debug, Clone)]
pub enum CommandLine {
    Tokens(Vec<String>),
    Shell(String),
}

/// Parameters for a single [`execute`] call.
pub struct ExecRequest<'a> {
    pub command: CommandLine,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
    pub sink: &'a dyn EchoSink,
}

impl<'a> ExecRequest<'a> {
    pub fn new(command: CommandLine, sink: &'a dyn EchoSink) -> Self {
        Self {
            command,
            cwd: None,
            env: HashMap::new(),
            timeout: None,
            cancellation: None,
            sink,
        }
    }
}

/// Outcome of a shell invocation. `spec.md` §4.7 "Returns `Result { ... }`".
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub return_code: i32,
    pub stdout_captured: String,
    pub stderr_captured: String,
    pub duration_ms: u64,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.return_code == 0
    }
}

/// Spawn and drive `req` to completion (or cancellation/timeout). Re-entrant: callers
/// may invoke this concurrently from multiple tasks, each owning its own process group.
#[instrument(skip(req), fields(cwd = ?req.cwd))]
pub async fn execute(req: ExecRequest<'_>) -> Result<ExecResult> {
    let started = Instant::now();

    let mut cmd = match &req.command {
        CommandLine::Tokens(tokens) => {
            if tokens.is_empty() {
                return Err(AutoForgeError::ToolMissing {
                    tool: "<empty command>".to_string(),
                });
            }
            let mut cmd = tokio::process::Command::new(&tokens[0]);
            cmd.args(&tokens[1..]);
            cmd
        }
        CommandLine::Shell(text) => {
            let mut cmd = tokio::process::Command::new("/bin/sh");
            cmd.arg("-c").arg(text);
            cmd
        }
    };

    if let Some(cwd) = &req.cwd {
        cmd.current_dir(cwd);
    }
    for (k, v) in &req.env {
        cmd.env(k, v);
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    #[cfg(unix)]
    {
        // New process group (pgid == the child's own pid) so cancellation/timeout can
        // signal every descendant via `kill -<sig> -<pgid>` without also killing the
        // caller. `process_group` is the safe std-backed API; this workspace forbids
        // `unsafe_code`, so termination below shells out to `kill` rather than calling
        // `libc::killpg` directly.
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().map_err(|source| AutoForgeError::Io {
        path: PathBuf::from(match &req.command {
            CommandLine::Tokens(t) => t[0].clone(),
            CommandLine::Shell(_) => "/bin/sh".to_string(),
        }),
        source,
    })?;

    let pid = child.id();
    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    let stdout_sink_lines = std::sync::Arc::new(Mutex::new(Vec::new()));
    let stderr_sink_lines = std::sync::Arc::new(Mutex::new(Vec::new()));

    let wait_future = async {
        let stdout_lines = stdout_sink_lines.clone();
        let stderr_lines = stderr_sink_lines.clone();

        // `req.sink` is borrowed for the duration of this future only, so line
        // rendering happens inline rather than inside spawned tasks (it is not
        // `'static`); reading into buffers is still split across the two streams to
        // preserve per-stream ordering from the child, as required by `spec.md` §5.
        let mut out_reader = BufReader::new(stdout).lines();
        let mut err_reader = BufReader::new(stderr).lines();

        let mut out_done = false;
        let mut err_done = false;
        loop {
            if out_done && err_done {
                break;
            }
            tokio::select! {
                line = out_reader.next_line(), if !out_done => {
                    match line {
                        Ok(Some(l)) => {
                            req.sink.on_line(&l, false);
                            stdout_lines.lock().unwrap().push(l);
                        }
                        Ok(None) => out_done = true,
                        Err(_) => out_done = true,
                    }
                }
                line = err_reader.next_line(), if !err_done => {
                    match line {
                        Ok(Some(l)) => {
                            req.sink.on_line(&l, true);
                            stderr_lines.lock().unwrap().push(l);
                        }
                        Ok(None) => err_done = true,
                        Err(_) => err_done = true,
                    }
                }
            }
        }

        child.wait().await
    };

    let cancel_token = req.cancellation.clone().unwrap_or_default();

    let status = tokio::select! {
        biased;
        _ = cancel_token.cancelled() => {
            terminate_process_group(pid);
            return Err(AutoForgeError::Cancelled);
        }
        result = async {
            if let Some(d) = req.timeout {
                tokio_timeout(d, wait_future).await
            } else {
                Ok(wait_future.await)
            }
        } => {
            match result {
                Ok(status) => status.map_err(|source| AutoForgeError::Io {
                    path: PathBuf::new(),
                    source,
                })?,
                Err(_elapsed) => {
                    terminate_process_group(pid);
                    return Err(AutoForgeError::TimedOut(req.timeout.unwrap()));
                }
            }
        }
    };

    let return_code = status.code().unwrap_or(-1);
    let stdout_captured = stdout_sink_lines.lock().unwrap().join("\n");
    let stderr_captured = stderr_sink_lines.lock().unwrap().join("\n");
    req.sink.on_exit(return_code);

    Ok(ExecResult {
        return_code,
        stdout_captured,
        stderr_captured,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

/// Best-effort cooperative terminate followed by a forced kill after
/// [`TERMINATE_GRACE`]. Runs synchronously (a blocking sleep) because it only fires on
/// the cancellation/timeout path, never in the common case. Shells out to the `kill`
/// utility rather than calling `libc::killpg` directly — this workspace forbids
/// `unsafe_code`, and the process group (equal to the child's pid, see `process_group`
/// above) is targeted with the conventional `-<pgid>` negative-pid argument.
fn terminate_process_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    #[cfg(unix)]
    {
        let group = format!("-{pid}");
        let _ = std::process::Command::new("kill")
            .args(["-TERM", &group])
            .status();
        std::thread::sleep(TERMINATE_GRACE);
        let still_alive = std::process::Command::new("kill")
            .args(["-0", &group])
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if still_alive {
            let _ = std::process::Command::new("kill")
                .args(["-KILL", &group])
                .status();
        }
    }
    #[cfg(not(unix))]
    {
        warn!("process-group termination is unix-only; pid {pid} may outlive cancellation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_in_order() {
        let sink = CapturingSink::default();
        let req = ExecRequest::new(
            CommandLine::Shell("echo one; echo two; echo three".to_string()),
            &sink,
        );
        let result = execute(req).await.unwrap();
        assert_eq!(result.return_code, 0);
        assert_eq!(result.stdout_captured, "one\ntwo\nthree");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let sink = NoneSink;
        let req = ExecRequest::new(CommandLine::Shell("exit 7".to_string()), &sink);
        let result = execute(req).await.unwrap();
        assert_eq!(result.return_code, 7);
    }

    #[tokio::test]
    async fn timeout_is_enforced() {
        let sink = NoneSink;
        let mut req = ExecRequest::new(CommandLine::Shell("sleep 5".to_string()), &sink);
        req.timeout = Some(Duration::from_millis(100));
        let result = execute(req).await;
        assert!(matches!(result, Err(AutoForgeError::TimedOut(_))));
    }

    #[tokio::test]
    async fn cancellation_stops_the_child() {
        let sink: &'static NoneSink = Box::leak(Box::new(NoneSink));
        let token = CancellationToken::new();
        let mut req = ExecRequest::new(CommandLine::Shell("sleep 5".to_string()), sink);
        req.cancellation = Some(token.clone());

        let handle = tokio::spawn(execute(req));
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(AutoForgeError::Cancelled)));
    }

    #[tokio::test]
    async fn cwd_is_honored() {
        let sink = CapturingSink::default();
        let dir = tempfile::tempdir().unwrap();
        let mut req = ExecRequest::new(CommandLine::Shell("pwd".to_string()), &sink);
        req.cwd = Some(dir.path().to_path_buf());
        let result = execute(req).await.unwrap();
        assert_eq!(
            std::fs::canonicalize(result.stdout_captured.trim()).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
    }
}
