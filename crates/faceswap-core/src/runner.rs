//! Subprocess execution with a bounded timeout.
//!
//! The child runs in its own process group so a timeout can take down
//! everything the tool spawned (interpreter workers, GPU helpers) rather
//! than only the direct child.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// How long to keep draining pipes after a timeout kill.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A fully specified external invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
}

impl CommandSpec {
    /// Shell-like rendering for logs. Not meant to be re-parsed.
    pub fn display_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("\"{part}\"")
                } else {
                    part.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a process that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }

    /// Whether the process printed anything at all.
    pub fn has_output(&self) -> bool {
        !self.stdout.is_empty() || !self.stderr.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("command timed out after {} ms", .timeout.as_millis())]
    TimedOut {
        timeout: Duration,
        stdout: String,
        stderr: String,
    },
    #[error("failed waiting for child: {0}")]
    Wait(#[source] io::Error),
}

/// Seam between orchestration and process execution.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        spec: &CommandSpec,
    ) -> impl Future<Output = Result<CommandOutput, RunError>> + Send;
}

/// Runs commands with `tokio::process`, killing the process group on timeout.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioCommandRunner;

impl CommandRunner for TokioCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunError> {
        let start = Instant::now();

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| RunError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        // The group id outlives the reaped child; `child.id()` does not.
        let pid = child.id();
        let mut stdout = PipeReader::spawn(child.stdout.take());
        let mut stderr = PipeReader::spawn(child.stderr.take());

        // A descendant that inherited the pipes keeps them open after the
        // child exits, so the drain shares the deadline with the wait.
        let completed = tokio::time::timeout(spec.timeout, async {
            let status = child.wait().await?;
            stdout.finish().await;
            stderr.finish().await;
            Ok::<_, io::Error>(status)
        })
        .await;

        match completed {
            Ok(Ok(status)) => Ok(CommandOutput {
                status_code: status.code(),
                stdout: stdout.into_text(),
                stderr: stderr.into_text(),
                duration: start.elapsed(),
            }),
            Ok(Err(err)) => {
                terminate(pid, &mut child).await;
                Err(RunError::Wait(err))
            }
            Err(_) => {
                tracing::warn!(
                    program = %spec.program,
                    timeout_ms = spec.timeout.as_millis() as u64,
                    "command exceeded timeout; killing process group"
                );
                terminate(pid, &mut child).await;
                Err(RunError::TimedOut {
                    timeout: spec.timeout,
                    stdout: stdout.drain().await,
                    stderr: stderr.drain().await,
                })
            }
        }
    }
}

/// Background reader for one child pipe.
struct PipeReader {
    task: Option<JoinHandle<String>>,
    text: String,
}

impl PipeReader {
    fn spawn<R>(stream: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self {
            task: stream.map(|s| tokio::spawn(read_stream(s))),
            text: String::new(),
        }
    }

    /// Wait for EOF. Cancel-safe: an interrupted call leaves the task running.
    async fn finish(&mut self) {
        if let Some(task) = self.task.as_mut() {
            self.text = task.await.unwrap_or_default();
            self.task = None;
        }
    }

    /// Collect what is left after a kill, giving up after `DRAIN_TIMEOUT`.
    async fn drain(mut self) -> String {
        if tokio::time::timeout(DRAIN_TIMEOUT, self.finish()).await.is_err() {
            if let Some(task) = self.task.take() {
                task.abort();
            }
        }
        self.text
    }

    fn into_text(self) -> String {
        self.text
    }
}

async fn read_stream<R: AsyncRead + Unpin>(mut stream: R) -> String {
    let mut buf = Vec::new();
    if let Err(err) = stream.read_to_end(&mut buf).await {
        tracing::debug!(error = %err, "child pipe read ended with error");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Kill the child's whole process group, then the child itself, and reap it.
async fn terminate(pid: Option<u32>, child: &mut Child) {
    if let Some(pid) = pid {
        kill_process_group(pid);
    }

    // Already reaped when only the pipe drain overran.
    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }
    if let Err(err) = child.kill().await {
        tracing::debug!(error = %err, "child kill failed");
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    // process_group(0) made the child the leader of a group with its own pid.
    if let Err(err) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        tracing::debug!(pid, error = %err, "killpg failed");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// Running means present in /proc and not a zombie awaiting reaping.
#[cfg(all(test, target_os = "linux"))]
pub(crate) fn process_running(pid: i32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.trim_start().chars().next())
            .map(|state| state != 'Z')
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Read a pid written by a test script, waiting briefly for the file.
#[cfg(all(test, unix))]
pub(crate) fn read_pid_file(path: &std::path::Path) -> i32 {
    for _ in 0..50 {
        if let Ok(raw) = std::fs::read_to_string(path) {
            if let Ok(pid) = raw.trim().parse() {
                return pid;
            }
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("no pid written to {}", path.display());
}
