//! Step runner - executes one step's command inside an environment

use crate::{
    core::{pipeline::DEFAULT_OUTPUT_LIMIT, ErrorKind, Pipeline, Step, StepOutcome, StepResult},
    environment::Environment,
    execution::abort::AbortSignal,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout_at;
use tracing::{debug, info, warn};

/// Time between SIGTERM and SIGKILL
const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(500);

/// How long to wait for output readers once the process is gone
const READER_GRACE: Duration = Duration::from_secs(1);

/// Poll interval while waiting for a signalled group to empty
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(20);

const READ_CHUNK: usize = 8 * 1024;

/// Trait for running steps - allows for different implementations
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Run `step` to completion, timeout or abort. Never panics on process errors;
    /// every failure is reported through the returned result.
    async fn run(&self, step: &Step, environment: &Environment, abort: &AbortSignal) -> StepResult;
}

/// Output buffer keeping the most recent `limit` bytes
#[derive(Debug)]
pub struct OutputBuffer {
    bytes: VecDeque<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(limit.min(READ_CHUNK * 8)),
            limit,
            truncated: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend(chunk);
        if self.bytes.len() > self.limit {
            let excess = self.bytes.len() - self.limit;
            self.bytes.drain(..excess);
            self.truncated = true;
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Buffered output as text
    pub fn text(&mut self) -> String {
        String::from_utf8_lossy(self.bytes.make_contiguous()).into_owned()
    }
}

/// How a step process ended
enum Ending {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Aborted,
}

/// Runs step commands through a POSIX shell
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    output_limit: usize,
    kill_grace: Duration,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            output_limit: DEFAULT_OUTPUT_LIMIT,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
}

impl ShellRunner {
    pub fn new(output_limit: usize) -> Self {
        Self {
            output_limit,
            ..Self::default()
        }
    }

    /// A runner using the pipeline's per-step output limit
    pub fn for_pipeline(pipeline: &Pipeline) -> Self {
        Self::new(pipeline.output_limit)
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_kill_grace(mut self, kill_grace: Duration) -> Self {
        self.kill_grace = kill_grace;
        self
    }

    fn command(&self, step: &Step, environment: &Environment) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&step.command)
            .current_dir(environment.working_dir())
            .envs(environment.variables())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so the whole tree can be signalled
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }

    /// SIGTERM the process group, then SIGKILL after the grace period
    #[cfg(unix)]
    async fn terminate(&self, child: &mut Child, group: Option<u32>) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pgid) = group else {
            let _ = child.kill().await;
            return;
        };
        let group = Pid::from_raw(pgid as i32);

        if let Err(e) = killpg(group, Signal::SIGTERM) {
            debug!("SIGTERM to process group {} failed: {}", pgid, e);
        }

        if tokio::time::timeout(self.kill_grace, child.wait()).await.is_err() {
            info!("Process group {} ignored SIGTERM, killing", pgid);
        }

        // Stragglers in the group that outlived the leader
        let _ = killpg(group, Signal::SIGKILL);
        let _ = child.start_kill();
        let _ = child.wait().await;
    }

    #[cfg(not(unix))]
    async fn terminate(&self, child: &mut Child, _group: Option<u32>) {
        let _ = child.kill().await;
    }

    /// Stop whatever the step left running in its group after the leader exited
    #[cfg(unix)]
    async fn reap_group(&self, group: Option<u32>) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pgid) = group else {
            return;
        };
        let group = Pid::from_raw(pgid as i32);

        // ESRCH: the group is already empty
        if killpg(group, Signal::SIGTERM).is_err() {
            return;
        }
        debug!("Terminating leftover processes in group {}", pgid);

        let deadline = Instant::now() + self.kill_grace;
        while Instant::now() < deadline {
            tokio::time::sleep(GROUP_POLL_INTERVAL).await;
            if killpg(group, None::<Signal>).is_err() {
                return;
            }
        }

        info!("Leftover processes in group {} ignored SIGTERM, killing", pgid);
        let _ = killpg(group, Signal::SIGKILL);
    }

    #[cfg(not(unix))]
    async fn reap_group(&self, _group: Option<u32>) {}
}

fn spawn_reader<S>(mut stream: S, buffer: Arc<Mutex<OutputBuffer>>) -> JoinHandle<()>
where
    S: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    buffer
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(&chunk[..n]);
                }
            }
        }
    })
}

fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exited with code {}", code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("terminated by signal {}", signal);
        }
    }
    "exited abnormally".to_string()
}

#[async_trait]
impl StepRunner for ShellRunner {
    async fn run(&self, step: &Step, environment: &Environment, abort: &AbortSignal) -> StepResult {
        if let Some(reason) = abort.reason() {
            return StepResult::not_run(step, reason.error_kind(), reason.to_string());
        }

        let started_at = Utc::now();
        let start = Instant::now();

        debug!("Running step {}: {}", step.name, step.command);
        let mut child = match self.command(step, environment).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start step {}: {}", step.name, e);
                return StepResult::not_run(
                    step,
                    ErrorKind::StepFailure,
                    format!("failed to start '{}': {}", self.shell, e),
                );
            }
        };
        // The child leads its own group, so its pid is the group id
        let group = child.id();

        let output = Arc::new(Mutex::new(OutputBuffer::new(self.output_limit)));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, output.clone()));
        }

        let ending = tokio::select! {
            status = child.wait() => Ending::Exited(status),
            _ = tokio::time::sleep(step.timeout) => Ending::TimedOut,
            _ = abort.aborted() => Ending::Aborted,
        };

        let leader_exited = matches!(ending, Ending::Exited(Ok(_)));
        let (outcome, exit_code) = match ending {
            Ending::Exited(Ok(status)) if status.success() => (StepOutcome::Success, status.code()),
            Ending::Exited(Ok(status)) => (
                StepOutcome::Failed {
                    kind: ErrorKind::StepFailure,
                    message: describe_exit(&status),
                },
                status.code(),
            ),
            Ending::Exited(Err(e)) => {
                self.terminate(&mut child, group).await;
                (
                    StepOutcome::Failed {
                        kind: ErrorKind::StepFailure,
                        message: format!("failed waiting for process: {}", e),
                    },
                    None,
                )
            }
            Ending::TimedOut => {
                warn!(
                    "Step {} timed out after {}s",
                    step.name,
                    step.timeout.as_secs_f64()
                );
                self.terminate(&mut child, group).await;
                (
                    StepOutcome::Failed {
                        kind: ErrorKind::Timeout,
                        message: format!("timed out after {}s", step.timeout.as_secs_f64()),
                    },
                    None,
                )
            }
            Ending::Aborted => {
                let (kind, message) = abort
                    .reason()
                    .map(|r| (r.error_kind(), r.to_string()))
                    .unwrap_or((ErrorKind::Cancelled, "run cancelled".to_string()));
                info!("Step {} aborted: {}", step.name, message);
                self.terminate(&mut child, group).await;
                (StepOutcome::Failed { kind, message }, None)
            }
        };

        if leader_exited {
            self.reap_group(group).await;
        }

        // Background processes can hold the pipes open past the leader's exit
        let deadline = tokio::time::Instant::now() + READER_GRACE;
        for mut reader in readers {
            if timeout_at(deadline, &mut reader).await.is_err() {
                reader.abort();
            }
        }

        let (text, truncated) = {
            let mut buffer = output.lock().unwrap_or_else(PoisonError::into_inner);
            (buffer.text(), buffer.is_truncated())
        };

        StepResult {
            index: step.index,
            name: step.name.clone(),
            always_run: step.always_run,
            outcome,
            exit_code,
            output: text,
            output_truncated: truncated,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}
