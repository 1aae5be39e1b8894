use std::fmt;
use std::os::fd::OwnedFd;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use nix::unistd::Pid;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, trace, warn};

use crate::environment::Environment;
use crate::error::{HarnessError, Result};
use crate::output::OutputBuffer;
use crate::signals::{deliver_kill, KillOutcome};

/// What to launch: a program, its arguments and an environment overlay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub environment: Environment,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.set(key, value);
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment.extend(environment);
        self
    }

    /// Splits a command line on whitespace.
    ///
    /// No quoting or escaping is understood: `a "b c"` yields three tokens.
    /// Returns `None` for a blank line.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let program = tokens.next()?;
        Some(Self::new(program).args(tokens))
    }
}

impl fmt::Display for ProcessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Lifecycle of a tracked process. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    /// `start()` was called and the OS process is being created.
    Starting,
    /// The reader task observed the output stream open.
    Running,
    /// The output stream reached end of stream, or the launch failed.
    Stopped,
}

/// One external process launched by the harness.
///
/// Cloning is cheap and every clone observes the same process, so the
/// supervisor and the scenario can both hold it.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    spec: ProcessSpec,
    startup_settle: Duration,
    output: OutputBuffer,
    pid: OnceLock<Pid>,
    state: watch::Sender<ProcessState>,
    exit_status: watch::Sender<Option<ExitStatus>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessHandle {
    /// Creates a handle; nothing is launched until [`ProcessHandle::start`].
    ///
    /// `startup_settle` is how long `start()` pauses after spawning so the
    /// OS can schedule the process. It is a race-avoidance wait, not a
    /// readiness guarantee.
    pub fn new(spec: ProcessSpec, startup_settle: Duration) -> Self {
        let (state, _) = watch::channel(ProcessState::NotStarted);
        let (exit_status, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                spec,
                startup_settle,
                output: OutputBuffer::new(),
                pid: OnceLock::new(),
                state,
                exit_status,
                reader: Mutex::new(None),
            }),
        }
    }

    /// Launches the process and its output reader, then waits the startup
    /// settle delay.
    ///
    /// A process that cannot be launched is not an error here: the handle
    /// moves straight to [`ProcessState::Stopped`] and the OS error is
    /// recorded in its output. Only a second call fails.
    pub async fn start(&self) -> Result<()> {
        let claimed = self.inner.state.send_if_modified(|state| {
            if *state == ProcessState::NotStarted {
                *state = ProcessState::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(HarnessError::AlreadyStarted {
                command: self.inner.spec.to_string(),
            });
        }

        info!("Starting process: {}", self.inner.spec);

        match self.spawn() {
            Ok((child, output_pipe)) => {
                let reader = tokio::spawn(read_output(self.inner.clone(), child, output_pipe));
                *self.lock_reader() = Some(reader);
            }
            Err(e) => {
                warn!("Failed to launch {}: {}", self.inner.spec, e);
                self.inner
                    .output
                    .append_line(&format!("failed to launch {}: {}", self.inner.spec, e));
                self.inner.state.send_replace(ProcessState::Stopped);
            }
        }

        sleep(self.inner.startup_settle).await;
        Ok(())
    }

    fn spawn(&self) -> std::io::Result<(Child, pipe::Receiver)> {
        let (pipe_reader, pipe_writer) = std::io::pipe()?;
        let output_pipe = pipe::Receiver::from_owned_fd(OwnedFd::from(pipe_reader))?;

        let mut command = Command::new(&self.inner.spec.program);
        command.args(&self.inner.spec.args);
        // The child inherits our environment; the overlay wins on conflicts.
        command.envs(self.inner.spec.environment.iter());
        command.stdin(Stdio::null());
        command.stdout(pipe_writer.try_clone()?);
        command.stderr(pipe_writer);
        command.kill_on_drop(true);

        let child = command.spawn()?;
        // The command still owns our copies of the write end; they must be
        // closed or the reader never sees end of stream.
        drop(command);

        if let Some(raw) = child.id() {
            let pid = Pid::from_raw(raw as i32);
            let _ = self.inner.pid.set(pid);
            info!("Process {} spawned with PID: {}", self.inner.spec.program, pid);
        }

        Ok((child, output_pipe))
    }

    /// Requests termination with SIGKILL. Does not wait for the exit.
    ///
    /// A handle that is not running is left alone, so calling this twice is
    /// harmless.
    pub fn kill(&self) -> KillOutcome {
        if !self.is_running() {
            return KillOutcome::NotRunning;
        }
        match self.pid() {
            Some(pid) => deliver_kill(pid),
            None => KillOutcome::NotRunning,
        }
    }

    /// Waits until the reader has observed the process running.
    pub async fn wait_until_running(&self, limit: Duration) -> Result<()> {
        let what = format!("`{}` to start", self.inner.spec);
        let state = self
            .wait_for_state(limit, &what, |s| matches!(s, ProcessState::Running | ProcessState::Stopped))
            .await?;

        if state == ProcessState::Stopped {
            return Err(HarnessError::LaunchFailure {
                command: self.inner.spec.to_string(),
            });
        }
        Ok(())
    }

    /// Waits until the process has stopped and returns its exit status.
    ///
    /// `None` when the process was never launched.
    pub async fn wait_for_exit(&self, limit: Duration) -> Result<Option<ExitStatus>> {
        let deadline = Instant::now() + limit;
        let what = format!("`{}` to exit", self.inner.spec);

        self.wait_for_state(limit, &what, |s| *s == ProcessState::Stopped)
            .await?;

        if self.pid().is_none() {
            return Ok(None);
        }

        let mut exit_status = self.inner.exit_status.subscribe();
        let remaining = deadline.saturating_duration_since(Instant::now());
        // Bound to a local so the receiver outlives the borrow in the match.
        let exited = match timeout(remaining, exit_status.wait_for(Option::is_some)).await {
            Ok(Ok(status)) => Ok(*status),
            Ok(Err(_)) => Ok(None),
            Err(_) => Err(HarnessError::timeout(what, limit)),
        };
        exited
    }

    /// Waits until the captured output matches `pattern`.
    pub async fn wait_for_output(&self, pattern: &Regex, limit: Duration) -> Result<()> {
        let what = format!("output of `{}` to match /{}/", self.inner.spec, pattern);
        self.inner
            .output
            .wait_for(&what, limit, |text| pattern.is_match(text))
            .await
    }

    /// Aborts the reader task. The child, owned by the task, is killed when
    /// it is dropped.
    pub fn abandon_reader(&self) {
        if let Some(reader) = self.lock_reader().take() {
            debug!("Abandoning output reader of {}", self.inner.spec);
            reader.abort();
        }
        self.inner.state.send_if_modified(|state| {
            if *state != ProcessState::Stopped {
                *state = ProcessState::Stopped;
                true
            } else {
                false
            }
        });
    }

    async fn wait_for_state<F>(&self, limit: Duration, what: &str, mut ready: F) -> Result<ProcessState>
    where
        F: FnMut(&ProcessState) -> bool,
    {
        let mut state = self.inner.state.subscribe();
        let reached = match timeout(limit, state.wait_for(|s| ready(s))).await {
            Ok(Ok(state)) => Ok(*state),
            Ok(Err(_)) => Ok(self.state()),
            Err(_) => Err(HarnessError::timeout(what, limit)),
        };
        reached
    }

    fn lock_reader(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .reader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.inner.spec
    }

    pub fn pid(&self) -> Option<Pid> {
        self.inner.pid.get().copied()
    }

    pub fn state(&self) -> ProcessState {
        *self.inner.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    /// Text captured so far. Never blocks waiting for more.
    pub fn output(&self) -> String {
        self.inner.output.snapshot()
    }

    pub fn output_bytes(&self) -> Vec<u8> {
        self.inner.output.bytes()
    }

    pub fn output_buffer(&self) -> &OutputBuffer {
        &self.inner.output
    }

    /// Exit status, once the reader has reaped the child.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self.inner.exit_status.borrow()
    }
}

/// Body of the per-process reader task: copies lines into the output
/// buffer until end of stream, then marks the process stopped and reaps it.
async fn read_output(inner: Arc<Inner>, mut child: Child, output_pipe: pipe::Receiver) {
    inner.state.send_replace(ProcessState::Running);

    let mut reader = BufReader::new(output_pipe);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                trace!("{}: {}", inner.spec.program, String::from_utf8_lossy(&line).trim_end());
                inner.output.append(&line);
            }
            Err(e) => {
                warn!("Error reading output of {}: {}", inner.spec, e);
                break;
            }
        }
    }

    inner.state.send_replace(ProcessState::Stopped);
    debug!("Output of {} reached end of stream", inner.spec);

    match child.wait().await {
        Ok(status) => {
            info!("Process {} exited with status: {}", inner.spec.program, status);
            inner.exit_status.send_replace(Some(status));
        }
        Err(e) => warn!("Error waiting for {}: {}", inner.spec, e),
    }
}
