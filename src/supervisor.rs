use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::process::{ProcessHandle, ProcessSpec};
use crate::signals::KillOutcome;

/// Counts of what teardown did, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Processes that received the kill signal.
    pub signalled: usize,
    /// Processes that were not running or exited before the signal.
    pub already_stopped: usize,
    /// Signalled processes whose output stream did not close within the
    /// grace period; their reader tasks were aborted.
    pub abandoned: usize,
}

/// Tracks every process started during one scenario and terminates all of
/// them at teardown.
#[derive(Debug)]
pub struct ProcessSupervisor {
    handles: Vec<ProcessHandle>,
    startup_settle: Duration,
    teardown_grace: Duration,
}

impl ProcessSupervisor {
    /// # Arguments
    /// * `startup_settle` - pause after each launch, see [`ProcessHandle::new`]
    /// * `teardown_grace` - how long teardown waits for a killed process's
    ///   output stream to close before abandoning its reader
    pub fn new(startup_settle: Duration, teardown_grace: Duration) -> Self {
        Self {
            handles: Vec::new(),
            startup_settle,
            teardown_grace,
        }
    }

    /// Adds a handle to the tracked set. The same process may be registered
    /// more than once; killing it twice is harmless.
    pub fn register(&mut self, handle: ProcessHandle) {
        debug!("Tracking process: {}", handle.spec());
        self.handles.push(handle);
    }

    /// Creates, registers and starts a process.
    ///
    /// The handle is registered before it is started, so even a process
    /// that fails half-way through launch is covered by teardown.
    pub async fn launch(&mut self, spec: ProcessSpec) -> Result<ProcessHandle> {
        let handle = ProcessHandle::new(spec, self.startup_settle);
        self.register(handle.clone());
        handle.start().await?;
        Ok(handle)
    }

    pub fn handles(&self) -> &[ProcessHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Kills every tracked process and forgets them.
    ///
    /// Never fails and never stops early: each handle is signalled even if
    /// an earlier one could not be.
    pub async fn teardown_all(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        let handles = std::mem::take(&mut self.handles);

        let mut signalled = Vec::new();
        for handle in handles {
            match handle.kill() {
                KillOutcome::Signalled => {
                    report.signalled += 1;
                    signalled.push(handle);
                }
                KillOutcome::NotRunning | KillOutcome::AlreadyExited => {
                    report.already_stopped += 1;
                }
                KillOutcome::Failed(errno) => {
                    warn!("Could not kill {}: {}; abandoning its reader", handle.spec(), errno);
                    handle.abandon_reader();
                    report.abandoned += 1;
                }
            }
        }

        for handle in signalled {
            if let Err(e) = handle.wait_for_exit(self.teardown_grace).await {
                warn!("{}; abandoning its reader", e);
                handle.abandon_reader();
                report.abandoned += 1;
            }
        }

        info!(
            "Teardown complete: {} signalled, {} already stopped, {} abandoned",
            report.signalled, report.already_stopped, report.abandoned
        );
        report
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        // Emergency cleanup when teardown was skipped, e.g. a panicking step.
        for handle in self.handles.drain(..) {
            if handle.kill().was_signalled() {
                eprintln!("ProcessSupervisor dropped with running process `{}`, sent SIGKILL", handle.spec());
            }
        }
    }
}
