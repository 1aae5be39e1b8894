use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

/// The signal used to stop processes under test: immediate, non-catchable.
pub const KILL_SIGNAL: Signal = Signal::SIGKILL;

/// What happened when a kill was requested.
///
/// None of these is an error: teardown must always complete, so a target
/// that is already gone is an expected outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// The handle was not running; nothing was sent.
    NotRunning,
    /// The signal was delivered.
    Signalled,
    /// The process exited between the liveness check and the signal.
    AlreadyExited,
    /// Delivery failed for another reason (logged, then ignored).
    Failed(Errno),
}

impl KillOutcome {
    pub fn was_signalled(self) -> bool {
        self == KillOutcome::Signalled
    }
}

/// Sends [`KILL_SIGNAL`] to `pid`, folding every failure into a
/// [`KillOutcome`].
pub fn deliver_kill(pid: Pid) -> KillOutcome {
    debug!("Sending {:?} to process {}", KILL_SIGNAL, pid);
    match kill(pid, KILL_SIGNAL) {
        Ok(()) => KillOutcome::Signalled,
        Err(Errno::ESRCH) => {
            debug!("Process {} already exited", pid);
            KillOutcome::AlreadyExited
        }
        Err(errno) => {
            warn!("Failed to send {:?} to process {}: {}", KILL_SIGNAL, pid, errno);
            KillOutcome::Failed(errno)
        }
    }
}
