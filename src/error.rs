use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the harness core.
///
/// Teardown never returns these: killing a process that already exited is
/// reported through [`crate::signals::KillOutcome`] instead.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("process `{command}` never reached the running state")]
    LaunchFailure { command: String },

    #[error("process `{command}` was already started")]
    AlreadyStarted { command: String },

    #[error("connection to {addr} failed: {source}")]
    ConnectionRefused {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("expected end of stream but received {len} bytes")]
    UnexpectedData { len: usize },

    #[error("payload of {len} bytes does not fit a 4-byte length prefix")]
    FrameTooLarge { len: usize },

    #[error("model extraction from `{endpoint}` failed: {reason}")]
    ModelExtraction { endpoint: String, reason: String },

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("no {0} in the current scenario")]
    MissingState(&'static str),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("notification watcher: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    pub(crate) fn timeout(what: impl Into<String>, after: Duration) -> Self {
        HarnessError::Timeout {
            what: what.into(),
            after,
        }
    }

    /// True for [`HarnessError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, HarnessError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
