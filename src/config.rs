use std::path::PathBuf;
use std::time::Duration;

use crate::environment::Environment;
use crate::settle::DEFAULT_SETTLE_DELAY;

/// An external executable the harness launches, with its environment
/// overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramConfig {
    pub program: String,
    pub environment: Environment,
}

impl ProgramConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            environment: Environment::new(),
        }
    }
}

/// Tunables of a harness run.
///
/// The defaults describe the usual local setup: `yarrrserver` and
/// `yarrrclient` on the `PATH`, the server on port 21346 and a
/// `./notifications` file in the working directory.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Server under test
    pub server: ProgramConfig,
    /// Client under test
    pub client: ProgramConfig,
    /// Helper printing the server's model for an endpoint
    pub model_remote: String,
    /// Host clients and connections talk to
    pub host: String,
    /// Port a "running server" listens on
    pub server_port: u16,
    /// File the server appends notifications to
    pub notification_path: PathBuf,
    /// Pause after sends, connects and closes
    pub settle_delay: Duration,
    /// Pause after launching any process
    pub startup_settle: Duration,
    /// Extra pause after launching a client
    pub client_settle: Duration,
    /// Bound on every blocking socket read and on connecting
    pub receive_timeout: Duration,
    /// Bound on waiting for a process to run or a port to accept
    pub readiness_timeout: Duration,
    /// Bound on waiting for the next notification line
    pub notification_timeout: Duration,
    /// Interval of all poll-until loops
    pub poll_interval: Duration,
    /// How long teardown waits for each killed process
    pub teardown_grace: Duration,
    /// Pattern the server's usage text must match
    pub usage_pattern: String,
    /// Output line announcing the server accepts connections. When unset,
    /// readiness is checked by connecting to the port, which the server sees
    /// as a short-lived client.
    pub ready_pattern: Option<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            server: ProgramConfig::new("yarrrserver"),
            client: ProgramConfig::new("yarrrclient"),
            model_remote: "the-model-remote".to_string(),
            host: "localhost".to_string(),
            server_port: 21346,
            notification_path: PathBuf::from("./notifications"),
            settle_delay: DEFAULT_SETTLE_DELAY,
            startup_settle: DEFAULT_SETTLE_DELAY,
            client_settle: Duration::from_secs(1),
            receive_timeout: Duration::from_secs(2),
            readiness_timeout: Duration::from_secs(5),
            notification_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(25),
            teardown_grace: Duration::from_secs(2),
            usage_pattern: "yarrrserver --port".to_string(),
            ready_pattern: None,
        }
    }
}
