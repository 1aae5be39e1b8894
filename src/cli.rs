use clap::{Parser, Subcommand};
use eyre::eyre;
use std::path::PathBuf;
use std::time::Duration;

use yarrr_harness::{Environment, HarnessConfig, ProgramConfig};

type Result<T> = color_eyre::eyre::Result<T>;

/// Black-box test harness for the yarrr server and client
#[derive(Parser)]
#[command(name = "yarrr-harness")]
#[command(about = "Black-box test harness for the yarrr server and client")]
#[command(version)]
pub struct Cli {
    /// Server executable
    #[arg(long, default_value = "yarrrserver")]
    pub server: String,

    /// Client executable
    #[arg(long, default_value = "yarrrclient")]
    pub client: String,

    /// Helper that prints the model of an endpoint
    #[arg(long, default_value = "the-model-remote")]
    pub model_remote: String,

    /// Extra server environment, as KEY=VALUE (repeatable)
    #[arg(long = "server-env", value_name = "KEY=VALUE")]
    pub server_env: Vec<String>,

    /// Host to connect to
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Server port
    #[arg(long, default_value = "21346")]
    pub port: u16,

    /// Notification file handed to the server
    #[arg(long, default_value = "./notifications")]
    pub notify: PathBuf,

    /// Settle delay after sends, connects and closes (ms)
    #[arg(long, default_value = "250")]
    pub settle_ms: u64,

    /// Settle delay after launching a process (ms)
    #[arg(long, default_value = "250")]
    pub startup_settle_ms: u64,

    /// Extra settle delay after launching a client (ms)
    #[arg(long, default_value = "1000")]
    pub client_settle_ms: u64,

    /// Bound on socket reads and connects (ms)
    #[arg(long, default_value = "2000")]
    pub receive_timeout_ms: u64,

    /// Bound on waiting for a process or port to become ready (ms)
    #[arg(long, default_value = "5000")]
    pub readiness_timeout_ms: u64,

    /// How long teardown waits for each killed process (ms)
    #[arg(long, default_value = "2000")]
    pub teardown_grace_ms: u64,

    /// Server output line that means it is ready; without it the port is probed
    #[arg(long, value_name = "REGEX")]
    pub ready_pattern: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the negative-protocol smoke scenario against the server
    Smoke,
    /// Launch a process under supervision and print its captured output
    Run {
        /// Give up waiting for the process after this long (ms)
        #[arg(long, default_value = "10000")]
        timeout_ms: u64,
        /// Program to launch
        program: String,
        /// Arguments for the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Connect to the server, send one message and report whether it hung up
    Send {
        /// Send the payload verbatim instead of as a frame
        #[arg(long)]
        raw: bool,
        /// Payload text
        payload: String,
    },
    /// Print the model of a remote endpoint
    ExtractModel {
        /// Endpoint passed to the model helper
        endpoint: String,
    },
}

/// Parsed command line: the harness configuration plus what to do.
#[derive(Debug, Clone)]
pub struct Config {
    pub harness: HarnessConfig,
    pub command: Command,
}

impl Config {
    /// Parse command line arguments into configuration
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let mut server_environment = Environment::new();
        for assignment in &cli.server_env {
            let (key, value) = Environment::parse_assignment(assignment)
                .ok_or_else(|| eyre!("Invalid environment assignment '{}', expected KEY=VALUE", assignment))?;
            server_environment.set(key, value);
        }

        let harness = HarnessConfig {
            server: ProgramConfig {
                program: cli.server,
                environment: server_environment,
            },
            client: ProgramConfig::new(cli.client),
            model_remote: cli.model_remote,
            host: cli.host,
            server_port: cli.port,
            notification_path: cli.notify,
            settle_delay: Duration::from_millis(cli.settle_ms),
            startup_settle: Duration::from_millis(cli.startup_settle_ms),
            client_settle: Duration::from_millis(cli.client_settle_ms),
            receive_timeout: Duration::from_millis(cli.receive_timeout_ms),
            readiness_timeout: Duration::from_millis(cli.readiness_timeout_ms),
            teardown_grace: Duration::from_millis(cli.teardown_grace_ms),
            ready_pattern: cli.ready_pattern,
            ..HarnessConfig::default()
        };

        Ok(Config {
            harness,
            command: cli.command,
        })
    }
}
