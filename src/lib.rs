//! Black-box test harness for the yarrr server and client.
//!
//! The harness launches the external executables, captures their output,
//! tracks whether they are running, kills them at the end of a scenario and
//! talks to the server over TCP using the length-prefixed framing of the
//! protocol:
//!
//! ```text
//! frame := be_u32(len(payload)) || payload
//! ```
//!
//! A scenario is driven through a [`ScenarioContext`]:
//!
//! ```no_run
//! use yarrr_harness::{HarnessConfig, ScenarioContext};
//!
//! # async fn example() -> yarrr_harness::Result<()> {
//! let mut ctx = ScenarioContext::before(HarnessConfig::default()).await?;
//! ctx.start_running_server().await?;
//! ctx.wait_for_server().await?;
//! ctx.open_connection().await?;
//! ctx.send_raw(b"garbage").await?;
//! ctx.expect_connection_closed().await?;
//! ctx.after().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod environment;
pub mod error;
pub mod frame;
pub mod model;
pub mod notification;
pub mod output;
pub mod ports;
pub mod process;
pub mod scenario;
pub mod settle;
pub mod signals;
pub mod smoke;
pub mod supervisor;

pub use config::{HarnessConfig, ProgramConfig};
pub use connection::{Closure, FramedConnection, ReadOutcome};
pub use environment::Environment;
pub use error::{HarnessError, Result};
pub use model::ModelExtractor;
pub use notification::NotificationChannel;
pub use output::OutputBuffer;
pub use process::{ProcessHandle, ProcessSpec, ProcessState};
pub use scenario::{CapturedOutput, ScenarioContext, StepFailure, StepResultExt};
pub use signals::KillOutcome;
pub use supervisor::{ProcessSupervisor, TeardownReport};
