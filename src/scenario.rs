use std::fmt;

use chrono::{DateTime, Utc};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::HarnessConfig;
use crate::connection::{Closure, FramedConnection};
use crate::error::{HarnessError, Result};
use crate::model::ModelExtractor;
use crate::notification::NotificationChannel;
use crate::ports::wait_for_listener;
use crate::process::{ProcessHandle, ProcessSpec, ProcessState};
use crate::settle::settle;
use crate::supervisor::{ProcessSupervisor, TeardownReport};

/// Everything one scenario touches: the processes it started, its
/// connection and the notification channel.
///
/// Created by [`ScenarioContext::before`] and consumed by
/// [`ScenarioContext::after`], which runs whether the scenario passed or
/// not. Steps are plain async methods; a step that needs the server or a
/// connection fails with [`HarnessError::MissingState`] if an earlier step
/// did not provide one.
#[derive(Debug)]
pub struct ScenarioContext {
    id: Uuid,
    config: HarnessConfig,
    supervisor: ProcessSupervisor,
    server: Option<ProcessHandle>,
    clients: Vec<ProcessHandle>,
    connection: Option<FramedConnection>,
    notifications: NotificationChannel,
}

impl ScenarioContext {
    /// The "before scenario" hook: prepares an empty notification file.
    pub async fn before(config: HarnessConfig) -> Result<Self> {
        let id = Uuid::new_v4();
        info!(scenario = %id, "Scenario starting");

        let notifications = NotificationChannel::create(&config.notification_path, config.poll_interval).await?;
        let supervisor = ProcessSupervisor::new(config.startup_settle, config.teardown_grace);

        Ok(Self {
            id,
            config,
            supervisor,
            server: None,
            clients: Vec::new(),
            connection: None,
            notifications,
        })
    }

    /// The "after scenario" hook: closes the connection and kills every
    /// process the scenario started. Never fails.
    pub async fn after(mut self) -> TeardownReport {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        let report = self.supervisor.teardown_all().await;
        info!(scenario = %self.id, "Scenario finished");
        report
    }

    /// Launches the server with the given command line parameters.
    pub async fn start_server<I, S>(&mut self, params: I) -> Result<ProcessHandle>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = ProcessSpec::new(&self.config.server.program)
            .args(params)
            .environment(self.config.server.environment.clone());
        let handle = self.supervisor.launch(spec).await?;
        self.server = Some(handle.clone());
        Ok(handle)
    }

    pub async fn start_server_without_parameters(&mut self) -> Result<ProcessHandle> {
        self.start_server(Vec::<String>::new()).await
    }

    /// Launches the server on the configured port with notifications going
    /// to this scenario's notification file.
    pub async fn start_running_server(&mut self) -> Result<ProcessHandle> {
        let params = [
            "--port".to_string(),
            self.config.server_port.to_string(),
            "--notify".to_string(),
            self.notifications.path().display().to_string(),
        ];
        self.start_server(params).await
    }

    /// Waits until the server runs and accepts connections on its port.
    ///
    /// With a `ready_pattern` configured this only watches the server's
    /// output. Without one it probes the port, and the probe connection
    /// shows up in the server's notifications like any other client.
    pub async fn wait_for_server(&self) -> Result<()> {
        let server = self.server()?;
        server.wait_until_running(self.config.readiness_timeout).await?;
        if let Some(pattern) = &self.config.ready_pattern {
            let ready = Regex::new(pattern)?;
            return server.wait_for_output(&ready, self.config.readiness_timeout).await;
        }
        wait_for_listener(
            &self.config.host,
            self.config.server_port,
            self.config.readiness_timeout,
            self.config.poll_interval,
        )
        .await
    }

    /// Launches a text-mode client pointed at the server, then gives it the
    /// client settle delay to connect.
    pub async fn start_client(&mut self) -> Result<ProcessHandle> {
        let spec = ProcessSpec::new(&self.config.client.program)
            .arg("--text")
            .arg("--server")
            .arg(format!("{}:{}", self.config.host, self.config.server_port))
            .environment(self.config.client.environment.clone());
        let handle = self.supervisor.launch(spec).await?;
        self.clients.push(handle.clone());
        settle(self.config.client_settle).await;
        Ok(handle)
    }

    pub async fn start_clients(&mut self, count: usize) -> Result<Vec<ProcessHandle>> {
        let mut started = Vec::with_capacity(count);
        for _ in 0..count {
            started.push(self.start_client().await?);
        }
        Ok(started)
    }

    pub async fn open_connection(&mut self) -> Result<()> {
        let connection =
            FramedConnection::connect(&self.config.host, self.config.server_port, self.config.receive_timeout).await?;
        self.connection = Some(connection);
        settle(self.config.settle_delay).await;
        Ok(())
    }

    pub async fn close_connection(&mut self) -> Result<()> {
        self.connection_mut()?.close().await;
        settle(self.config.settle_delay).await;
        Ok(())
    }

    pub async fn send_framed(&mut self, payload: &[u8]) -> Result<()> {
        self.connection_mut()?.send_framed(payload).await?;
        settle(self.config.settle_delay).await;
        Ok(())
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.connection_mut()?.send_raw(bytes).await?;
        settle(self.config.settle_delay).await;
        Ok(())
    }

    pub async fn extract_model(&self, endpoint: &str) -> Result<Vec<u8>> {
        ModelExtractor::new(&self.config.model_remote, endpoint, self.config.readiness_timeout)
            .extract_model()
            .await
    }

    /// The server's captured output must match `pattern`.
    pub fn expect_server_output(&self, pattern: &str) -> Result<()> {
        let regex = Regex::new(pattern)?;
        let server = self.server()?;
        if server.output_buffer().matches(&regex) {
            Ok(())
        } else {
            Err(HarnessError::Assertion(format!(
                "server output does not match /{}/",
                pattern
            )))
        }
    }

    pub fn expect_usage_text(&self) -> Result<()> {
        self.expect_server_output(&self.config.usage_pattern)
    }

    pub fn expect_server_running(&self) -> Result<()> {
        match self.server()?.state() {
            ProcessState::Running => Ok(()),
            state => Err(HarnessError::Assertion(format!(
                "server should be running but is {:?}",
                state
            ))),
        }
    }

    pub fn expect_server_not_running(&self) -> Result<()> {
        if self.server()?.is_running() {
            Err(HarnessError::Assertion("server should not be running".to_string()))
        } else {
            Ok(())
        }
    }

    /// Reads the next notification line and matches it against `pattern`.
    pub async fn expect_notification(&mut self, pattern: &str) -> Result<String> {
        let regex = Regex::new(pattern)?;
        let line = self.notifications.next_line(self.config.notification_timeout).await?;
        if regex.is_match(&line) {
            debug!("Notification {:?} matches /{}/", line, pattern);
            Ok(line)
        } else {
            Err(HarnessError::Assertion(format!(
                "notification {:?} does not match /{}/",
                line, pattern
            )))
        }
    }

    /// The server must drop the connection within the receive timeout.
    pub async fn expect_connection_closed(&mut self) -> Result<Closure> {
        self.connection_mut()?.expect_closed().await
    }

    /// The server must keep the connection open for one settle delay.
    pub async fn expect_connection_open(&mut self) -> Result<()> {
        let window = self.config.settle_delay;
        self.connection_mut()?.expect_open_for(window).await
    }

    pub fn server(&self) -> Result<&ProcessHandle> {
        self.server.as_ref().ok_or(HarnessError::MissingState("server"))
    }

    /// The most recently started client.
    pub fn client(&self) -> Result<&ProcessHandle> {
        self.clients.last().ok_or(HarnessError::MissingState("client"))
    }

    pub fn clients(&self) -> &[ProcessHandle] {
        &self.clients
    }

    pub fn connection_mut(&mut self) -> Result<&mut FramedConnection> {
        self.connection.as_mut().ok_or(HarnessError::MissingState("connection"))
    }

    pub fn notifications(&mut self) -> &mut NotificationChannel {
        &mut self.notifications
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Builds the report for a failed step, including what every process
    /// of this scenario has printed so far.
    pub fn failure(&self, step: impl Into<String>, error: HarnessError) -> StepFailure {
        StepFailure {
            scenario: self.id,
            step: step.into(),
            error,
            at: Utc::now(),
            captured: self
                .supervisor
                .handles()
                .iter()
                .map(CapturedOutput::from)
                .collect(),
        }
    }
}

/// Output of one process at the time a step failed.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub command: String,
    pub pid: Option<i32>,
    pub state: ProcessState,
    pub output: String,
}

impl From<&ProcessHandle> for CapturedOutput {
    fn from(handle: &ProcessHandle) -> Self {
        Self {
            command: handle.spec().to_string(),
            pid: handle.pid().map(|pid| pid.as_raw()),
            state: handle.state(),
            output: handle.output(),
        }
    }
}

/// A failed step, with enough context to debug the external processes.
#[derive(Debug, Error)]
#[error("step `{step}` failed: {error}")]
pub struct StepFailure {
    pub scenario: Uuid,
    pub step: String,
    #[source]
    pub error: HarnessError,
    pub at: DateTime<Utc>,
    pub captured: Vec<CapturedOutput>,
}

impl StepFailure {
    /// Multi-line report: the failing step, then each process's output.
    pub fn report(&self) -> String {
        let mut report = format!(
            "scenario {} failed at {}\n{}\n",
            self.scenario,
            self.at.to_rfc3339(),
            self
        );
        for captured in &self.captured {
            report.push_str(&captured.to_string());
        }
        report
    }
}

impl fmt::Display for CapturedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pid {
            Some(pid) => writeln!(f, "--- `{}` (pid {}, {:?}) ---", self.command, pid, self.state)?,
            None => writeln!(f, "--- `{}` ({:?}) ---", self.command, self.state)?,
        }
        if self.output.is_empty() {
            writeln!(f, "(no output)")
        } else if self.output.ends_with('\n') {
            f.write_str(&self.output)
        } else {
            writeln!(f, "{}", self.output)
        }
    }
}

/// Names the step a result belongs to.
///
/// ```no_run
/// # use yarrr_harness::{HarnessConfig, ScenarioContext, StepFailure, StepResultExt};
/// # async fn scenario(ctx: &mut ScenarioContext) -> Result<(), StepFailure> {
/// ctx.start_running_server().await.step(ctx, "a running server")?;
/// ctx.expect_server_running().step(ctx, "the server should be running")?;
/// # Ok(())
/// # }
/// ```
pub trait StepResultExt<T> {
    fn step(self, ctx: &ScenarioContext, name: &str) -> std::result::Result<T, StepFailure>;
}

impl<T> StepResultExt<T> for Result<T> {
    fn step(self, ctx: &ScenarioContext, name: &str) -> std::result::Result<T, StepFailure> {
        self.map_err(|error| ctx.failure(name, error))
    }
}
