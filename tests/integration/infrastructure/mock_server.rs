use anyhow::{Context, Result};
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use yarrr_harness::ports::reserve_free_port;
use yarrr_harness::{HarnessConfig, ProcessHandle, ProgramConfig};

/// Harness configuration pointing at the mock server, with its own
/// notification file and short settle delays.
pub struct MockServerHarness {
    pub config: HarnessConfig,
    // Holds the notification file; removed on drop.
    _temp_dir: TempDir,
}

impl MockServerHarness {
    /// Uses a free port so tests can run side by side.
    pub fn new() -> Result<Self> {
        let port = reserve_free_port().context("Failed to reserve a port")?;
        Self::with_port(port)
    }

    pub fn with_port(port: u16) -> Result<Self> {
        let temp_dir = TempDir::new().context("Failed to create temporary directory")?;

        let config = HarnessConfig {
            server: ProgramConfig::new(Self::mock_server_binary()),
            host: "127.0.0.1".to_string(),
            server_port: port,
            notification_path: temp_dir.path().join("notifications"),
            settle_delay: Duration::from_millis(100),
            startup_settle: Duration::from_millis(100),
            client_settle: Duration::from_millis(100),
            receive_timeout: Duration::from_secs(2),
            readiness_timeout: Duration::from_secs(10),
            notification_timeout: Duration::from_secs(5),
            ready_pattern: Some(format!("listening on 127\\.0\\.0\\.1:{}", port)),
            ..HarnessConfig::default()
        };

        Ok(Self {
            config,
            _temp_dir: temp_dir,
        })
    }

    pub fn mock_server_binary() -> &'static str {
        env!("CARGO_BIN_EXE_mock-yarrr-server")
    }

    pub fn notification_path(&self) -> PathBuf {
        self.config.notification_path.clone()
    }

    /// Waits for the server's "listening" line.
    ///
    /// Unlike probing the port, this does not open a connection, so it
    /// leaves no notification behind.
    pub async fn wait_until_listening(&self, server: &ProcessHandle) -> Result<()> {
        let listening = Regex::new(&format!("listening on 127.0.0.1:{}", self.config.server_port))?;
        server
            .wait_for_output(&listening, self.config.readiness_timeout)
            .await
            .context("Server never reported listening")?;
        Ok(())
    }
}
