use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::{HarnessError, Result};

/// Fetches the world model of a running server through an external helper.
///
/// The helper is invoked as `<program> <endpoint>`; whatever it prints on
/// stdout is the model, returned as opaque bytes. A non-zero exit status is
/// a failure.
#[derive(Debug, Clone)]
pub struct ModelExtractor {
    program: String,
    endpoint: String,
    timeout: Duration,
}

impl ModelExtractor {
    pub fn new(program: impl Into<String>, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            endpoint: endpoint.into(),
            timeout,
        }
    }

    pub async fn extract_model(&self) -> Result<Vec<u8>> {
        debug!("Extracting model from {} using {}", self.endpoint, self.program);

        let mut command = Command::new(&self.program);
        command
            .arg(&self.endpoint)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(self.failure(format!("could not run {}: {}", self.program, e))),
            Err(_) => {
                return Err(HarnessError::timeout(
                    format!("model from {}", self.endpoint),
                    self.timeout,
                ))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.failure(format!("{} exited with {}: {}", self.program, output.status, stderr.trim())));
        }

        info!("Extracted {} byte model from {}", output.stdout.len(), self.endpoint);
        Ok(output.stdout)
    }

    fn failure(&self, reason: String) -> HarnessError {
        HarnessError::ModelExtraction {
            endpoint: self.endpoint.clone(),
            reason,
        }
    }
}
