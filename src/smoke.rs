//! The canonical negative-protocol scenario.
//!
//! Start the server on its port, connect, send a well-formed frame and check
//! the connection survives, send unframed bytes and check the server hangs
//! up, then kill the server.

use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::scenario::{ScenarioContext, StepFailure, StepResultExt};
use crate::settle::poll_until;
use crate::signals::KillOutcome;
use crate::supervisor::TeardownReport;

/// Payload of the well-formed frame.
pub const PING: &[u8] = b"ping";

/// Bytes sent without a length prefix.
pub const GARBAGE: &[u8] = b"garbage";

/// Result of a scenario run: the failed step, if any, and what teardown did.
#[derive(Debug)]
pub struct ScenarioOutcome {
    pub failure: Option<StepFailure>,
    pub teardown: TeardownReport,
}

impl ScenarioOutcome {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Runs the smoke scenario between the before and after hooks.
///
/// Only a failing "before" hook is returned as an error; step failures are
/// part of the outcome, and teardown always runs.
pub async fn run(config: HarnessConfig) -> Result<ScenarioOutcome> {
    let mut ctx = ScenarioContext::before(config).await?;

    let failure = negative_protocol(&mut ctx).await.err();
    if let Some(failure) = &failure {
        warn!("{}", failure);
    }

    let teardown = ctx.after().await;
    Ok(ScenarioOutcome { failure, teardown })
}

/// The scenario steps.
pub async fn negative_protocol(ctx: &mut ScenarioContext) -> std::result::Result<(), StepFailure> {
    let port = ctx.config().server_port.to_string();
    let server = ctx
        .start_server(["--port", port.as_str()])
        .await
        .step(ctx, "I start the server")?;
    ctx.wait_for_server().await.step(ctx, "the server should be running")?;

    ctx.open_connection().await.step(ctx, "a tcp connection")?;

    ctx.send_framed(PING).await.step(ctx, "I send a ping frame")?;
    ctx.expect_connection_open()
        .await
        .step(ctx, "the connection should stay open")?;

    ctx.send_raw(GARBAGE).await.step(ctx, "I send unframed bytes")?;
    let closure = ctx
        .expect_connection_closed()
        .await
        .step(ctx, "the server should close the connection")?;
    info!("Server dropped the connection after unframed input ({:?})", closure);

    server.kill();
    let (limit, interval) = (ctx.config().readiness_timeout, ctx.config().poll_interval);
    poll_until("the server to stop", limit, interval, || !server.is_running())
        .await
        .step(ctx, "the server should not be running")?;

    match server.kill() {
        KillOutcome::NotRunning => Ok(()),
        outcome => Err(HarnessError::Assertion(format!(
            "killing a stopped server should be a no-op, got {:?}",
            outcome
        ))),
    }
    .step(ctx, "killing the server again is a no-op")
}
