use crate::integration::MockServerHarness;
use anyhow::Result;
use regex::Regex;
use std::time::Duration;
use yarrr_harness::{smoke, Closure, FramedConnection, HarnessError, KillOutcome, ScenarioContext};

/// The negative-protocol scenario on the server's usual port
#[tokio::test]
async fn test_negative_protocol_on_default_port() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = MockServerHarness::with_port(21346)?;
    let mut ctx = ScenarioContext::before(harness.config.clone()).await?;

    let server = ctx.start_server(["--port", "21346"]).await?;
    server.wait_until_running(Duration::from_secs(5)).await?;
    harness.wait_until_listening(&server).await?;

    let mut connection = FramedConnection::connect("127.0.0.1", 21346, Duration::from_secs(2)).await?;

    connection.send_framed(b"ping").await?;
    connection.expect_open_for(Duration::from_millis(250)).await?;
    server
        .wait_for_output(&Regex::new("frame 4 bytes")?, Duration::from_secs(5))
        .await?;

    connection.send_raw(b"garbage").await?;
    let closure = connection.expect_closed().await?;
    assert!(matches!(closure, Closure::Orderly | Closure::Reset));
    assert!(matches!(
        connection.send_framed(b"ping").await.unwrap_err(),
        HarnessError::ConnectionClosed
    ));

    assert_eq!(server.kill(), KillOutcome::Signalled);
    server.wait_for_exit(Duration::from_secs(5)).await?;
    assert!(!server.is_running());
    assert_eq!(server.kill(), KillOutcome::NotRunning);

    ctx.after().await;
    Ok(())
}

/// The smoke module runs the same scenario through the scenario context
#[tokio::test]
async fn test_smoke_scenario_outcome() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = MockServerHarness::new()?;
    let outcome = smoke::run(harness.config.clone()).await?;

    assert!(outcome.passed(), "{}", outcome.failure.map(|f| f.report()).unwrap_or_default());
    // The scenario kills the server itself.
    assert_eq!(outcome.teardown.signalled, 0);
    assert_eq!(outcome.teardown.already_stopped, 1);
    Ok(())
}

/// The smoke scenario reports the failing step and the captured output
#[tokio::test]
async fn test_smoke_scenario_failure_report() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut harness = MockServerHarness::new()?;
    harness.config.server.program = "sh".to_string();
    harness.config.readiness_timeout = Duration::from_millis(500);
    let config = harness.config.clone();

    // `sh --port <port>` fails at once; nothing ever listens.
    let outcome = smoke::run(config).await?;

    let failure = outcome.failure.expect("scenario should fail");
    assert_eq!(failure.step, "the server should be running");
    assert_eq!(failure.captured.len(), 1);
    assert!(failure.captured[0].command.starts_with("sh --port"));
    assert!(failure.report().contains("sh --port"));
    Ok(())
}

/// Frames are delivered whole, including empty and binary payloads
#[tokio::test]
async fn test_framed_messages_are_received() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = MockServerHarness::new()?;
    let mut ctx = ScenarioContext::before(harness.config.clone()).await?;

    let server = ctx.start_running_server().await?;
    harness.wait_until_listening(&server).await?;
    ctx.open_connection().await?;

    ctx.send_framed(b"ping").await?;
    ctx.send_framed(b"").await?;
    ctx.send_framed(&[0x00, 0x00, 0x00]).await?;
    ctx.expect_connection_open().await?;

    let all_frames = Regex::new(r"(?s)frame 4 bytes.*frame 0 bytes.*frame 3 bytes")?;
    server.wait_for_output(&all_frames, Duration::from_secs(5)).await?;
    ctx.expect_server_running()?;

    ctx.after().await;
    Ok(())
}

/// Unframed input makes the server hang up
#[tokio::test]
async fn test_unframed_input_closes_connection() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = MockServerHarness::new()?;
    let mut ctx = ScenarioContext::before(harness.config.clone()).await?;

    let server = ctx.start_running_server().await?;
    harness.wait_until_listening(&server).await?;
    ctx.open_connection().await?;

    ctx.send_raw(b"garbage").await?;
    ctx.expect_connection_closed().await?;
    server
        .wait_for_output(&Regex::new("malformed input")?, Duration::from_secs(5))
        .await?;

    // The server itself survives a bad client.
    ctx.expect_server_running()?;

    ctx.after().await;
    Ok(())
}

/// Connecting with no server listening fails immediately
#[tokio::test]
async fn test_connection_refused_without_server() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = MockServerHarness::new()?;
    let mut ctx = ScenarioContext::before(harness.config.clone()).await?;

    let err = ctx.open_connection().await.unwrap_err();
    assert!(matches!(err, HarnessError::ConnectionRefused { .. }), "{err}");

    ctx.after().await;
    Ok(())
}

/// Closing our side is seen by the server as a disconnect
#[tokio::test]
async fn test_close_connection_is_observed_by_server() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = MockServerHarness::new()?;
    let mut ctx = ScenarioContext::before(harness.config.clone()).await?;

    let server = ctx.start_running_server().await?;
    harness.wait_until_listening(&server).await?;
    ctx.open_connection().await?;
    ctx.close_connection().await?;
    ctx.close_connection().await?;

    server
        .wait_for_output(&Regex::new(r"client \S+ disconnected")?, Duration::from_secs(5))
        .await?;

    ctx.after().await;
    Ok(())
}
