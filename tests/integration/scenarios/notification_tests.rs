use crate::integration::MockServerHarness;
use anyhow::Result;
use std::time::Duration;
use yarrr_harness::{HarnessError, NotificationChannel, ScenarioContext};

/// Connecting and hanging up produce two notifications, in order
#[tokio::test]
async fn test_connect_and_disconnect_notifications() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = MockServerHarness::new()?;
    let mut ctx = ScenarioContext::before(harness.config.clone()).await?;

    let server = ctx.start_running_server().await?;
    harness.wait_until_listening(&server).await?;

    ctx.open_connection().await?;
    let connected = ctx.expect_notification("^connected 127\\.0\\.0\\.1:").await?;

    ctx.close_connection().await?;
    let disconnected = ctx.expect_notification("^disconnected ").await?;

    // Both lines name the same peer.
    assert_eq!(
        connected.trim_start_matches("connected "),
        disconnected.trim_start_matches("disconnected ")
    );

    ctx.after().await;
    Ok(())
}

/// Unframed input is reported after the connection notification
#[tokio::test]
async fn test_malformed_input_notification() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = MockServerHarness::new()?;
    let mut ctx = ScenarioContext::before(harness.config.clone()).await?;

    let server = ctx.start_running_server().await?;
    harness.wait_until_listening(&server).await?;

    ctx.open_connection().await?;
    ctx.expect_notification("^connected").await?;

    ctx.send_raw(b"garbage").await?;
    ctx.expect_notification("^malformed").await?;
    ctx.expect_connection_closed().await?;

    ctx.after().await;
    Ok(())
}

/// A notification that does not match is an assertion failure
#[tokio::test]
async fn test_unexpected_notification_fails() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = MockServerHarness::new()?;
    let mut ctx = ScenarioContext::before(harness.config.clone()).await?;

    let server = ctx.start_running_server().await?;
    harness.wait_until_listening(&server).await?;
    ctx.open_connection().await?;

    let err = ctx.expect_notification("^disconnected").await.unwrap_err();
    assert!(matches!(err, HarnessError::Assertion(_)), "{err}");

    ctx.after().await;
    Ok(())
}

/// Waiting for a notification that never comes times out
#[tokio::test]
async fn test_notification_timeout() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut harness = MockServerHarness::new()?;
    harness.config.notification_timeout = Duration::from_millis(300);
    let mut ctx = ScenarioContext::before(harness.config.clone()).await?;

    let server = ctx.start_running_server().await?;
    harness.wait_until_listening(&server).await?;

    let err = ctx.expect_notification("^connected").await.unwrap_err();
    assert!(err.is_timeout(), "{err}");

    ctx.after().await;
    Ok(())
}

/// Each scenario starts from an empty notification file
#[tokio::test]
async fn test_stale_notifications_are_discarded() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut harness = MockServerHarness::new()?;
    harness.config.notification_timeout = Duration::from_millis(300);
    std::fs::write(harness.notification_path(), "connected 10.0.0.1:4000\n")?;

    let mut channel = NotificationChannel::create(harness.notification_path(), Duration::from_millis(25)).await?;
    let err = channel.next_line(Duration::from_millis(300)).await.unwrap_err();
    assert!(err.is_timeout(), "{err}");

    let mut ctx = ScenarioContext::before(harness.config.clone()).await?;
    let server = ctx.start_running_server().await?;
    harness.wait_until_listening(&server).await?;

    ctx.open_connection().await?;
    ctx.expect_notification("^connected 127\\.0\\.0\\.1:").await?;

    ctx.after().await;
    Ok(())
}

/// Waiting for the server through its ready line leaves no client behind
#[tokio::test]
async fn test_wait_for_server_does_not_connect() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut harness = MockServerHarness::new()?;
    harness.config.notification_timeout = Duration::from_millis(300);
    let mut ctx = ScenarioContext::before(harness.config.clone()).await?;

    ctx.start_running_server().await?;
    ctx.wait_for_server().await?;

    let err = ctx.expect_notification(".*").await.unwrap_err();
    assert!(err.is_timeout(), "{err}");

    ctx.open_connection().await?;
    ctx.expect_notification("^connected 127\\.0\\.0\\.1:").await?;

    ctx.after().await;
    Ok(())
}

/// Without a ready pattern the port probe is seen as a client
#[tokio::test]
async fn test_wait_for_server_probe_is_visible_without_ready_pattern() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut harness = MockServerHarness::new()?;
    harness.config.ready_pattern = None;
    let mut ctx = ScenarioContext::before(harness.config.clone()).await?;

    ctx.start_running_server().await?;
    ctx.wait_for_server().await?;

    ctx.expect_notification("^connected ").await?;
    ctx.expect_notification("^disconnected ").await?;

    ctx.after().await;
    Ok(())
}
