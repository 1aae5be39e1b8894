use crate::integration::MockServerHarness;
use anyhow::Result;
use std::time::Duration;
use yarrr_harness::{HarnessError, KillOutcome, ProcessState, ScenarioContext};

/// Without parameters the server prints its usage text and exits
#[tokio::test]
async fn test_server_without_parameters_prints_usage() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = MockServerHarness::new()?;
    let mut ctx = ScenarioContext::before(harness.config.clone()).await?;

    let server = ctx.start_server_without_parameters().await?;
    let status = server.wait_for_exit(Duration::from_secs(5)).await?;

    assert!(!status.expect("server was launched").success());
    ctx.expect_usage_text()?;
    ctx.expect_server_not_running()?;
    assert_eq!(server.kill(), KillOutcome::NotRunning);

    let teardown = ctx.after().await;
    assert_eq!(teardown.already_stopped, 1);
    Ok(())
}

/// A running server reports its address and is killed at teardown
#[tokio::test]
async fn test_running_server_lifecycle() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = MockServerHarness::new()?;
    let port = harness.config.server_port;
    let mut ctx = ScenarioContext::before(harness.config.clone()).await?;

    let server = ctx.start_running_server().await?;
    harness.wait_until_listening(&server).await?;

    ctx.expect_server_running()?;
    ctx.expect_server_output(&format!("listening on 127.0.0.1:{}", port))?;
    assert!(server.pid().is_some());

    let teardown = ctx.after().await;
    assert_eq!(teardown.signalled, 1);
    assert_eq!(teardown.abandoned, 0);
    assert_eq!(server.state(), ProcessState::Stopped);
    assert!(!server.is_running());
    Ok(())
}

/// Killing twice: the second kill is a no-op
#[tokio::test]
async fn test_kill_is_idempotent() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = MockServerHarness::new()?;
    let mut ctx = ScenarioContext::before(harness.config.clone()).await?;

    let server = ctx.start_running_server().await?;
    ctx.wait_for_server().await?;

    assert_eq!(server.kill(), KillOutcome::Signalled);
    let status = server.wait_for_exit(Duration::from_secs(5)).await?;
    assert!(!status.expect("server was launched").success());
    ctx.expect_server_not_running()?;

    assert_eq!(server.kill(), KillOutcome::NotRunning);
    assert_eq!(server.kill(), KillOutcome::NotRunning);

    ctx.after().await;
    Ok(())
}

/// A server binary that does not exist never reaches the running state
#[tokio::test]
async fn test_missing_server_binary() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut harness = MockServerHarness::new()?;
    harness.config.server.program = "/nonexistent/yarrrserver".to_string();
    let mut ctx = ScenarioContext::before(harness.config.clone()).await?;

    let server = ctx.start_running_server().await?;

    let err = ctx.wait_for_server().await.unwrap_err();
    assert!(matches!(err, HarnessError::LaunchFailure { .. }), "{err}");
    assert!(server.output().contains("failed to launch /nonexistent/yarrrserver"));
    ctx.expect_server_not_running()?;

    ctx.after().await;
    Ok(())
}

/// Environment overlay given for the server reaches the process
#[tokio::test]
async fn test_server_environment_overlay() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut harness = MockServerHarness::new()?;
    harness.config.server.program = "sh".to_string();
    harness
        .config
        .server
        .environment
        .set("LUA_PATH", "/usr/share/lua/5.2/?.lua");
    let mut ctx = ScenarioContext::before(harness.config.clone()).await?;

    let server = ctx.start_server(["-c", "echo \"LUA_PATH=$LUA_PATH\""]).await?;
    server.wait_for_exit(Duration::from_secs(5)).await?;

    ctx.expect_server_output(r"LUA_PATH=/usr/share/lua/5\.2/\?\.lua")?;

    ctx.after().await;
    Ok(())
}
