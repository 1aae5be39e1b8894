type Result<T> = color_eyre::eyre::Result<T>;

mod cli;

use clap::Parser;
use eyre::eyre;
use std::io::Write;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Command, Config};
use yarrr_harness::{
    smoke, FramedConnection, HarnessConfig, HarnessError, ModelExtractor, ProcessSpec, ProcessSupervisor,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli(cli)?;

    match config.command {
        Command::Smoke => run_smoke(config.harness).await,
        Command::Run {
            timeout_ms,
            program,
            args,
        } => run_process(config.harness, program, args, Duration::from_millis(timeout_ms)).await,
        Command::Send { raw, payload } => send(config.harness, raw, payload.as_bytes()).await,
        Command::ExtractModel { endpoint } => extract_model(config.harness, &endpoint).await,
    }
}

async fn run_smoke(config: HarnessConfig) -> Result<()> {
    info!("Running smoke scenario against {}", config.server.program);
    let outcome = smoke::run(config).await?;

    match outcome.failure {
        None => {
            println!("smoke scenario passed");
            Ok(())
        }
        Some(failure) => {
            eprint!("{}", failure.report());
            Err(eyre!("smoke scenario failed at step `{}`", failure.step))
        }
    }
}

async fn run_process(config: HarnessConfig, program: String, args: Vec<String>, limit: Duration) -> Result<()> {
    let mut supervisor = ProcessSupervisor::new(config.startup_settle, config.teardown_grace);
    let handle = supervisor.launch(ProcessSpec::new(program).args(args)).await?;

    let exited = match handle.wait_for_exit(limit).await {
        Ok(status) => status,
        Err(HarnessError::Timeout { .. }) => {
            info!("{} still running after {:?}, killing it", handle.spec(), limit);
            None
        }
        Err(e) => return Err(e.into()),
    };
    supervisor.teardown_all().await;

    std::io::stdout().write_all(&handle.output_bytes())?;
    match exited {
        Some(status) if !status.success() => Err(eyre!("{} exited with {}", handle.spec(), status)),
        _ => Ok(()),
    }
}

async fn send(config: HarnessConfig, raw: bool, payload: &[u8]) -> Result<()> {
    let mut connection = FramedConnection::connect(&config.host, config.server_port, config.receive_timeout).await?;
    if raw {
        connection.send_raw(payload).await?;
    } else {
        connection.send_framed(payload).await?;
    }

    match connection.expect_open_for(config.settle_delay).await {
        Ok(()) => println!("connection to {} still open", connection.peer()),
        Err(HarnessError::ConnectionClosed) => println!("{} closed the connection", connection.peer()),
        Err(e) => return Err(e.into()),
    }
    connection.close().await;
    Ok(())
}

async fn extract_model(config: HarnessConfig, endpoint: &str) -> Result<()> {
    let model = ModelExtractor::new(config.model_remote, endpoint, config.readiness_timeout)
        .extract_model()
        .await?;
    std::io::stdout().write_all(&model)?;
    Ok(())
}
