//! Stand-in for `yarrrserver` used by the harness's own tests.
//!
//! Accepts framed messages, reports each one on stdout, and hangs up on
//! anything that does not decode as a frame of at most 64 KiB. Connection
//! events are appended to the notification file when `--notify` is given.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use futures::StreamExt;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use yarrr_harness::frame;

const MAX_FRAME_LEN: usize = 64 * 1024;
const USAGE: &str = "usage: yarrrserver --port <port> [--notify <path>]";

#[derive(Parser)]
#[command(name = "mock-yarrr-server", disable_help_flag = true)]
struct Args {
    /// Port to listen on; 0 picks a free one
    #[arg(long)]
    port: Option<u16>,

    /// File to append connection notifications to
    #[arg(long)]
    notify: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            println!("{}", USAGE);
            debug!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let Some(port) = args.port else {
        println!("{}", USAGE);
        return ExitCode::FAILURE;
    };

    let listener = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            println!("could not listen on port {}: {}", port, e);
            return ExitCode::FAILURE;
        }
    };
    match listener.local_addr() {
        Ok(addr) => println!("listening on {}", addr),
        Err(e) => warn!("no local address: {}", e),
    }

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(serve(stream, peer, args.notify.clone()));
            }
            Err(e) => warn!("accept failed: {}", e),
        }
    }
}

async fn serve(stream: TcpStream, peer: SocketAddr, notify: Option<PathBuf>) {
    println!("client connected from {}", peer);
    notify_line(notify.as_deref(), &format!("connected {}", peer)).await;

    let mut frames = FramedRead::new(stream, frame::codec_with_limit(MAX_FRAME_LEN));
    loop {
        match frames.next().await {
            Some(Ok(payload)) => {
                println!("frame {} bytes from {}", payload.len(), peer);
            }
            Some(Err(e)) => {
                println!("malformed input from {}, disconnecting: {}", peer, e);
                notify_line(notify.as_deref(), &format!("malformed {}", peer)).await;
                return;
            }
            None => {
                println!("client {} disconnected", peer);
                notify_line(notify.as_deref(), &format!("disconnected {}", peer)).await;
                return;
            }
        }
    }
}

async fn notify_line(path: Option<&Path>, line: &str) {
    let Some(path) = path else {
        return;
    };
    let written = async {
        let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await
    };
    if let Err(e) = written.await {
        warn!("could not write notification to {:?}: {}", path, e);
    }
}
