use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpStream;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::{HarnessError, Result};

/// Asks the OS for a currently unused loopback TCP port.
///
/// The port is released before returning, so another process may grab it
/// first; good enough to run scenarios side by side.
pub fn reserve_free_port() -> Result<u16> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::LOCALHOST, 0)).into())?;

    let port = socket
        .local_addr()?
        .as_socket()
        .map(|addr| addr.port())
        .ok_or_else(|| std::io::Error::other("bound socket has no inet address"))?;

    debug!("Reserved free port {}", port);
    Ok(port)
}

/// Polls `host:port` until it accepts a connection.
///
/// This is the bounded poll-until-condition alternative to a fixed settle
/// delay after starting a server. The probe connection is closed at once.
pub async fn wait_for_listener(host: &str, port: u16, limit: Duration, interval: Duration) -> Result<()> {
    let deadline = Instant::now() + limit;
    loop {
        match TcpStream::connect((host, port)).await {
            Ok(_) => {
                debug!("{}:{} is accepting connections", host, port);
                return Ok(());
            }
            Err(e) => debug!("{}:{} not ready yet: {}", host, port, e),
        }
        if Instant::now() + interval > deadline {
            return Err(HarnessError::timeout(format!("a listener on {}:{}", host, port), limit));
        }
        sleep(interval).await;
    }
}
