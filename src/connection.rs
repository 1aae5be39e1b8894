use std::io::ErrorKind;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use socket2::SockRef;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{Decoder, LengthDelimitedCodec};
use tracing::{debug, info};

use crate::error::{HarnessError, Result};
use crate::frame;

const READ_CHUNK: usize = 4096;

/// Result of a single read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(Bytes),
    /// No data is forthcoming: the connection was closed by either side.
    EndOfStream,
}

/// How the peer went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closure {
    /// FIN: an orderly end of stream.
    Orderly,
    /// RST: the peer dropped the connection, typically with unread input.
    Reset,
}

/// A TCP client connection to the server under test.
///
/// Besides raw and framed sends it can tell apart a peer that closed the
/// connection from one that is merely silent. Every blocking read is bounded
/// by the receive timeout.
#[derive(Debug)]
pub struct FramedConnection {
    peer: String,
    stream: Option<TcpStream>,
    peer_closed: bool,
    receive_timeout: Duration,
    codec: LengthDelimitedCodec,
    read_buf: BytesMut,
}

impl FramedConnection {
    /// Connects to `host:port`.
    ///
    /// # Errors
    /// * [`HarnessError::ConnectionRefused`] if nothing accepts the connection
    /// * [`HarnessError::Timeout`] if connecting takes longer than
    ///   `receive_timeout`
    pub async fn connect(host: &str, port: u16, receive_timeout: Duration) -> Result<Self> {
        let peer = format!("{}:{}", host, port);
        debug!("Connecting to {}", peer);

        let stream = match timeout(receive_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(HarnessError::ConnectionRefused { addr: peer, source }),
            Err(_) => return Err(HarnessError::timeout(format!("connection to {}", peer), receive_timeout)),
        };
        stream.set_nodelay(true)?;

        info!("Connected to {}", peer);
        Ok(Self {
            peer,
            stream: Some(stream),
            peer_closed: false,
            receive_timeout,
            codec: frame::codec(),
            read_buf: BytesMut::new(),
        })
    }

    /// Writes `bytes` verbatim, without framing.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        debug!("Sending {} raw bytes to {}", bytes.len(), self.peer);
        self.write(bytes).await
    }

    /// Writes `payload` as one length-prefixed frame.
    pub async fn send_framed(&mut self, payload: &[u8]) -> Result<()> {
        let frame = frame::encode(payload)?;
        debug!("Sending {}-byte frame to {}", payload.len(), self.peer);
        self.write(&frame).await
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.peer_closed {
            return Err(HarnessError::ConnectionClosed);
        }
        let stream = self.stream.as_mut().ok_or(HarnessError::ConnectionClosed)?;

        let written = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        };
        match written.await {
            Ok(()) => Ok(()),
            Err(e) if is_disconnect(&e) => {
                self.peer_closed = true;
                Err(HarnessError::ConnectionClosed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reads whatever arrives next, waiting at most the receive timeout.
    ///
    /// After either side has closed the connection this returns
    /// [`ReadOutcome::EndOfStream`] without touching the socket.
    pub async fn read(&mut self) -> Result<ReadOutcome> {
        if !self.read_buf.is_empty() {
            return Ok(ReadOutcome::Data(self.read_buf.split().freeze()));
        }
        match self.fill_read_buf().await? {
            0 => Ok(ReadOutcome::EndOfStream),
            _ => Ok(ReadOutcome::Data(self.read_buf.split().freeze())),
        }
    }

    /// Reads one frame sent by the peer; `None` at end of stream.
    pub async fn recv_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.read_buf)? {
                return Ok(Some(frame.freeze()));
            }
            if self.fill_read_buf().await? == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(HarnessError::Io(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("{} closed the connection inside a frame", self.peer),
                )));
            }
        }
    }

    /// Asserts the peer closes the connection.
    ///
    /// Both an orderly end of stream and a reset count as closed; data means
    /// the peer is still talking and silence past the receive timeout is a
    /// [`HarnessError::Timeout`]. After a local [`close`](Self::close) or
    /// [`abort`](Self::abort) the peer's side can no longer be observed, so
    /// this fails with [`HarnessError::ConnectionClosed`].
    pub async fn expect_closed(&mut self) -> Result<Closure> {
        if !self.read_buf.is_empty() {
            return Err(HarnessError::UnexpectedData {
                len: self.read_buf.len(),
            });
        }
        if self.peer_closed {
            return Ok(Closure::Orderly);
        }
        // Closed on our side only: there is no peer left to observe.
        let Some(stream) = self.stream.as_mut() else {
            return Err(HarnessError::ConnectionClosed);
        };

        let mut buf = [0u8; READ_CHUNK];
        match timeout(self.receive_timeout, stream.read(&mut buf)).await {
            Ok(Ok(0)) => {
                self.peer_closed = true;
                info!("{} closed the connection", self.peer);
                Ok(Closure::Orderly)
            }
            Ok(Ok(len)) => {
                self.read_buf.extend_from_slice(&buf[..len]);
                Err(HarnessError::UnexpectedData { len })
            }
            Ok(Err(e)) if is_disconnect(&e) => {
                self.peer_closed = true;
                info!("{} reset the connection", self.peer);
                Ok(Closure::Reset)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(HarnessError::timeout(
                format!("{} to close the connection", self.peer),
                self.receive_timeout,
            )),
        }
    }

    /// Asserts the peer keeps the connection open for `window`.
    ///
    /// Data arriving in the meantime is kept for the next read.
    pub async fn expect_open_for(&mut self, window: Duration) -> Result<()> {
        if self.peer_closed || self.stream.is_none() {
            return Err(HarnessError::ConnectionClosed);
        }
        let stream = self.stream.as_mut().ok_or(HarnessError::ConnectionClosed)?;

        let mut buf = [0u8; READ_CHUNK];
        match timeout(window, stream.read(&mut buf)).await {
            Err(_) => Ok(()),
            Ok(Ok(0)) => {
                self.peer_closed = true;
                Err(HarnessError::ConnectionClosed)
            }
            Ok(Ok(len)) => {
                self.read_buf.extend_from_slice(&buf[..len]);
                Ok(())
            }
            Ok(Err(e)) if is_disconnect(&e) => {
                self.peer_closed = true;
                Err(HarnessError::ConnectionClosed)
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }

    /// Shuts down the write half and releases the socket. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown of connection to {} failed: {}", self.peer, e);
            }
            info!("Closed connection to {}", self.peer);
        }
    }

    /// Drops the connection with a reset instead of an orderly close.
    pub fn abort(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = SockRef::from(&stream).set_linger(Some(Duration::ZERO)) {
                debug!("Could not set zero linger on connection to {}: {}", self.peer, e);
            }
            drop(stream);
            info!("Aborted connection to {}", self.peer);
        }
    }

    /// True until either side is known to have closed the connection.
    pub fn is_open(&self) -> bool {
        self.stream.is_some() && !self.peer_closed
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    async fn fill_read_buf(&mut self) -> Result<usize> {
        if self.peer_closed {
            return Ok(0);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(0);
        };

        let mut buf = [0u8; READ_CHUNK];
        let len = match timeout(self.receive_timeout, stream.read(&mut buf)).await {
            Ok(Ok(len)) => len,
            Ok(Err(e)) if is_disconnect(&e) => 0,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(HarnessError::timeout(
                    format!("data from {}", self.peer),
                    self.receive_timeout,
                ))
            }
        };

        if len == 0 {
            self.peer_closed = true;
        }
        self.read_buf.extend_from_slice(&buf[..len]);
        Ok(len)
    }
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
    )
}
