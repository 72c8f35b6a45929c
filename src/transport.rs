//! SCPI transport layer.
//!
//! Both analyzers speak line-terminated ASCII SCPI over a raw TCP instrument
//! socket. The drivers only ever need two operations, so the transport seam
//! is the small [`Transport`] trait; production code uses [`ScpiSocket`] and
//! tests substitute in-process mocks or duplex streams.
//!
//! The stream is type-erased behind `Box<dyn InstrumentIO>` so the same
//! read/write path serves `tokio::net::TcpStream` and
//! `tokio::io::DuplexStream` test peers.

use crate::error::{InstrumentError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Trait alias for async instrument I/O.
///
/// Any `AsyncRead + AsyncWrite + Unpin + Send` type qualifies: a TCP stream
/// to the instrument, or a duplex stream in tests.
pub trait InstrumentIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> InstrumentIO for T {}

/// Type-erased boxed instrument stream.
pub type DynStream = Box<dyn InstrumentIO>;

type SharedStream = Arc<Mutex<BufReader<DynStream>>>;

/// Command/query interface the acquisition engines call into.
///
/// # Contract
/// - `write` sends one command line, no response expected.
/// - `query` sends one command line and reads back one line-delimited
///   response, trimmed of the terminator and surrounding whitespace.
/// - Implementations serialize wire access internally so `&self` methods are
///   safe to call from one logical acquisition at a time; concurrent
///   acquisitions against the same instrument are the caller's problem.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a command, expecting no response.
    async fn write(&self, command: &str) -> Result<()>;

    /// Send a query and read back one response line.
    async fn query(&self, command: &str) -> Result<String>;
}

/// Line-terminated SCPI connection over a TCP instrument socket.
///
/// Owns the stream exclusively: one socket per driver instance, torn down
/// when the driver is dropped.
pub struct ScpiSocket {
    stream: SharedStream,
    timeout: Duration,
}

impl ScpiSocket {
    /// Connect to an instrument socket address (e.g. `"192.168.1.20:5025"`).
    ///
    /// The same `timeout` bounds connection establishment and every
    /// subsequent response read.
    pub async fn connect(address: &str, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| InstrumentError::Timeout { waited: timeout })??;
        tracing::info!(%address, "connected to instrument socket");
        Ok(Self::from_stream(Box::new(stream), timeout))
    }

    /// Wrap an already-open stream. Used by tests with duplex peers.
    pub fn from_stream(stream: DynStream, timeout: Duration) -> Self {
        Self {
            stream: Arc::new(Mutex::new(BufReader::new(stream))),
            timeout,
        }
    }
}

#[async_trait]
impl Transport for ScpiSocket {
    async fn write(&self, command: &str) -> Result<()> {
        let mut guard = self.stream.lock().await;
        let line = format!("{}\n", command);
        let writer = guard.get_mut();
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        tracing::debug!(cmd = %command, "scpi write");
        Ok(())
    }

    async fn query(&self, command: &str) -> Result<String> {
        let mut guard = self.stream.lock().await;
        let line = format!("{}\n", command);
        let writer = guard.get_mut();
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;

        let mut response = String::new();
        let n = tokio::time::timeout(self.timeout, guard.read_line(&mut response))
            .await
            .map_err(|_| InstrumentError::Timeout {
                waited: self.timeout,
            })??;
        if n == 0 {
            return Err(InstrumentError::Transport(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "instrument closed the connection",
            )));
        }
        let response = response.trim().to_string();
        tracing::debug!(cmd = %command, resp = %response, "scpi query");
        Ok(response)
    }
}

/// Typed-query helpers shared by both drivers.
#[async_trait]
pub(crate) trait TransportExt: Transport {
    async fn query_f64(&self, command: &str) -> Result<f64> {
        let response = self.query(command).await?;
        response.trim().parse::<f64>().map_err(|_| {
            InstrumentError::format(format!(
                "expected a number in reply to {:?}, got {:?}",
                command, response
            ))
        })
    }

    async fn query_i64(&self, command: &str) -> Result<i64> {
        let response = self.query(command).await?;
        response.trim().parse::<i64>().map_err(|_| {
            InstrumentError::format(format!(
                "expected an integer in reply to {:?}, got {:?}",
                command, response
            ))
        })
    }

    /// Query a binary state reported as `1`/`0`.
    ///
    /// Anything else is outside the closed reply set and rejected.
    async fn query_on_off(&self, command: &str) -> Result<bool> {
        let response = self.query(command).await?;
        match response.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(InstrumentError::invalid(format!(
                "state reply to {:?} must be 0 or 1, got {:?}",
                command, other
            ))),
        }
    }
}

impl<T: Transport + ?Sized> TransportExt for T {}
