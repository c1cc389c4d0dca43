//! Modbus TCP transport for coil exchanges.
//!
//! [`CoilTransport`] is the narrow contract the session needs: read a run
//! of coils, write one coil, discard stale inbound data, close.
//! [`TcpTransport`] implements it with `tokio-modbus`.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_modbus::client::{Client, Context};
use tokio_modbus::prelude::*;
use tokio_modbus::{Request, Response};
use tracing::{debug, info, trace};

/// Log target for request/response tracing, enabled by `--verbose`.
pub const WIRE_TARGET: &str = "coilterm::wire";

/// Error type for transport operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Modbus exception: {0}")]
    Exception(String),
    #[error("Unexpected response: {0}")]
    Protocol(String),
    #[error("Connection is closed")]
    Closed,
}

/// Operations a coil session performs against a remote unit.
///
/// Addresses are zero-based protocol addresses.
pub trait CoilTransport {
    /// Read `count` consecutive coils starting at `address`.
    fn read_coils(
        &mut self,
        address: u16,
        count: u16,
    ) -> impl Future<Output = Result<Vec<bool>, TransportError>>;

    /// Write a single coil.
    fn write_coil(
        &mut self,
        address: u16,
        value: bool,
    ) -> impl Future<Output = Result<(), TransportError>>;

    /// Discard inbound data nobody is waiting for, so the next response
    /// cannot be matched against a leftover frame.
    fn flush(&mut self) -> impl Future<Output = Result<(), TransportError>>;

    /// Gracefully close the connection.
    fn close(&mut self) -> impl Future<Output = Result<(), TransportError>>;
}

/// Connection settings for a Modbus TCP unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSettings {
    /// Dotted-quad address or hostname.
    pub host: String,
    pub port: u16,
    /// Modbus unit identifier.
    pub unit_id: u8,
    /// Deadline for connecting and for every request/response exchange.
    pub timeout: Duration,
}

impl TcpSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id: 255,
            timeout: Duration::from_secs(1),
        }
    }

    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `host:port` for display and logging.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Modbus TCP client connection.
pub struct TcpTransport {
    ctx: Context,
    discard: Arc<AtomicBool>,
    timeout: Duration,
    endpoint: String,
}

impl TcpTransport {
    /// Connect to the unit, bounded by the configured timeout.
    pub async fn connect(settings: &TcpSettings) -> Result<Self, TransportError> {
        let endpoint = settings.endpoint();
        debug!(target: WIRE_TARGET, %endpoint, "Opening TCP connection");

        let stream = tokio::time::timeout(
            settings.timeout,
            TcpStream::connect((settings.host.as_str(), settings.port)),
        )
        .await
        .map_err(|_| TransportError::Connection("Connection timeout".to_string()))?
        .map_err(|e| TransportError::Connection(e.to_string()))?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(%endpoint, "Failed to set TCP_NODELAY: {}", e);
        }

        let discard = Arc::new(AtomicBool::new(false));
        let stream = DrainingStream {
            inner: stream,
            discard: discard.clone(),
        };
        let ctx = tcp::attach_slave(stream, Slave(settings.unit_id));

        info!(%endpoint, unit_id = settings.unit_id, "Connected to Modbus unit");

        Ok(Self {
            ctx,
            discard,
            timeout: settings.timeout,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl CoilTransport for TcpTransport {
    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>, TransportError> {
        debug!(target: WIRE_TARGET, address, count, "-> read coils");

        // Raw call: the client's read helpers assert on short payloads
        let request = self.ctx.call(Request::ReadCoils(address, count));
        let mut coils = match bounded(self.timeout, request).await? {
            Response::ReadCoils(coils) => coils,
            other => return Err(unexpected(other)),
        };

        // Payload is padded to whole bytes
        if coils.len() < count as usize {
            return Err(TransportError::Protocol(format!(
                "expected {} coils, got {}",
                count,
                coils.len()
            )));
        }
        coils.truncate(count as usize);

        debug!(target: WIRE_TARGET, address, ?coils, "<- read coils");
        Ok(coils)
    }

    async fn write_coil(&mut self, address: u16, value: bool) -> Result<(), TransportError> {
        debug!(target: WIRE_TARGET, address, value, "-> write coil");

        let request = self.ctx.call(Request::WriteSingleCoil(address, value));
        match bounded(self.timeout, request).await? {
            Response::WriteSingleCoil(echo_address, echo_value)
                if echo_address == address && echo_value == value => {}
            Response::WriteSingleCoil(echo_address, echo_value) => {
                return Err(TransportError::Protocol(format!(
                    "write echo mismatch: sent coil {} = {}, got coil {} = {}",
                    address, value, echo_address, echo_value
                )));
            }
            other => return Err(unexpected(other)),
        }

        debug!(target: WIRE_TARGET, address, value, "<- write coil");
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        // Draining happens on the next outbound write. Yield first so the
        // reactor sees bytes that arrived while we blocked on operator input.
        self.discard.store(true, Ordering::Release);
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.ctx.disconnect())
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(|e| TransportError::Io(e.to_string()))?;

        info!(endpoint = %self.endpoint, "Disconnected from Modbus unit");
        Ok(())
    }
}

/// Run one request/response exchange under the response deadline.
async fn bounded<T>(
    timeout: Duration,
    request: impl Future<Output = tokio_modbus::Result<T>>,
) -> Result<T, TransportError> {
    tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| TransportError::Timeout(timeout))?
        .map_err(|e| TransportError::Io(e.to_string()))?
        .map_err(|e| TransportError::Exception(format!("{:?}", e)))
}

fn unexpected(response: Response) -> TransportError {
    TransportError::Protocol(format!("{:?}", response))
}

/// TCP stream that can throw away unread bytes before its next write.
///
/// The Modbus client owns the stream, so the discard request is passed in
/// through a shared flag.
#[derive(Debug)]
struct DrainingStream {
    inner: TcpStream,
    discard: Arc<AtomicBool>,
}

impl DrainingStream {
    /// Read and drop everything already buffered by the kernel without
    /// waiting for more. Returns the number of bytes dropped.
    fn drain_pending(&self) -> io::Result<usize> {
        let mut scratch = [0u8; 512];
        let mut dropped = 0;

        loop {
            match self.inner.try_read(&mut scratch) {
                // Peer closed; the next exchange will report it.
                Ok(0) => break,
                Ok(n) => dropped += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        Ok(dropped)
    }
}

impl AsyncRead for DrainingStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for DrainingStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.discard.swap(false, Ordering::AcqRel) {
            match this.drain_pending() {
                Ok(0) => {}
                Ok(dropped) => {
                    debug!(target: WIRE_TARGET, dropped, "Discarded stale inbound bytes");
                }
                Err(e) => return Poll::Ready(Err(e)),
            }
        }

        trace!(target: WIRE_TARGET, bytes = buf.len(), "write");
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
