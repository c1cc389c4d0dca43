//! Coil session: one connection to a Modbus unit and the coil operations
//! performed over it.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::address::{CoilAddress, CoilRange, CoilValue, InvalidValue, RangeError};
use crate::transport::{CoilTransport, TcpSettings, TcpTransport, TransportError};

/// Delay between a coil write and its confirmation read.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Error type for session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    InvalidRange(#[from] RangeError),
    /// Raised by callers converting raw input with `CoilValue::try_from(n)?`;
    /// the session itself only accepts typed values.
    #[error(transparent)]
    InvalidValue(#[from] InvalidValue),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Tunables for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Pause between a write and its confirmation read, letting the unit
    /// apply the new value.
    pub settle_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

/// Connection lifecycle. A session only exists once connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Closed,
}

/// Result of a single coil write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub address: CoilAddress,
    pub written: CoilValue,
    /// Value read back after the write, `None` when the confirmation read
    /// failed. A failed confirmation does not undo the write.
    pub confirmed: Option<CoilValue>,
}

/// A session exclusively owning its transport.
pub struct CoilSession<T: CoilTransport> {
    transport: T,
    options: SessionOptions,
    state: SessionState,
}

impl CoilSession<TcpTransport> {
    /// Connect to a Modbus TCP unit.
    pub async fn connect(
        settings: &TcpSettings,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let transport = TcpTransport::connect(settings).await?;
        Ok(Self::new(transport, options))
    }
}

impl<T: CoilTransport> CoilSession<T> {
    /// Wrap an already connected transport.
    pub fn new(transport: T, options: SessionOptions) -> Self {
        Self {
            transport,
            options,
            state: SessionState::Connected,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Read `count` consecutive coils starting at the 1-based `start`.
    ///
    /// The range is validated before anything is sent; on success the
    /// result holds exactly `count` values in ascending address order.
    pub async fn read_coils(
        &mut self,
        start: i64,
        count: i64,
    ) -> Result<Vec<CoilValue>, SessionError> {
        let range = CoilRange::new(start, count)?;
        self.ensure_connected()?;

        let coils = self
            .transport
            .read_coils(range.start().protocol(), range.count())
            .await?;

        debug!(start = %range.start(), count = range.count(), "Read coils");
        Ok(coils.into_iter().map(CoilValue::from).collect())
    }

    /// Write one coil at the 1-based `address` and read it back.
    ///
    /// Stale inbound data is discarded before the write. The confirmation
    /// read runs after the configured settle delay; its failure is logged
    /// and reported as `confirmed: None`.
    pub async fn write_coil(
        &mut self,
        address: i64,
        value: CoilValue,
    ) -> Result<WriteOutcome, SessionError> {
        let address = CoilAddress::new(address)?;
        self.ensure_connected()?;

        self.transport.flush().await?;
        self.transport
            .write_coil(address.protocol(), value.into())
            .await?;
        info!(%address, %value, "Coil written");

        if !self.options.settle_delay.is_zero() {
            tokio::time::sleep(self.options.settle_delay).await;
        }

        let confirmed = match self.transport.read_coils(address.protocol(), 1).await {
            Ok(coils) => coils.first().copied().map(CoilValue::from),
            Err(e) => {
                warn!(%address, "Confirmation read failed: {}", e);
                None
            }
        };

        Ok(WriteOutcome {
            address,
            written: value,
            confirmed,
        })
    }

    /// Close the connection. Closing an already closed session is a no-op.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        // Released even when the graceful close fails
        self.state = SessionState::Closed;
        self.transport.close().await?;
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        match self.state {
            SessionState::Connected => Ok(()),
            SessionState::Closed => Err(TransportError::Closed),
        }
    }
}

impl<T: CoilTransport> Drop for CoilSession<T> {
    fn drop(&mut self) {
        if self.state == SessionState::Connected {
            debug!("Session dropped without close, releasing connection");
        }
    }
}
