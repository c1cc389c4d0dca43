//! Interactive console for Modbus TCP coils.
//!
//! Connects to one Modbus TCP unit and lets an operator read a block of
//! coils or write a single coil and see the value read back.
//!
//! # Addressing
//!
//! Operators use 1-based coil addresses `1..=9999`. The wire address is
//! one lower:
//!
//! ```text
//! coil 1    -> protocol address 0
//! coil 9999 -> protocol address 9998
//! ```

pub mod address;
pub mod config;
pub mod console;
pub mod session;
pub mod transport;

pub use address::{CoilAddress, CoilRange, CoilValue, InvalidValue, RangeError};
pub use session::{CoilSession, SessionError, SessionOptions, SessionState, WriteOutcome};
pub use transport::{CoilTransport, TcpSettings, TcpTransport, TransportError};
