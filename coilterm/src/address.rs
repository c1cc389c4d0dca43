//! Coil addressing.
//!
//! Operators use 1-based addresses in `1..=9999`; the wire uses zero-based
//! addresses, so coil `n` travels as `n - 1`. Every coil touched by a
//! request must stay within protocol addresses `0..=9998`.

use std::fmt;

use thiserror::Error;

/// Lowest operator-facing coil address.
pub const MIN_ADDRESS: i64 = 1;

/// Highest operator-facing coil address.
pub const MAX_ADDRESS: i64 = 9999;

/// Largest coil count a single Modbus read may ask for.
///
/// Shown to the operator as guidance; requests are only bounded by
/// [`MAX_ADDRESS`].
pub const MAX_READ_COUNT: i64 = 2000;

/// Address or run length outside the addressable coil space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("Invalid address {0}: use values between 1-9999")]
    Address(i64),
    #[error("Invalid coil count {0}: must be at least 1")]
    Count(i64),
    #[error("Coils {start}..{end} exceed the last address 9999")]
    Overflow { start: i64, end: i64 },
}

/// Coil value other than 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid coil value {0}: use 0 or 1")]
pub struct InvalidValue(pub i64);

/// A validated, operator-facing (1-based) coil address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoilAddress(u16);

impl CoilAddress {
    /// Validate a 1-based address.
    pub fn new(address: i64) -> Result<Self, RangeError> {
        if !(MIN_ADDRESS..=MAX_ADDRESS).contains(&address) {
            return Err(RangeError::Address(address));
        }
        Ok(Self(address as u16))
    }

    /// The 1-based address as entered by the operator.
    pub fn get(self) -> u16 {
        self.0
    }

    /// The zero-based address sent on the wire.
    pub fn protocol(self) -> u16 {
        self.0 - 1
    }
}

impl fmt::Display for CoilAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A run of consecutive coils starting at a validated address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoilRange {
    start: CoilAddress,
    count: u16,
}

impl CoilRange {
    /// Validate a start address and run length.
    ///
    /// The address is checked first, so an out-of-range start is reported
    /// as [`RangeError::Address`] even when the count is also bad.
    pub fn new(start: i64, count: i64) -> Result<Self, RangeError> {
        let start = CoilAddress::new(start)?;
        if count < 1 {
            return Err(RangeError::Count(count));
        }

        let first = i64::from(start.protocol());
        let overflow = RangeError::Overflow {
            start: i64::from(start.get()),
            end: first.saturating_add(count),
        };
        if count > MAX_ADDRESS - first {
            return Err(overflow);
        }
        let count = u16::try_from(count).map_err(|_| overflow)?;

        Ok(Self { start, count })
    }

    pub fn start(&self) -> CoilAddress {
        self.start
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    /// Operator-facing addresses in ascending order.
    pub fn addresses(&self) -> impl Iterator<Item = u16> + use<> {
        let first = self.start.get();
        first..first + self.count
    }
}

/// Logical state of a single coil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoilValue {
    Off,
    On,
}

impl CoilValue {
    /// Numeric form, strictly 0 or 1.
    pub fn as_u8(self) -> u8 {
        match self {
            CoilValue::Off => 0,
            CoilValue::On => 1,
        }
    }
}

impl From<bool> for CoilValue {
    fn from(value: bool) -> Self {
        if value { CoilValue::On } else { CoilValue::Off }
    }
}

impl From<CoilValue> for bool {
    fn from(value: CoilValue) -> Self {
        value == CoilValue::On
    }
}

impl TryFrom<i64> for CoilValue {
    type Error = InvalidValue;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CoilValue::Off),
            1 => Ok(CoilValue::On),
            other => Err(InvalidValue(other)),
        }
    }
}

impl fmt::Display for CoilValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}
