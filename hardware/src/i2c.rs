//! I2C bus capability.
//!
//! Implementations serialise access internally; callers never hold a bus for
//! longer than a single transaction.

use thiserror::Error;

/// 7-bit device address.
pub type I2cAddress = u8;

/// Transaction failure reported by a bus controller.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2cError {
    #[error("device did not acknowledge")]
    Nack,

    #[error("bus error")]
    BusError,

    #[error("arbitration lost")]
    ArbitrationLost,

    #[error("transaction timed out")]
    Timeout,

    #[error("clock line latched low")]
    ClockLatched,

    #[error("clock line was already latched")]
    ClockAlreadyLatched,

    #[error("bus failure")]
    Failure,
}

/// Byte-level access to devices on one bus.
pub trait I2cBus: Send + Sync {
    /// Write `data` to the device at `address`.
    fn write(&self, address: I2cAddress, data: &[u8]) -> Result<(), I2cError>;

    /// Write `data`, then read `response.len()` bytes in the same transaction.
    fn write_read(
        &self,
        address: I2cAddress,
        data: &[u8],
        response: &mut [u8],
    ) -> Result<(), I2cError>;
}
