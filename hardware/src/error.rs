use thiserror::Error;

use crate::i2c::I2cError;

/// Driver-level failure surfaced to the mission core.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    #[error("I/O error")]
    Io,

    #[error("operation timed out")]
    Timeout,

    #[error("device reading out of range")]
    OutOfRange,

    #[error("unexpected device response")]
    Protocol,
}

pub type DeviceResult<T> = Result<T, DeviceError>;

impl From<I2cError> for DeviceError {
    fn from(error: I2cError) -> Self {
        match error {
            I2cError::Nack
            | I2cError::BusError
            | I2cError::ArbitrationLost
            | I2cError::ClockLatched
            | I2cError::Failure => DeviceError::Io,
            I2cError::Timeout => DeviceError::Timeout,
            I2cError::ClockAlreadyLatched => DeviceError::Protocol,
        }
    }
}
