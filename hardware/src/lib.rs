//! Peripheral capabilities and drivers for the on-board computer.
//!
//! The mission core never talks to a bus directly. It consumes the
//! capability traits defined here ([`i2c::I2cBus`], [`antenna::AntennaDriver`],
//! [`power::PowerControl`], [`fram::Fram`], [`rtc::Rtc`]) and every driver
//! reports transaction outcomes into the shared FDIR counters in
//! [`error_counter`].
//!
//! # Features
//!
//! ## Individual Drivers
//! - `antenna` - antenna deployment miniport over I2C
//! - `fram` - triple-redundant FRAM with byte-wise majority voting
//!
//! ## Convenience Features
//! - `mock` - scriptable test doubles for every capability
//! - `ci-testable` - drivers and doubles with unit tests runnable in CI

pub mod checksum;
pub mod error;
pub mod error_counter;
pub mod i2c;
pub mod power;
pub mod rtc;

#[cfg(feature = "antenna")]
pub mod antenna;

#[cfg(feature = "fram")]
pub mod fram;

#[cfg(feature = "mock")]
pub mod mock;

pub use error::{DeviceError, DeviceResult};
pub use error_counter::{Device, ErrorCounting, ErrorPolicy, ErrorReporter, LimitHandler};
