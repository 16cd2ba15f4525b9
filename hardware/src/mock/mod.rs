//! Test doubles for every hardware capability.
//!
//! Each double records what the code under test asked of it and can be
//! scripted to fail, so mission logic can be exercised without a bus.

mod antenna;
mod fram;
mod i2c;
mod power;
mod rtc;

pub use antenna::{AntennaCall, MockAntennaDriver};
pub use fram::MemoryFram;
pub use i2c::MockI2cBus;
pub use power::{MockPowerControl, PowerEvent};
pub use rtc::MockRtc;
