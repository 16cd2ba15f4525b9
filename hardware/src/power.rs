//! Power control capability.
//!
//! Implemented by the EPS driver. The mission core uses it to reboot the
//! satellite when FDIR escalates, to fire the sail burn circuitry and to
//! switch antenna controllers and cameras.

use crate::error::DeviceResult;

/// Which of the two redundant burn/knife circuits to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurnCircuit {
    Main,
    Redundant,
}

/// Sail burn switch selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurnSwitch {
    Sail,
}

/// Camera power rail selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Camera {
    Nadir,
    Wing,
}

pub trait PowerControl: Send + Sync {
    /// Request a full power cycle. On real hardware this does not return.
    fn power_cycle(&self);

    fn enable_burn_switch(&self, circuit: BurnCircuit, switch: BurnSwitch) -> DeviceResult<()>;

    fn thermal_knife(&self, circuit: BurnCircuit, enable: bool) -> DeviceResult<()>;

    fn primary_antenna_power(&self, enable: bool) -> DeviceResult<()>;

    fn backup_antenna_power(&self, enable: bool) -> DeviceResult<()>;

    fn camera_power(&self, camera: Camera, enable: bool) -> DeviceResult<()>;
}
