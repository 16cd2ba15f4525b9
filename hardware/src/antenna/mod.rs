//! Antenna deployment hardware.
//!
//! The deployment system has two independent controllers ("channels") on the
//! system I2C bus. Each can arm the burn circuitry, deploy individual antennas
//! or run an automatic sequence over all four, and report per-antenna
//! deployment switches.
//!
//! # Modules
//!
//! - [`miniport`]: I2C command codec and FDIR-reporting driver.

pub mod miniport;

use std::time::Duration;

use crate::error::DeviceResult;
use crate::error_counter::Device;
use crate::i2c::I2cAddress;

pub use miniport::MiniportAntennaDriver;

/// Number of antennas on the spacecraft.
pub const ANTENNA_COUNT: usize = 4;

/// Antenna controller channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AntennaChannel {
    Primary,
    Backup,
}

impl AntennaChannel {
    /// Bus address of the controller.
    pub const fn address(self) -> I2cAddress {
        match self {
            AntennaChannel::Primary => 0x32,
            AntennaChannel::Backup => 0x34,
        }
    }

    /// FDIR counter the controller reports into.
    pub const fn device(self) -> Device {
        match self {
            AntennaChannel::Primary => Device::AntennaPrimary,
            AntennaChannel::Backup => Device::AntennaBackup,
        }
    }
}

/// Antenna selector. `Auto` addresses the automatic sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AntennaId {
    Auto = 0,
    Antenna1 = 1,
    Antenna2 = 2,
    Antenna3 = 3,
    Antenna4 = 4,
}

impl AntennaId {
    /// The four physical antennas, in order.
    pub const ALL: [AntennaId; ANTENNA_COUNT] = [
        AntennaId::Antenna1,
        AntennaId::Antenna2,
        AntennaId::Antenna3,
        AntennaId::Antenna4,
    ];

    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Zero-based slot in the status arrays. `None` for [`AntennaId::Auto`].
    pub const fn slot(self) -> Option<usize> {
        match self {
            AntennaId::Auto => None,
            other => Some(other as usize - 1),
        }
    }
}

/// Decoded deployment status of one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AntennaDeploymentStatus {
    /// Deployment switch of each antenna reports "deployed".
    pub deployment_status: [bool; ANTENNA_COUNT],
    /// Burn circuit of each antenna is currently active.
    pub is_deployment_active: [bool; ANTENNA_COUNT],
    pub ignoring_deployment_switches: bool,
    pub deployment_system_armed: bool,
}

impl AntennaDeploymentStatus {
    pub fn all_deployed(&self) -> bool {
        self.deployment_status.iter().all(|&deployed| deployed)
    }

    pub fn any_active(&self) -> bool {
        self.is_deployment_active.iter().any(|&active| active)
    }
}

/// Antenna controller operations consumed by the mission core.
pub trait AntennaDriver: Send + Sync {
    fn reset(&self, channel: AntennaChannel) -> DeviceResult<()>;

    fn arm(&self, channel: AntennaChannel) -> DeviceResult<()>;

    fn disarm(&self, channel: AntennaChannel) -> DeviceResult<()>;

    /// Deploy one antenna. With `override_switches` the controller keeps
    /// burning even if the deployment switch already reports deployed.
    fn deploy(
        &self,
        channel: AntennaChannel,
        antenna: AntennaId,
        timeout: Duration,
        override_switches: bool,
    ) -> DeviceResult<()>;

    /// Start the automatic sequence over all antennas.
    fn start_auto_deployment(&self, channel: AntennaChannel, timeout: Duration) -> DeviceResult<()>;

    fn cancel_deployment(&self, channel: AntennaChannel) -> DeviceResult<()>;

    fn get_status(&self, channel: AntennaChannel) -> DeviceResult<AntennaDeploymentStatus>;
}
