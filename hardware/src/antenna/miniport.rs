//! I2C command codec for the antenna deployment controllers.
//!
//! Every command is a single opcode byte, optionally followed by a timeout in
//! whole seconds. Queries are write-read transactions returning one or two
//! bytes.
//!
//! ## Deployment status word
//!
//! Little-endian, active-low deployment switches:
//!
//! | Antenna | Deployed (bit clear) | Burning (bit set) |
//! |---------|----------------------|-------------------|
//! | 1       | 15                   | 13                |
//! | 2       | 11                   | 9                 |
//! | 3       | 7                    | 5                 |
//! | 4       | 3                    | 1                 |
//!
//! Bit 8 reports ignored switches, bit 0 the armed state, and bit 12 marks a
//! reading the controller itself considers invalid.

use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use tracing::{debug, warn};

use super::{AntennaChannel, AntennaDeploymentStatus, AntennaDriver, AntennaId, ANTENNA_COUNT};
use crate::error::{DeviceError, DeviceResult};
use crate::error_counter::{ErrorCounting, ErrorReporter};
use crate::i2c::I2cBus;

/// Controller opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    DeployAntenna = 0xa0,
    StartAutomaticDeployment = 0xa5,
    CancelDeployment = 0xa9,
    Reset = 0xaa,
    Disarm = 0xac,
    Arm = 0xad,
    QueryActivationCount = 0xaf,
    QueryActivationTime = 0xb3,
    DeployAntennaOverride = 0xb9,
    QueryTemperature = 0xc0,
    QueryDeploymentStatus = 0xc3,
}

impl Command {
    pub const fn opcode(self) -> u8 {
        self as u8
    }
}

/// Opcode distance between a deploy and its switch-override variant.
const OVERRIDE_OFFSET: u8 =
    Command::DeployAntennaOverride.opcode() - Command::DeployAntenna.opcode();

/// Resolution of the activation time counter.
const ACTIVATION_TIME_UNIT: Duration = Duration::from_millis(50);

bitflags! {
    /// Raw deployment status word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusWord: u16 {
        const ANTENNA1_NOT_DEPLOYED = 1 << 15;
        const ANTENNA1_ACTIVE = 1 << 13;
        const OUT_OF_RANGE = 1 << 12;
        const ANTENNA2_NOT_DEPLOYED = 1 << 11;
        const ANTENNA2_ACTIVE = 1 << 9;
        const IGNORING_SWITCHES = 1 << 8;
        const ANTENNA3_NOT_DEPLOYED = 1 << 7;
        const ANTENNA3_ACTIVE = 1 << 5;
        const ANTENNA4_NOT_DEPLOYED = 1 << 3;
        const ANTENNA4_ACTIVE = 1 << 1;
        const ARMED = 1 << 0;
    }
}

const NOT_DEPLOYED: [StatusWord; ANTENNA_COUNT] = [
    StatusWord::ANTENNA1_NOT_DEPLOYED,
    StatusWord::ANTENNA2_NOT_DEPLOYED,
    StatusWord::ANTENNA3_NOT_DEPLOYED,
    StatusWord::ANTENNA4_NOT_DEPLOYED,
];

const ACTIVE: [StatusWord; ANTENNA_COUNT] = [
    StatusWord::ANTENNA1_ACTIVE,
    StatusWord::ANTENNA2_ACTIVE,
    StatusWord::ANTENNA3_ACTIVE,
    StatusWord::ANTENNA4_ACTIVE,
];

/// Opcode for deploying `antenna`, with or without switch override.
pub fn deploy_opcode(antenna: AntennaId, override_switches: bool) -> u8 {
    let offset = if override_switches { OVERRIDE_OFFSET } else { 0 };
    Command::DeployAntenna.opcode() + antenna.code() + offset
}

/// Decode a raw status word.
///
/// # Errors
///
/// Returns [`DeviceError::OutOfRange`] if the controller flagged the reading.
pub fn decode_status(raw: u16) -> DeviceResult<AntennaDeploymentStatus> {
    let word = StatusWord::from_bits_retain(raw);
    if word.contains(StatusWord::OUT_OF_RANGE) {
        return Err(DeviceError::OutOfRange);
    }

    Ok(AntennaDeploymentStatus {
        deployment_status: NOT_DEPLOYED.map(|bit| !word.contains(bit)),
        is_deployment_active: ACTIVE.map(|bit| word.contains(bit)),
        ignoring_deployment_switches: word.contains(StatusWord::IGNORING_SWITCHES),
        deployment_system_armed: word.contains(StatusWord::ARMED),
    })
}

fn timeout_seconds(timeout: Duration) -> u8 {
    timeout.as_secs().min(u8::MAX as u64) as u8
}

/// Antenna driver speaking the controller protocol over an I2C bus.
///
/// Every transaction reports into the FDIR counter of its channel.
pub struct MiniportAntennaDriver {
    bus: Arc<dyn I2cBus>,
    errors: Arc<ErrorCounting>,
}

impl MiniportAntennaDriver {
    pub fn new(bus: Arc<dyn I2cBus>, errors: Arc<ErrorCounting>) -> Self {
        Self { bus, errors }
    }

    fn send(&self, channel: AntennaChannel, payload: &[u8]) -> DeviceResult<()> {
        let mut reporter = self.errors.reporter(channel.device());
        let result = self.bus.write(channel.address(), payload);
        if let Err(e) = result {
            warn!("Unable to send command {:#04x} to {channel:?}: {e}", payload[0]);
        }
        reporter.track(result.map_err(DeviceError::from))
    }

    /// Write-read transaction. The caller owns the reporter so that decoding
    /// the response counts as part of the same transaction.
    fn query(
        &self,
        reporter: &mut ErrorReporter<'_>,
        channel: AntennaChannel,
        opcode: u8,
        response: &mut [u8],
    ) -> DeviceResult<()> {
        let result = self.bus.write_read(channel.address(), &[opcode], response);
        if let Err(e) = result {
            warn!("Unable to query {opcode:#04x} from {channel:?}: {e}");
        }
        reporter.track(result.map_err(DeviceError::from))
    }

    /// Number of burn activations recorded for one antenna.
    pub fn activation_count(
        &self,
        channel: AntennaChannel,
        antenna: AntennaId,
    ) -> DeviceResult<u8> {
        let mut reporter = self.errors.reporter(channel.device());
        let mut response = [0u8; 1];
        self.query(
            &mut reporter,
            channel,
            Command::QueryActivationCount.opcode() + antenna.code(),
            &mut response,
        )?;
        Ok(response[0])
    }

    /// Cumulative burn time of one antenna.
    pub fn activation_time(
        &self,
        channel: AntennaChannel,
        antenna: AntennaId,
    ) -> DeviceResult<Duration> {
        let mut reporter = self.errors.reporter(channel.device());
        let mut response = [0u8; 2];
        self.query(
            &mut reporter,
            channel,
            Command::QueryActivationTime.opcode() + antenna.code(),
            &mut response,
        )?;
        Ok(ACTIVATION_TIME_UNIT * u32::from(u16::from_be_bytes(response)))
    }

    /// Raw 10-bit controller temperature reading.
    pub fn temperature(&self, channel: AntennaChannel) -> DeviceResult<u16> {
        let mut reporter = self.errors.reporter(channel.device());
        let mut response = [0u8; 2];
        self.query(
            &mut reporter,
            channel,
            Command::QueryTemperature.opcode(),
            &mut response,
        )?;

        let value = u16::from_be_bytes(response);
        if value & 0xfc00 != 0 {
            warn!("{channel:?} antenna temperature out of range: {value}");
            reporter.failure();
            return Err(DeviceError::OutOfRange);
        }
        Ok(value & 0x3ff)
    }
}

impl AntennaDriver for MiniportAntennaDriver {
    fn reset(&self, channel: AntennaChannel) -> DeviceResult<()> {
        self.send(channel, &[Command::Reset.opcode()])
    }

    fn arm(&self, channel: AntennaChannel) -> DeviceResult<()> {
        self.send(channel, &[Command::Arm.opcode()])
    }

    fn disarm(&self, channel: AntennaChannel) -> DeviceResult<()> {
        self.send(channel, &[Command::Disarm.opcode()])
    }

    fn deploy(
        &self,
        channel: AntennaChannel,
        antenna: AntennaId,
        timeout: Duration,
        override_switches: bool,
    ) -> DeviceResult<()> {
        debug!("Deploying {antenna:?} on {channel:?} (override: {override_switches})");
        self.send(
            channel,
            &[deploy_opcode(antenna, override_switches), timeout_seconds(timeout)],
        )
    }

    fn start_auto_deployment(
        &self,
        channel: AntennaChannel,
        timeout: Duration,
    ) -> DeviceResult<()> {
        self.send(
            channel,
            &[
                Command::StartAutomaticDeployment.opcode(),
                timeout_seconds(timeout),
            ],
        )
    }

    fn cancel_deployment(&self, channel: AntennaChannel) -> DeviceResult<()> {
        self.send(channel, &[Command::CancelDeployment.opcode()])
    }

    fn get_status(&self, channel: AntennaChannel) -> DeviceResult<AntennaDeploymentStatus> {
        let mut reporter = self.errors.reporter(channel.device());
        let mut response = [0u8; 2];
        self.query(
            &mut reporter,
            channel,
            Command::QueryDeploymentStatus.opcode(),
            &mut response,
        )?;

        let raw = u16::from_le_bytes(response);
        reporter.track(decode_status(raw)).inspect_err(|_| {
            warn!("{channel:?} antenna deployment status out of range: {raw:#06x}");
        })
    }
}
