use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::antenna::{AntennaChannel, AntennaDeploymentStatus, AntennaDriver, AntennaId};
use crate::error::{DeviceError, DeviceResult};

/// Driver operation recorded by [`MockAntennaDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AntennaCall {
    Reset(AntennaChannel),
    Arm(AntennaChannel),
    Disarm(AntennaChannel),
    Deploy {
        channel: AntennaChannel,
        antenna: AntennaId,
        timeout: Duration,
        override_switches: bool,
    },
    StartAuto {
        channel: AntennaChannel,
        timeout: Duration,
    },
    Cancel(AntennaChannel),
    GetStatus(AntennaChannel),
}

impl AntennaCall {
    pub fn is_query(&self) -> bool {
        matches!(self, AntennaCall::GetStatus(_))
    }
}

#[derive(Debug)]
struct ChannelScript {
    status: DeviceResult<AntennaDeploymentStatus>,
    command_error: Option<DeviceError>,
}

impl Default for ChannelScript {
    fn default() -> Self {
        Self {
            status: Ok(AntennaDeploymentStatus::default()),
            command_error: None,
        }
    }
}

#[derive(Debug, Default)]
struct DriverState {
    calls: Vec<AntennaCall>,
    primary: ChannelScript,
    backup: ChannelScript,
}

impl DriverState {
    fn channel(&mut self, channel: AntennaChannel) -> &mut ChannelScript {
        match channel {
            AntennaChannel::Primary => &mut self.primary,
            AntennaChannel::Backup => &mut self.backup,
        }
    }
}

/// Antenna driver with scripted status and command outcomes per channel.
#[derive(Debug, Default)]
pub struct MockAntennaDriver {
    state: Mutex<DriverState>,
}

impl MockAntennaDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status returned by subsequent `get_status` calls on `channel`.
    pub fn set_status(&self, channel: AntennaChannel, status: AntennaDeploymentStatus) {
        self.state().channel(channel).status = Ok(status);
    }

    /// Make `get_status` on `channel` fail.
    pub fn fail_status(&self, channel: AntennaChannel, error: DeviceError) {
        self.state().channel(channel).status = Err(error);
    }

    /// Make every command on `channel` fail, or succeed again with `None`.
    pub fn fail_commands(&self, channel: AntennaChannel, error: Option<DeviceError>) {
        self.state().channel(channel).command_error = error;
    }

    pub fn calls(&self) -> Vec<AntennaCall> {
        self.state().calls.clone()
    }

    /// Recorded calls without status queries.
    pub fn commands(&self) -> Vec<AntennaCall> {
        self.state()
            .calls
            .iter()
            .filter(|call| !call.is_query())
            .copied()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn state(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn command(&self, channel: AntennaChannel, call: AntennaCall) -> DeviceResult<()> {
        let mut state = self.state();
        state.calls.push(call);
        match state.channel(channel).command_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl AntennaDriver for MockAntennaDriver {
    fn reset(&self, channel: AntennaChannel) -> DeviceResult<()> {
        self.command(channel, AntennaCall::Reset(channel))
    }

    fn arm(&self, channel: AntennaChannel) -> DeviceResult<()> {
        self.command(channel, AntennaCall::Arm(channel))
    }

    fn disarm(&self, channel: AntennaChannel) -> DeviceResult<()> {
        self.command(channel, AntennaCall::Disarm(channel))
    }

    fn deploy(
        &self,
        channel: AntennaChannel,
        antenna: AntennaId,
        timeout: Duration,
        override_switches: bool,
    ) -> DeviceResult<()> {
        self.command(
            channel,
            AntennaCall::Deploy {
                channel,
                antenna,
                timeout,
                override_switches,
            },
        )
    }

    fn start_auto_deployment(
        &self,
        channel: AntennaChannel,
        timeout: Duration,
    ) -> DeviceResult<()> {
        self.command(channel, AntennaCall::StartAuto { channel, timeout })
    }

    fn cancel_deployment(&self, channel: AntennaChannel) -> DeviceResult<()> {
        self.command(channel, AntennaCall::Cancel(channel))
    }

    fn get_status(&self, channel: AntennaChannel) -> DeviceResult<AntennaDeploymentStatus> {
        let mut state = self.state();
        state.calls.push(AntennaCall::GetStatus(channel));
        state.channel(channel).status
    }
}
