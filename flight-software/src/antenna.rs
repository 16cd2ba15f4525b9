//! Antenna deployment task.
//!
//! Walks a fixed plan over the primary controller and then the backup
//! controller: reset, arm, automatic deployment, one override deployment per
//! antenna, disarm. One step runs per mission pass. The step counter always
//! advances, whatever the hardware answered; a failed step is retried by the
//! matching step on the backup channel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hardware::antenna::{
    AntennaChannel, AntennaDeploymentStatus, AntennaDriver, AntennaId, ANTENNA_COUNT,
};
use hardware::DeviceResult;
use tracing::{debug, info, warn};

use crate::config::MissionConfig;
use crate::mission::{Action, ActionDescriptor, Update, UpdateDescriptor, UpdateResult};
use crate::persistent::{PersistentSettings, PersistentState};
use crate::state::SystemState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeploymentStep {
    Reset,
    Arm,
    AutoDeploy,
    ManualDeploy(AntennaId),
    Disarm,
}

const fn channel_plan(channel: AntennaChannel) -> [(AntennaChannel, DeploymentStep); 8] {
    [
        (channel, DeploymentStep::Reset),
        (channel, DeploymentStep::Arm),
        (channel, DeploymentStep::AutoDeploy),
        (channel, DeploymentStep::ManualDeploy(AntennaId::Antenna1)),
        (channel, DeploymentStep::ManualDeploy(AntennaId::Antenna2)),
        (channel, DeploymentStep::ManualDeploy(AntennaId::Antenna3)),
        (channel, DeploymentStep::ManualDeploy(AntennaId::Antenna4)),
        (channel, DeploymentStep::Disarm),
    ]
}

const PRIMARY_PLAN: [(AntennaChannel, DeploymentStep); 8] = channel_plan(AntennaChannel::Primary);
const BACKUP_PLAN: [(AntennaChannel, DeploymentStep); 8] = channel_plan(AntennaChannel::Backup);

/// Number of planned steps. `step == STEP_COUNT` means finished.
pub const STEP_COUNT: usize = PRIMARY_PLAN.len() + BACKUP_PLAN.len();

fn planned_step(step: usize) -> Option<(AntennaChannel, DeploymentStep)> {
    if step < PRIMARY_PLAN.len() {
        Some(PRIMARY_PLAN[step])
    } else {
        BACKUP_PLAN.get(step - PRIMARY_PLAN.len()).copied()
    }
}

/// Deployment progress owned by the task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AntennaMissionState {
    pub step: usize,
    /// Any antenna was burning at the last status read.
    pub deployment_in_progress: bool,
    /// Operator request to run the plan again even though deployment was
    /// reported.
    pub override_state: bool,
    pub last_status: AntennaDeploymentStatus,
    /// Deployment switches seen closed so far.
    pub deployment_state: [bool; ANTENNA_COUNT],
}

impl AntennaMissionState {
    pub fn is_finished(&self) -> bool {
        self.step >= STEP_COUNT
    }

    fn active_channel(&self) -> Option<AntennaChannel> {
        planned_step(self.step).map(|(channel, _)| channel)
    }
}

pub struct AntennaTask {
    driver: Arc<dyn AntennaDriver>,
    settings: Option<Arc<dyn PersistentSettings>>,
    state: Mutex<AntennaMissionState>,
    threshold: Duration,
    step_timeout: Duration,
    auto_timeout: Duration,
}

impl AntennaTask {
    pub fn new(driver: Arc<dyn AntennaDriver>, config: &MissionConfig) -> Self {
        Self {
            driver,
            settings: None,
            state: Mutex::new(AntennaMissionState::default()),
            threshold: config.antenna_deployment_threshold,
            step_timeout: config.antenna_step_timeout,
            auto_timeout: config.antenna_auto_timeout,
        }
    }

    /// Record newly deployed antennas in the persistent deployment mask.
    pub fn with_settings(mut self, settings: Arc<dyn PersistentSettings>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn build_update(self: &Arc<Self>) -> UpdateDescriptor<SystemState> {
        UpdateDescriptor::new("Antenna deployment status", self.clone())
    }

    pub fn build_action(self: &Arc<Self>) -> ActionDescriptor<SystemState> {
        ActionDescriptor::new("Deploy antennas", self.clone())
    }

    pub fn mission_state(&self) -> AntennaMissionState {
        *self.state()
    }

    /// Force the plan to run again from the first step, or drop the override.
    pub fn set_override(&self, enable: bool) {
        let mut state = self.state();
        state.override_state = enable;
        if enable {
            state.step = 0;
        }
        info!("Antenna deployment override {}", if enable { "set" } else { "cleared" });
    }

    /// Restart the plan without forcing it.
    pub fn restart(&self) {
        self.state().step = 0;
        info!("Antenna deployment plan restarted");
    }

    fn state(&self) -> MutexGuard<'_, AntennaMissionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_step(&self, channel: AntennaChannel, step: DeploymentStep) -> DeviceResult<()> {
        match step {
            DeploymentStep::Reset => self.driver.reset(channel),
            DeploymentStep::Arm => self.driver.arm(channel),
            DeploymentStep::AutoDeploy => {
                self.driver.start_auto_deployment(channel, self.auto_timeout)
            }
            DeploymentStep::ManualDeploy(antenna) => {
                self.driver.deploy(channel, antenna, self.step_timeout, true)
            }
            DeploymentStep::Disarm => self.driver.disarm(channel),
        }
    }

    fn persist_mask(&self, deployed: &[bool; ANTENNA_COUNT]) {
        let Some(settings) = &self.settings else {
            return;
        };

        let mask = deployed
            .iter()
            .enumerate()
            .fold(0u8, |mask, (slot, &deployed)| {
                if deployed {
                    mask | 1 << slot
                } else {
                    mask
                }
            });
        if settings.get().antenna_deployment_mask & mask == mask {
            return;
        }

        let result = settings.modify(&mut |state: &mut PersistentState| {
            state.antenna_deployment_mask |= mask;
        });
        if let Err(e) = result {
            warn!("Unable to persist antenna deployment mask: {e}");
        }
    }
}

impl Update<SystemState> for AntennaTask {
    fn update(&self, state: &mut SystemState) -> UpdateResult {
        let mut mission = self.state();
        let mut result = UpdateResult::Ok;
        if let Some(channel) = mission.active_channel() {
            match self.driver.get_status(channel) {
                Ok(status) => {
                    mission.last_status = status;
                    mission.deployment_in_progress = status.any_active();
                    for (merged, reported) in mission
                        .deployment_state
                        .iter_mut()
                        .zip(status.deployment_status)
                    {
                        *merged |= reported;
                    }
                }
                Err(e) => {
                    warn!("Unable to read antenna status on {channel:?}: {e}");
                    result = UpdateResult::Warning;
                }
            }
        }

        state.antenna.deployment_state = mission.deployment_state;
        state.antenna.deployed =
            mission.deployment_state.iter().all(|&deployed| deployed) && !mission.override_state;
        let deployed = mission.deployment_state;
        drop(mission);

        self.persist_mask(&deployed);
        result
    }
}

impl Action<SystemState> for AntennaTask {
    fn condition(&self, state: &SystemState) -> bool {
        let mission = self.state();
        state.time >= self.threshold
            && (mission.override_state || !state.antenna.deployed)
            && !mission.is_finished()
            && !mission.deployment_in_progress
    }

    fn execute(&self, _state: &SystemState) {
        let mut mission = self.state();
        let Some((channel, step)) = planned_step(mission.step) else {
            return;
        };

        info!("Antenna deployment step {}: {step:?} on {channel:?}", mission.step);
        if let Err(e) = self.run_step(channel, step) {
            warn!("Antenna step {step:?} on {channel:?} failed: {e}");
        }

        mission.step += 1;
        if mission.is_finished() {
            info!("Antenna deployment plan finished");
            mission.override_state = false;
        } else {
            debug!("Next antenna deployment step: {}", mission.step);
        }
    }
}
