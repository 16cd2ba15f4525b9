//! Sail deployment task.
//!
//! Once the deployment window opens the sail is released by burning through
//! its restraint: first with the main thermal knife and burn switch, then
//! with the redundant pair. One step runs per mission pass.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hardware::power::{BurnCircuit, BurnSwitch, PowerControl};
use hardware::DeviceResult;
use tracing::{info, warn};

use crate::config::MissionConfig;
use crate::mission::{Action, ActionDescriptor, Update, UpdateDescriptor, UpdateResult};
use crate::persistent::{PersistentSettings, PersistentState};
use crate::state::SystemState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SailStep {
    KnifeOn(BurnCircuit),
    Burn(BurnCircuit),
    KnifeOff(BurnCircuit),
}

const SAIL_PLAN: [SailStep; 6] = [
    SailStep::KnifeOn(BurnCircuit::Main),
    SailStep::Burn(BurnCircuit::Main),
    SailStep::KnifeOff(BurnCircuit::Main),
    SailStep::KnifeOn(BurnCircuit::Redundant),
    SailStep::Burn(BurnCircuit::Redundant),
    SailStep::KnifeOff(BurnCircuit::Redundant),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SailMissionState {
    pub step: usize,
    /// Operator asked for the sail to be opened now.
    pub forced: bool,
}

pub struct SailTask {
    power: Arc<dyn PowerControl>,
    settings: Arc<dyn PersistentSettings>,
    state: Mutex<SailMissionState>,
    threshold: Duration,
}

impl SailTask {
    pub fn new(
        power: Arc<dyn PowerControl>,
        settings: Arc<dyn PersistentSettings>,
        config: &MissionConfig,
    ) -> Self {
        Self {
            power,
            settings,
            state: Mutex::new(SailMissionState::default()),
            threshold: config.sail_deployment_threshold,
        }
    }

    pub fn build_update(self: &Arc<Self>) -> UpdateDescriptor<SystemState> {
        UpdateDescriptor::new("Sail state", self.clone())
    }

    pub fn build_action(self: &Arc<Self>) -> ActionDescriptor<SystemState> {
        ActionDescriptor::new("Open sail", self.clone())
    }

    pub fn mission_state(&self) -> SailMissionState {
        *self.state()
    }

    /// Run the opening sequence from the start, even if the sail was already
    /// reported open.
    pub fn open_sail(&self) {
        *self.state() = SailMissionState {
            step: 0,
            forced: true,
        };
        info!("Sail opening requested");
    }

    fn state(&self) -> MutexGuard<'_, SailMissionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_step(&self, step: SailStep) -> DeviceResult<()> {
        match step {
            SailStep::KnifeOn(circuit) => self.power.thermal_knife(circuit, true),
            SailStep::Burn(circuit) => self.power.enable_burn_switch(circuit, BurnSwitch::Sail),
            SailStep::KnifeOff(circuit) => self.power.thermal_knife(circuit, false),
        }
    }
}

impl Update<SystemState> for SailTask {
    fn update(&self, state: &mut SystemState) -> UpdateResult {
        let persistent = self.settings.get();
        state.sail.opened = persistent.sail_opened && !self.state().forced;
        state.sail.open_attempt_count = persistent.sail_attempts;
        UpdateResult::Ok
    }
}

impl Action<SystemState> for SailTask {
    fn condition(&self, state: &SystemState) -> bool {
        let mission = self.state();
        mission.step < SAIL_PLAN.len()
            && (mission.forced || (state.time >= self.threshold && !state.sail.opened))
    }

    fn execute(&self, _state: &SystemState) {
        let mut mission = self.state();
        let Some(&step) = SAIL_PLAN.get(mission.step) else {
            return;
        };

        info!("Sail step {}: {step:?}", mission.step);
        if let Err(e) = self.run_step(step) {
            warn!("Sail step {step:?} failed: {e}");
        }

        mission.step += 1;
        if mission.step < SAIL_PLAN.len() {
            return;
        }

        mission.forced = false;
        let result = self.settings.modify(&mut |persistent: &mut PersistentState| {
            persistent.sail_opened = true;
            persistent.sail_attempts = persistent.sail_attempts.saturating_add(1);
        });
        if let Err(e) = result {
            warn!("Unable to persist sail state: {e}");
        }

        info!(
            "Sail opening sequence finished, attempt {}",
            self.settings.get().sail_attempts
        );
    }
}
