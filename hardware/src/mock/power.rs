use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::DeviceResult;
use crate::power::{BurnCircuit, BurnSwitch, Camera, PowerControl};

/// Power operation recorded by [`MockPowerControl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    PowerCycle,
    BurnSwitch(BurnCircuit, BurnSwitch),
    ThermalKnife(BurnCircuit, bool),
    PrimaryAntennaPower(bool),
    BackupAntennaPower(bool),
    CameraPower(Camera, bool),
}

/// Power control that records every request and never reboots.
#[derive(Debug, Default)]
pub struct MockPowerControl {
    power_cycles: AtomicUsize,
    events: Mutex<Vec<PowerEvent>>,
}

impl MockPowerControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn power_cycle_count(&self) -> usize {
        self.power_cycles.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<PowerEvent> {
        self.log().clone()
    }

    fn log(&self) -> MutexGuard<'_, Vec<PowerEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: PowerEvent) -> DeviceResult<()> {
        self.log().push(event);
        Ok(())
    }
}

impl PowerControl for MockPowerControl {
    fn power_cycle(&self) {
        self.power_cycles.fetch_add(1, Ordering::SeqCst);
        self.log().push(PowerEvent::PowerCycle);
    }

    fn enable_burn_switch(&self, circuit: BurnCircuit, switch: BurnSwitch) -> DeviceResult<()> {
        self.record(PowerEvent::BurnSwitch(circuit, switch))
    }

    fn thermal_knife(&self, circuit: BurnCircuit, enable: bool) -> DeviceResult<()> {
        self.record(PowerEvent::ThermalKnife(circuit, enable))
    }

    fn primary_antenna_power(&self, enable: bool) -> DeviceResult<()> {
        self.record(PowerEvent::PrimaryAntennaPower(enable))
    }

    fn backup_antenna_power(&self, enable: bool) -> DeviceResult<()> {
        self.record(PowerEvent::BackupAntennaPower(enable))
    }

    fn camera_power(&self, camera: Camera, enable: bool) -> DeviceResult<()> {
        self.record(PowerEvent::CameraPower(camera, enable))
    }
}
