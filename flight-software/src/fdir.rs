//! FDIR policy.
//!
//! Wraps the error-counting table from the `hardware` crate with the mission
//! level escalation: a counter reaching its limit power-cycles the satellite
//! unless the operator masked the device.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use hardware::error_counter::{CounterValue, DEVICE_COUNT};
use hardware::power::PowerControl;
use hardware::{Device, ErrorCounting, ErrorPolicy, LimitHandler};
use tracing::{error, info};

/// Limit handler that requests a power cycle.
pub struct PowerCycleHandler {
    power: Arc<dyn PowerControl>,
    masked: AtomicU16,
}

impl PowerCycleHandler {
    pub fn new(power: Arc<dyn PowerControl>) -> Self {
        Self {
            power,
            masked: AtomicU16::new(0),
        }
    }
}

impl LimitHandler for PowerCycleHandler {
    fn limit_reached(&self, device: Device, value: CounterValue) {
        if self.masked.load(Ordering::SeqCst) & device.mask_bit() != 0 {
            info!("Error limit for {} reached ({value}) but masked", device.name());
            return;
        }

        error!("Error limit for {} reached ({value}), power cycling", device.name());
        self.power.power_cycle();
    }
}

/// Error counters plus the power-cycle escalation.
pub struct Fdir {
    counting: Arc<ErrorCounting>,
    handler: Arc<PowerCycleHandler>,
}

impl Fdir {
    pub fn new(power: Arc<dyn PowerControl>) -> Self {
        let handler = Arc::new(PowerCycleHandler::new(power));
        Self {
            counting: Arc::new(ErrorCounting::new(handler.clone())),
            handler,
        }
    }

    /// The counter table drivers report into.
    pub fn counting(&self) -> &Arc<ErrorCounting> {
        &self.counting
    }

    pub fn failure(&self, device: Device) {
        self.counting.failure(device);
    }

    pub fn success(&self, device: Device) {
        self.counting.success(device);
    }

    pub fn set(
        &self,
        device: Device,
        limit: CounterValue,
        increment: CounterValue,
        decrement: CounterValue,
    ) {
        self.counting
            .set_policy(device, ErrorPolicy::new(limit, increment, decrement));
    }

    pub fn load_config(&self, config: &[ErrorPolicy; DEVICE_COUNT]) {
        for device in Device::all() {
            self.counting.set_policy(device, config[device.index()]);
        }
    }

    pub fn get_config(&self) -> [ErrorPolicy; DEVICE_COUNT] {
        let mut config = [ErrorPolicy::default(); DEVICE_COUNT];
        for device in Device::all() {
            config[device.index()] = self.counting.policy(device);
        }
        config
    }

    /// Disable escalation for the devices whose [`Device::mask_bit`] is set.
    /// Counters keep updating.
    pub fn mask(&self, bitmap: u16) {
        info!("FDIR mask set to {bitmap:#06x}");
        self.handler.masked.store(bitmap, Ordering::SeqCst);
    }

    pub fn masked(&self) -> u16 {
        self.handler.masked.load(Ordering::SeqCst)
    }

    pub fn values(&self) -> [CounterValue; DEVICE_COUNT] {
        self.counting.values()
    }
}
