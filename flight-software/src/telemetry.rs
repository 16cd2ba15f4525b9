//! Telemetry archive.
//!
//! A fixed-size summary of the snapshot is appended to the current archive
//! file every save period. When the file reaches its size limit it becomes
//! the previous archive and a new one is started.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytemuck::{bytes_of, Pod, Zeroable};
use hardware::error_counter::DEVICE_COUNT;
use hardware::ErrorCounting;
use shared::fs::FileSystem;
use tracing::{debug, info, warn};

use crate::adcs::AdcsMode;
use crate::config::MissionConfig;
use crate::mission::{Action, ActionDescriptor};
use crate::state::SystemState;

pub const TELEMETRY_CURRENT: &str = "/telemetry.current";
pub const TELEMETRY_PREVIOUS: &str = "/telemetry.previous";

/// Bit set in [`TelemetryRecord::antenna`] when deployment is complete.
pub const ANTENNA_DEPLOYED_BIT: u8 = 1 << 7;

/// One archived snapshot summary, stored little-endian.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct TelemetryRecord {
    pub time_ms: u64,
    pub boot_index: u32,
    /// Bit `i` is antenna `i + 1`, plus [`ANTENNA_DEPLOYED_BIT`].
    pub antenna: u8,
    pub sail_opened: u8,
    pub sail_attempts: u8,
    pub adcs_mode: u8,
    pub error_counters: [u8; DEVICE_COUNT],
    pub reserved: u8,
}

impl TelemetryRecord {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn from_state(state: &SystemState, error_counters: [u8; DEVICE_COUNT]) -> Self {
        let mut antenna = state
            .antenna
            .deployment_state
            .iter()
            .enumerate()
            .fold(0u8, |bits, (slot, &deployed)| {
                if deployed {
                    bits | 1 << slot
                } else {
                    bits
                }
            });
        if state.antenna.deployed {
            antenna |= ANTENNA_DEPLOYED_BIT;
        }

        Self {
            time_ms: (state.time.as_millis() as u64).to_le(),
            boot_index: state.persistent.boot_index.to_le(),
            antenna,
            sail_opened: u8::from(state.sail.opened),
            sail_attempts: state.sail.open_attempt_count,
            adcs_mode: adcs_code(state.adcs),
            error_counters,
            reserved: 0,
        }
    }

    /// Decode one record. Returns `None` if `bytes` is too short.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..Self::SIZE)?;
        let record: Self = bytemuck::pod_read_unaligned(bytes);
        Some(Self {
            time_ms: u64::from_le(record.time_ms),
            boot_index: u32::from_le(record.boot_index),
            ..record
        })
    }
}

fn adcs_code(mode: AdcsMode) -> u8 {
    match mode {
        AdcsMode::Detumbling => 0,
        AdcsMode::SunPointing => 1,
        AdcsMode::Disabled => 2,
        AdcsMode::Experimental => 3,
    }
}

pub struct TelemetryTask {
    fs: Arc<dyn FileSystem>,
    errors: Arc<ErrorCounting>,
    last_save: Mutex<Option<Duration>>,
    period: Duration,
    max_file_size: u64,
}

impl TelemetryTask {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        errors: Arc<ErrorCounting>,
        config: &MissionConfig,
    ) -> Self {
        Self {
            fs,
            errors,
            last_save: Mutex::new(None),
            period: config.telemetry_save_period,
            max_file_size: config.telemetry_max_file_size,
        }
    }

    pub fn build_action(self: &Arc<Self>) -> ActionDescriptor<SystemState> {
        ActionDescriptor::new("Save telemetry", self.clone())
    }

    fn last_save(&self) -> MutexGuard<'_, Option<Duration>> {
        self.last_save.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `record`, rotating the archive first if it is full.
    fn archive(&self, record: &TelemetryRecord) {
        match self.fs.size(TELEMETRY_CURRENT) {
            Ok(size) if size >= self.max_file_size => {
                info!("Telemetry archive full ({size} bytes), rotating");
                if let Err(e) = self.fs.rename(TELEMETRY_CURRENT, TELEMETRY_PREVIOUS) {
                    warn!("Unable to rotate telemetry archive: {e}");
                }
            }
            _ => {}
        }

        if let Err(e) = self.fs.append(TELEMETRY_CURRENT, bytes_of(record)) {
            warn!("Unable to save telemetry: {e}");
        }
    }
}

impl Action<SystemState> for TelemetryTask {
    fn condition(&self, state: &SystemState) -> bool {
        match *self.last_save() {
            None => true,
            Some(last) => state.time.saturating_sub(last) >= self.period,
        }
    }

    fn execute(&self, state: &SystemState) {
        let record = TelemetryRecord::from_state(state, self.errors.values());
        self.archive(&record);
        *self.last_save() = Some(state.time);
        debug!("Telemetry saved at {:?}", state.time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hardware::error_counter::NoopLimitHandler;
    use hardware::Device;
    use shared::fs::MemoryFileSystem;

    fn task(max_file_size: u64) -> (TelemetryTask, Arc<MemoryFileSystem>, Arc<ErrorCounting>) {
        let fs = Arc::new(MemoryFileSystem::new());
        let errors = Arc::new(ErrorCounting::new(Arc::new(NoopLimitHandler)));
        let config = MissionConfig {
            telemetry_max_file_size: max_file_size,
            ..Default::default()
        };
        (TelemetryTask::new(fs.clone(), errors.clone(), &config), fs, errors)
    }

    fn pass(task: &TelemetryTask, seconds: u64) -> bool {
        let state = SystemState {
            time: Duration::from_secs(seconds),
            ..Default::default()
        };
        let run = task.condition(&state);
        if run {
            task.execute(&state);
        }
        run
    }

    #[test]
    fn test_record_size() {
        assert_eq!(TelemetryRecord::SIZE, 32);
    }

    #[test]
    fn test_saves_every_period() {
        let (task, fs, _) = task(1024);

        assert!(pass(&task, 0));
        assert!(!pass(&task, 29));
        assert!(pass(&task, 30));
        assert!(!pass(&task, 59));

        assert_eq!(fs.contents(TELEMETRY_CURRENT).unwrap().len(), 2 * TelemetryRecord::SIZE);
    }

    #[test]
    fn test_record_contents() {
        let (task, fs, errors) = task(1024);
        errors.failure(Device::Comm);

        let mut state = SystemState {
            time: Duration::from_millis(1234),
            ..Default::default()
        };
        state.antenna.deployment_state = [true; 4];
        state.antenna.deployed = true;
        state.sail.open_attempt_count = 2;
        state.persistent.boot_index = 9;
        task.execute(&state);

        let record = TelemetryRecord::parse(&fs.contents(TELEMETRY_CURRENT).unwrap()).unwrap();
        assert_eq!(record.time_ms, 1234);
        assert_eq!(record.boot_index, 9);
        assert_eq!(record.antenna, 0x0f | ANTENNA_DEPLOYED_BIT);
        assert_eq!(record.sail_attempts, 2);
        assert_eq!(record.adcs_mode, 2);
        assert_eq!(record.error_counters[Device::Comm.index()], 5);
    }

    #[test]
    fn test_rotation_when_full() {
        let (task, fs, _) = task(2 * TelemetryRecord::SIZE as u64);

        for step in 0..3 {
            pass(&task, step * 30);
        }

        assert_eq!(fs.contents(TELEMETRY_PREVIOUS).unwrap().len(), 2 * TelemetryRecord::SIZE);
        assert_eq!(fs.contents(TELEMETRY_CURRENT).unwrap().len(), TelemetryRecord::SIZE);
    }

    #[test]
    fn test_write_failure_is_not_fatal() {
        let (task, fs, _) = task(1024);
        fs.fail_writes(TELEMETRY_CURRENT);

        assert!(pass(&task, 0));
        assert!(fs.contents(TELEMETRY_CURRENT).is_none());
        assert!(!pass(&task, 1));
    }

    #[test]
    fn test_parse_short_input() {
        assert!(TelemetryRecord::parse(&[0u8; 8]).is_none());
    }
}
