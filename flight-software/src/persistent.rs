//! Persistent satellite settings.
//!
//! Settings survive reboots in a fixed-layout record on the triple-redundant
//! FRAM. The record ends with a CRC-32; a record that fails the check is
//! replaced by defaults.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytemuck::{bytes_of, pod_read_unaligned, Pod, Zeroable};
use hardware::checksum::Checksummed;
use hardware::error_counter::{ErrorPolicy, DEVICE_COUNT};
use hardware::fram::{FramError, RedundantFram};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::mission::{Update, UpdateDescriptor, UpdateResult};
use crate::state::SystemState;

/// FRAM address of the settings record.
pub const PERSISTENT_STATE_ADDRESS: u32 = 0;

#[derive(Error, Debug)]
pub enum PersistentStateError {
    #[error("persistent state write failed: {0}")]
    Fram(#[from] FramError),
}

pub type PersistentStateResult<T> = Result<T, PersistentStateError>;

/// Settings that outlive a power cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistentState {
    /// Incremented once per boot.
    pub boot_index: u32,
    /// Bit `i` set once antenna `i + 1` was seen deployed.
    pub antenna_deployment_mask: u8,
    pub sail_opened: bool,
    pub sail_attempts: u8,
    /// FDIR policy per device, indexed like [`hardware::Device::index`].
    pub fdir_config: [ErrorPolicy; DEVICE_COUNT],
}

/// On-FRAM layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PersistentRecord {
    boot_index: u32,
    antenna_deployment_mask: u8,
    sail_opened: u8,
    sail_attempts: u8,
    reserved: u8,
    fdir_config: [u32; DEVICE_COUNT],
    checksum: u32,
}

impl Checksummed for PersistentRecord {}

impl PersistentRecord {
    fn encode(state: &PersistentState) -> Self {
        let mut record = Self {
            boot_index: state.boot_index,
            antenna_deployment_mask: state.antenna_deployment_mask,
            sail_opened: u8::from(state.sail_opened),
            sail_attempts: state.sail_attempts,
            reserved: 0,
            fdir_config: state.fdir_config.map(ErrorPolicy::encode),
            checksum: 0,
        };
        record.update_checksum();
        record
    }

    fn decode(&self) -> PersistentState {
        PersistentState {
            boot_index: self.boot_index,
            antenna_deployment_mask: self.antenna_deployment_mask,
            sail_opened: self.sail_opened != 0,
            sail_attempts: self.sail_attempts,
            fdir_config: self.fdir_config.map(ErrorPolicy::decode),
        }
    }
}

/// Read/modify façade over the persistent settings.
pub trait PersistentSettings: Send + Sync {
    fn get(&self) -> PersistentState;

    /// Apply `change` and store the result.
    ///
    /// The in-memory copy is updated even if storing fails.
    fn modify(&self, change: &mut dyn FnMut(&mut PersistentState)) -> PersistentStateResult<()>;
}

/// Settings stored on the redundant FRAM.
pub struct FramPersistentSettings {
    fram: RedundantFram,
    cache: Mutex<PersistentState>,
}

impl FramPersistentSettings {
    /// Load the record, falling back to defaults if it is unreadable or
    /// corrupt.
    pub fn load(fram: RedundantFram) -> Self {
        let state = Self::read_record(&fram).unwrap_or_default();
        debug!("Persistent state loaded: {state:?}");
        Self {
            fram,
            cache: Mutex::new(state),
        }
    }

    fn read_record(fram: &RedundantFram) -> Option<PersistentState> {
        let mut buffer = [0u8; std::mem::size_of::<PersistentRecord>()];
        if let Err(e) = fram.read(PERSISTENT_STATE_ADDRESS, &mut buffer) {
            warn!("Unable to read persistent state: {e}");
            return None;
        }

        let record: PersistentRecord = pod_read_unaligned(&buffer);
        if !record.verify_checksum() {
            warn!("Persistent state checksum mismatch, using defaults");
            return None;
        }
        Some(record.decode())
    }

    fn cache(&self) -> MutexGuard<'_, PersistentState> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PersistentSettings for FramPersistentSettings {
    fn get(&self) -> PersistentState {
        *self.cache()
    }

    fn modify(&self, change: &mut dyn FnMut(&mut PersistentState)) -> PersistentStateResult<()> {
        let mut cache = self.cache();
        change(&mut cache);
        let record = PersistentRecord::encode(&cache);
        self.fram
            .write(PERSISTENT_STATE_ADDRESS, bytes_of(&record))
            .map_err(|e| {
                warn!("Unable to store persistent state: {e}");
                PersistentStateError::from(e)
            })
    }
}

/// Bump the boot counter. Returns the new boot index.
pub fn register_boot(settings: &dyn PersistentSettings) -> u32 {
    let result = settings.modify(&mut |state: &mut PersistentState| {
        state.boot_index = state.boot_index.wrapping_add(1);
    });
    if let Err(e) = result {
        warn!("Boot index not persisted: {e}");
    }
    let boot_index = settings.get().boot_index;
    info!("Boot #{boot_index}");
    boot_index
}

/// Copies the persistent settings into the snapshot.
pub struct PersistentStateTask {
    settings: Arc<dyn PersistentSettings>,
}

impl PersistentStateTask {
    pub fn new(settings: Arc<dyn PersistentSettings>) -> Arc<Self> {
        Arc::new(Self { settings })
    }

    pub fn build_update(self: &Arc<Self>) -> UpdateDescriptor<SystemState> {
        UpdateDescriptor::new("Persistent state", self.clone())
    }
}

impl Update<SystemState> for PersistentStateTask {
    fn update(&self, state: &mut SystemState) -> UpdateResult {
        state.persistent = self.settings.get();
        UpdateResult::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hardware::error_counter::{Device, ErrorCounting, NoopLimitHandler};
    use hardware::fram::Fram;
    use hardware::mock::MemoryFram;

    const RECORD_LEN: usize = std::mem::size_of::<PersistentRecord>();

    struct Chips {
        chips: [Arc<MemoryFram>; 3],
        errors: Arc<ErrorCounting>,
    }

    impl Chips {
        fn new() -> Self {
            Self {
                chips: [0, 1, 2].map(|_| Arc::new(MemoryFram::new(256))),
                errors: Arc::new(ErrorCounting::new(Arc::new(NoopLimitHandler))),
            }
        }

        fn fram(&self) -> RedundantFram {
            let chips = self.chips.clone().map(|chip| chip as Arc<dyn Fram>);
            RedundantFram::new(chips, self.errors.clone())
        }

        fn load(&self) -> FramPersistentSettings {
            FramPersistentSettings::load(self.fram())
        }
    }

    #[test]
    fn test_record_layout() {
        assert_eq!(RECORD_LEN, 8 + 4 * DEVICE_COUNT + 4);
    }

    #[test]
    fn test_blank_fram_yields_defaults() {
        let chips = Chips::new();
        assert_eq!(chips.load().get(), PersistentState::default());
    }

    #[test]
    fn test_modify_survives_reload() {
        let chips = Chips::new();
        let settings = chips.load();
        settings
            .modify(&mut |state: &mut PersistentState| {
                state.sail_opened = true;
                state.sail_attempts = 2;
                state.antenna_deployment_mask = 0b0101;
                state.fdir_config[Device::Eps.index()] = ErrorPolicy::new(10, 5, 2);
            })
            .unwrap();

        let reloaded = chips.load().get();
        assert!(reloaded.sail_opened);
        assert_eq!(reloaded.sail_attempts, 2);
        assert_eq!(reloaded.antenna_deployment_mask, 0b0101);
        assert_eq!(reloaded.fdir_config[Device::Eps.index()], ErrorPolicy::new(10, 5, 2));
        assert_eq!(reloaded.fdir_config[Device::Comm.index()], ErrorPolicy::default());
    }

    #[test]
    fn test_single_corrupt_chip_is_outvoted() {
        let chips = Chips::new();
        register_boot(&chips.load());
        chips.chips[1].corrupt(0, 0xee);

        assert_eq!(chips.load().get().boot_index, 1);
    }

    #[test]
    fn test_checksum_mismatch_yields_defaults() {
        let chips = Chips::new();
        register_boot(&chips.load());
        for chip in &chips.chips {
            chip.corrupt(4, 0xff);
        }

        assert_eq!(chips.load().get(), PersistentState::default());
    }

    #[test]
    fn test_register_boot_increments() {
        let chips = Chips::new();
        assert_eq!(register_boot(&chips.load()), 1);
        assert_eq!(register_boot(&chips.load()), 2);
    }

    #[test]
    fn test_write_failure_keeps_cache() {
        let chips = Chips::new();
        let settings = chips.load();
        chips.chips[0].set_failing(true);
        chips.chips[2].set_failing(true);

        let result = settings.modify(&mut |state: &mut PersistentState| state.sail_opened = true);
        assert!(matches!(
            result,
            Err(PersistentStateError::Fram(FramError::WriteFailed { failed: 2 }))
        ));
        assert!(settings.get().sail_opened);
    }

    #[test]
    fn test_update_copies_into_snapshot() {
        let chips = Chips::new();
        let settings = Arc::new(chips.load());
        register_boot(settings.as_ref());
        let task = PersistentStateTask::new(settings);

        let mut state = SystemState::default();
        assert_eq!(task.update(&mut state), UpdateResult::Ok);
        assert_eq!(state.persistent.boot_index, 1);
    }
}
