//! ADCS mode tracking.
//!
//! The attitude control loop itself runs outside the mission executive; the
//! mission only needs to know which mode it is in.

use std::sync::{Arc, Mutex, PoisonError};

use crate::mission::{Update, UpdateDescriptor, UpdateResult};
use crate::state::SystemState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdcsMode {
    Detumbling,
    SunPointing,
    #[default]
    Disabled,
    Experimental,
}

/// Facade over the attitude control subsystem.
pub trait AdcsCoordinator: Send + Sync {
    fn current_mode(&self) -> AdcsMode;
}

/// Coordinator that only remembers the last commanded mode.
#[derive(Debug, Default)]
pub struct CommandedAdcs {
    mode: Mutex<AdcsMode>,
}

impl CommandedAdcs {
    pub fn new(mode: AdcsMode) -> Self {
        Self {
            mode: Mutex::new(mode),
        }
    }

    pub fn set_mode(&self, mode: AdcsMode) {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
    }
}

impl AdcsCoordinator for CommandedAdcs {
    fn current_mode(&self) -> AdcsMode {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Copies the current ADCS mode into the snapshot.
pub struct AdcsTask {
    coordinator: Arc<dyn AdcsCoordinator>,
}

impl AdcsTask {
    pub fn new(coordinator: Arc<dyn AdcsCoordinator>) -> Arc<Self> {
        Arc::new(Self { coordinator })
    }

    pub fn build_update(self: &Arc<Self>) -> UpdateDescriptor<SystemState> {
        UpdateDescriptor::new("ADCS mode", self.clone())
    }
}

impl Update<SystemState> for AdcsTask {
    fn update(&self, state: &mut SystemState) -> UpdateResult {
        state.adcs = self.coordinator.current_mode();
        UpdateResult::Ok
    }
}
