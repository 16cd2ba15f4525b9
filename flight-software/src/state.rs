//! System state snapshot.
//!
//! A fresh [`SystemState`] is built at the start of every mission pass. Update
//! descriptors fill it in, action descriptors read it. Fields an update could
//! not refresh keep their defaults.

use std::time::Duration;

use hardware::antenna::ANTENNA_COUNT;

use crate::adcs::AdcsMode;
use crate::persistent::PersistentState;

/// Antenna section of the snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AntennaState {
    /// All four antennas are confirmed deployed and no override is active.
    pub deployed: bool,
    pub deployment_state: [bool; ANTENNA_COUNT],
}

/// Sail section of the snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SailState {
    pub opened: bool,
    pub open_attempt_count: u8,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemState {
    /// Mission time at the start of the pass.
    pub time: Duration,
    pub antenna: AntennaState,
    pub sail: SailState,
    pub adcs: AdcsMode,
    pub persistent: PersistentState,
}
