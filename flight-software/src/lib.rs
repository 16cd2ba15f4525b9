//! Mission executive for the on-board computer.
//!
//! A periodic [`mission::MissionLoop`] rebuilds a [`state::SystemState`]
//! snapshot every pass from its update hooks and then runs every action whose
//! condition holds. The deployment state machines, telemetry and clock
//! correction are actions; long-running experiments live on their own thread
//! and are paced by the loop through [`experiments::ExperimentController`].
//! [`obc::Obc`] wires all of it together.
//!
//! # Features
//! - `sim` - mock hardware wiring for the `obc_sim` binary

pub mod adcs;
pub mod antenna;
pub mod config;
pub mod experiments;
pub mod fdir;
pub mod metrics;
pub mod mission;
pub mod obc;
pub mod persistent;
pub mod sail;
pub mod state;
pub mod telemetry;
pub mod time;

pub use config::MissionConfig;
pub use obc::{AntennaHardware, Obc, ObcError, ObcHandle, ObcHardware};
