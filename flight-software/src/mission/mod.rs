//! Mission executive.
//!
//! The mission loop is parameterised by ordered lists of descriptors. Every
//! pass builds a fresh snapshot, runs all update hooks in registration order,
//! then evaluates each action's condition and runs the selected actions, also
//! in registration order.

mod descriptor;
mod engine;

pub use descriptor::{Action, ActionDescriptor, Update, UpdateDescriptor, UpdateResult};
pub use engine::{IterationObserver, LoopControl, MissionLoop, MissionLoopHandle, PassSummary};
