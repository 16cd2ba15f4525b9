//! Blocking synchronisation primitives for the mission tasks.
//!
//! These mirror the RTOS objects flight code is usually written against:
//!
//! - [`EventGroup`]: a set of typed flag bits that tasks can wait on, either
//!   for any or for all bits of a mask.
//! - [`Pulse`]: a broadcast wake-up that releases every current waiter.
//! - [`Mailbox`]: a single-slot queue whose writer overwrites the pending item.
//!
//! All waits accept an optional timeout; `None` blocks indefinitely.

mod event_group;
mod mailbox;
mod pulse;

pub use event_group::{EventGroup, WaitMode};
pub use mailbox::Mailbox;
pub use pulse::Pulse;
