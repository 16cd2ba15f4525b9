//! Shared building blocks for the on-board computer crates.
//!
//! - [`fs`]: the file-system capability the mission core persists through,
//!   with a directory-backed and an in-memory implementation.
//! - [`sync`]: event groups, broadcast pulses and single-slot mailboxes, the
//!   hosted equivalents of the RTOS objects the mission tasks block on.

pub mod fs;
pub mod sync;
