//! Triple-redundant FRAM.
//!
//! Persistent settings are written to three identical FRAM chips. Reads are
//! combined byte by byte: a byte held by at least two chips wins. Chips whose
//! read failed are left out of the vote, so a single healthy chip still
//! produces data.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::error::DeviceResult;
use crate::error_counter::{Device, ErrorCounting};

/// Number of redundant chips.
pub const FRAM_COPIES: usize = 3;

const CHIP_DEVICES: [Device; FRAM_COPIES] = [Device::Fram0, Device::Fram1, Device::Fram2];

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramError {
    #[error("read failed on every FRAM chip")]
    ReadFailed,

    #[error("write failed on {failed} of 3 FRAM chips")]
    WriteFailed { failed: usize },
}

pub type FramResult<T> = Result<T, FramError>;

/// One FRAM chip.
pub trait Fram: Send + Sync {
    fn read(&self, address: u32, buffer: &mut [u8]) -> DeviceResult<()>;

    fn write(&self, address: u32, data: &[u8]) -> DeviceResult<()>;
}

/// Majority of three bytes, ignoring missing ones.
///
/// With no majority the first available byte is used.
fn vote_byte(candidates: [Option<u8>; FRAM_COPIES]) -> Option<u8> {
    match candidates {
        [Some(a), Some(b), Some(c)] => Some(if a == b || a == c {
            a
        } else if b == c {
            b
        } else {
            a
        }),
        _ => candidates.into_iter().flatten().next(),
    }
}

/// Three FRAM chips presented as one voted memory.
pub struct RedundantFram {
    chips: [Arc<dyn Fram>; FRAM_COPIES],
    errors: Arc<ErrorCounting>,
}

impl RedundantFram {
    pub fn new(chips: [Arc<dyn Fram>; FRAM_COPIES], errors: Arc<ErrorCounting>) -> Self {
        Self { chips, errors }
    }

    /// Voted read of `buffer.len()` bytes at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`FramError::ReadFailed`] only if every chip failed.
    pub fn read(&self, address: u32, buffer: &mut [u8]) -> FramResult<()> {
        let copies: Vec<Option<Vec<u8>>> = self
            .chips
            .iter()
            .zip(CHIP_DEVICES)
            .map(|(chip, device)| {
                let mut reporter = self.errors.reporter(device);
                let mut copy = vec![0u8; buffer.len()];
                match reporter.track(chip.read(address, &mut copy)) {
                    Ok(()) => Some(copy),
                    Err(e) => {
                        warn!("FRAM read from {} failed: {e}", device.name());
                        None
                    }
                }
            })
            .collect();

        if copies.iter().all(Option::is_none) {
            return Err(FramError::ReadFailed);
        }

        for (index, byte) in buffer.iter_mut().enumerate() {
            let candidates = [0, 1, 2].map(|chip| copies[chip].as_ref().map(|copy| copy[index]));
            if let Some(voted) = vote_byte(candidates) {
                *byte = voted;
            }
        }

        Ok(())
    }

    /// Write `data` to every chip.
    ///
    /// # Errors
    ///
    /// Returns [`FramError::WriteFailed`] if more than one chip failed, since
    /// the next read could then be outvoted by stale data.
    pub fn write(&self, address: u32, data: &[u8]) -> FramResult<()> {
        let failed = self
            .chips
            .iter()
            .zip(CHIP_DEVICES)
            .filter(|(chip, device)| {
                let mut reporter = self.errors.reporter(*device);
                let result = reporter.track(chip.write(address, data));
                if let Err(e) = result {
                    warn!("FRAM write to {} failed: {e}", device.name());
                }
                result.is_err()
            })
            .count();

        if failed > 1 {
            return Err(FramError::WriteFailed { failed });
        }
        Ok(())
    }
}
