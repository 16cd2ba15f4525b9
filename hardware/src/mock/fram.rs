use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{DeviceError, DeviceResult};
use crate::fram::Fram;

/// RAM-backed FRAM chip with failure switch.
#[derive(Debug)]
pub struct MemoryFram {
    memory: Mutex<Vec<u8>>,
    failing: AtomicBool,
}

impl MemoryFram {
    pub fn new(size: usize) -> Self {
        Self {
            memory: Mutex::new(vec![0; size]),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every access fail with [`DeviceError::Io`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Flip a stored byte behind the driver's back.
    pub fn corrupt(&self, address: usize, value: u8) {
        if let Some(byte) = self.memory().get_mut(address) {
            *byte = value;
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.memory().clone()
    }

    fn memory(&self) -> MutexGuard<'_, Vec<u8>> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn range(&self, address: u32, len: usize) -> DeviceResult<std::ops::Range<usize>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeviceError::Io);
        }
        let start = address as usize;
        let end = start + len;
        if end > self.memory().len() {
            return Err(DeviceError::OutOfRange);
        }
        Ok(start..end)
    }
}

impl Fram for MemoryFram {
    fn read(&self, address: u32, buffer: &mut [u8]) -> DeviceResult<()> {
        let range = self.range(address, buffer.len())?;
        buffer.copy_from_slice(&self.memory()[range]);
        Ok(())
    }

    fn write(&self, address: u32, data: &[u8]) -> DeviceResult<()> {
        let range = self.range(address, data.len())?;
        self.memory()[range].copy_from_slice(data);
        Ok(())
    }
}
