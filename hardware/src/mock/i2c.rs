use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::i2c::{I2cAddress, I2cBus, I2cError};

#[derive(Debug, Default)]
struct BusLog {
    writes: Vec<(I2cAddress, Vec<u8>)>,
    queries: Vec<(I2cAddress, Vec<u8>)>,
    responses: VecDeque<Vec<u8>>,
    failures: VecDeque<I2cError>,
}

/// I2C bus that records transactions and replays queued responses.
///
/// Reads without a queued response return zeros.
#[derive(Debug, Default)]
pub struct MockI2cBus {
    log: Mutex<BusLog>,
}

impl MockI2cBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for the next `write_read`.
    pub fn queue_response(&self, response: Vec<u8>) {
        self.log().responses.push_back(response);
    }

    /// Fail the next transaction with `error`.
    pub fn fail_next(&self, error: I2cError) {
        self.log().failures.push_back(error);
    }

    /// All successful and failed `write` transactions.
    pub fn writes(&self) -> Vec<(I2cAddress, Vec<u8>)> {
        self.log().writes.clone()
    }

    /// Request halves of all `write_read` transactions.
    pub fn queries(&self) -> Vec<(I2cAddress, Vec<u8>)> {
        self.log().queries.clone()
    }

    fn log(&self) -> MutexGuard<'_, BusLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl I2cBus for MockI2cBus {
    fn write(&self, address: I2cAddress, data: &[u8]) -> Result<(), I2cError> {
        let mut log = self.log();
        log.writes.push((address, data.to_vec()));
        match log.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn write_read(
        &self,
        address: I2cAddress,
        data: &[u8],
        response: &mut [u8],
    ) -> Result<(), I2cError> {
        let mut log = self.log();
        log.queries.push((address, data.to_vec()));
        if let Some(error) = log.failures.pop_front() {
            return Err(error);
        }

        response.fill(0);
        if let Some(queued) = log.responses.pop_front() {
            let len = queued.len().min(response.len());
            response[..len].copy_from_slice(&queued[..len]);
        }
        Ok(())
    }
}
