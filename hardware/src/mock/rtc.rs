use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::{DeviceError, DeviceResult};
use crate::rtc::Rtc;

/// RTC returning whatever the test last set.
#[derive(Debug)]
pub struct MockRtc {
    reading: Mutex<DeviceResult<Duration>>,
}

impl MockRtc {
    pub fn new(time: Duration) -> Self {
        Self {
            reading: Mutex::new(Ok(time)),
        }
    }

    pub fn set_time(&self, time: Duration) {
        *self.reading.lock().unwrap_or_else(PoisonError::into_inner) = Ok(time);
    }

    pub fn set_failing(&self) {
        *self.reading.lock().unwrap_or_else(PoisonError::into_inner) = Err(DeviceError::Io);
    }
}

impl Rtc for MockRtc {
    fn read_time(&self) -> DeviceResult<Duration> {
        *self.reading.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
