//! External real-time clock capability.

use std::time::Duration;

use crate::error::DeviceResult;

/// Battery-backed clock that keeps counting while the OBC is off.
pub trait Rtc: Send + Sync {
    /// Time elapsed since the RTC epoch.
    fn read_time(&self) -> DeviceResult<Duration>;
}
