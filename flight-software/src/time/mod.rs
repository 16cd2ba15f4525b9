//! Mission time.
//!
//! Mission time is a monotonic millisecond count since the start of the
//! mission. [`TimeProvider`] owns the clock and its triple-redundant
//! persistence, [`TimeTask`] connects it to the mission loop and corrects
//! drift against the external RTC.

mod provider;
mod task;

use std::time::Duration;

pub use provider::{majority_vote, TimePassedCallback, TimeProvider, TIME_FILES};
pub use task::TimeTask;

const MS_PER_SECOND: u64 = 1000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: u64 = 24 * MS_PER_HOUR;

/// Mission time split into calendar-like components.
///
/// Fields are normalised: `hour < 24`, `minute < 60`, `second < 60` and
/// `millisecond < 1000`. The derived ordering is chronological.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimePoint {
    pub day: u32,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub millisecond: u16,
}

impl TimePoint {
    /// Build a time point, carrying overflowing components upwards.
    pub fn new(day: u32, hour: u32, minute: u32, second: u32, millisecond: u32) -> Self {
        let total = u64::from(day) * MS_PER_DAY
            + u64::from(hour) * MS_PER_HOUR
            + u64::from(minute) * MS_PER_MINUTE
            + u64::from(second) * MS_PER_SECOND
            + u64::from(millisecond);
        Self::from_duration(Duration::from_millis(total))
    }

    pub fn from_duration(span: Duration) -> Self {
        let total = span.as_millis() as u64;
        Self {
            day: (total / MS_PER_DAY) as u32,
            hour: ((total % MS_PER_DAY) / MS_PER_HOUR) as u8,
            minute: ((total % MS_PER_HOUR) / MS_PER_MINUTE) as u8,
            second: ((total % MS_PER_MINUTE) / MS_PER_SECOND) as u8,
            millisecond: (total % MS_PER_SECOND) as u16,
        }
    }

    pub fn to_duration(self) -> Duration {
        Duration::from_millis(
            u64::from(self.day) * MS_PER_DAY
                + u64::from(self.hour) * MS_PER_HOUR
                + u64::from(self.minute) * MS_PER_MINUTE
                + u64::from(self.second) * MS_PER_SECOND
                + u64::from(self.millisecond),
        )
    }
}

impl From<Duration> for TimePoint {
    fn from(span: Duration) -> Self {
        Self::from_duration(span)
    }
}

impl From<TimePoint> for Duration {
    fn from(point: TimePoint) -> Self {
        point.to_duration()
    }
}

/// Source of mission time.
pub trait CurrentTime: Send + Sync {
    /// Mission time, or `None` if the clock cannot be read.
    fn get_current_time(&self) -> Option<Duration>;

    fn get_current_mission_time(&self) -> Option<TimePoint> {
        self.get_current_time().map(TimePoint::from_duration)
    }

    /// Jump to `time`. Returns `false` if the change was refused.
    fn set_current_time(&self, time: TimePoint) -> bool;

    fn advance_time(&self, delta: Duration);
}
