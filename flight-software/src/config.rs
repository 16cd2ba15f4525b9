//! Mission configuration.
//!
//! Every tunable has a named default below. [`MissionConfig`] collects them
//! so tests and the simulator can override individual values; on the wire
//! (JSON) all durations are whole milliseconds and missing fields keep their
//! defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Mission loop period.
pub const TICK_PERIOD: Duration = Duration::from_millis(1000);

/// Mission time after which antenna deployment may begin.
pub const ANTENNA_DEPLOYMENT_THRESHOLD: Duration = Duration::from_secs(40 * MINUTE);

/// Burn timeout handed to the controller for a single-antenna deployment.
pub const ANTENNA_STEP_TIMEOUT: Duration = Duration::from_secs(9);

/// Burn timeout for the automatic sequence over all four antennas.
pub const ANTENNA_AUTO_TIMEOUT: Duration = Duration::from_secs(4 * 9);

/// Mission time after which the sail deployment plan may begin.
pub const SAIL_DEPLOYMENT_THRESHOLD: Duration = Duration::from_secs(40 * DAY);

/// Mission clock notification period.
pub const CLOCK_NOTIFICATION_PERIOD: Duration = Duration::from_secs(10);

/// Mission clock persistence period.
pub const CLOCK_SAVE_PERIOD: Duration = Duration::from_secs(15 * MINUTE);

/// Interval between drift corrections against the external RTC.
pub const RTC_CORRECTION_PERIOD: Duration = Duration::from_secs(15 * MINUTE);

/// Weight of the internal clock in the drift correction average.
pub const RTC_MISSION_TIME_WEIGHT: u32 = 1;

/// Weight of the external RTC in the drift correction average.
pub const RTC_EXTERNAL_TIME_WEIGHT: u32 = 1;

/// Interval between telemetry archive records.
pub const TELEMETRY_SAVE_PERIOD: Duration = Duration::from_secs(30);

/// Size at which the current telemetry archive is rotated.
pub const TELEMETRY_MAX_FILE_SIZE: u64 = 64 * 1024;

/// Fibonacci terms computed by the example experiment.
pub const FIBO_DEFAULT_ITERATIONS: u32 = 10;

/// Tunable mission parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    #[serde(with = "duration_ms")]
    pub tick_period: Duration,
    #[serde(with = "duration_ms")]
    pub antenna_deployment_threshold: Duration,
    #[serde(with = "duration_ms")]
    pub antenna_step_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub antenna_auto_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub sail_deployment_threshold: Duration,
    #[serde(with = "duration_ms")]
    pub clock_notification_period: Duration,
    #[serde(with = "duration_ms")]
    pub clock_save_period: Duration,
    #[serde(with = "duration_ms")]
    pub rtc_correction_period: Duration,
    pub rtc_mission_time_weight: u32,
    pub rtc_external_time_weight: u32,
    #[serde(with = "duration_ms")]
    pub telemetry_save_period: Duration,
    pub telemetry_max_file_size: u64,
    pub fibo_iterations: u32,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            tick_period: TICK_PERIOD,
            antenna_deployment_threshold: ANTENNA_DEPLOYMENT_THRESHOLD,
            antenna_step_timeout: ANTENNA_STEP_TIMEOUT,
            antenna_auto_timeout: ANTENNA_AUTO_TIMEOUT,
            sail_deployment_threshold: SAIL_DEPLOYMENT_THRESHOLD,
            clock_notification_period: CLOCK_NOTIFICATION_PERIOD,
            clock_save_period: CLOCK_SAVE_PERIOD,
            rtc_correction_period: RTC_CORRECTION_PERIOD,
            rtc_mission_time_weight: RTC_MISSION_TIME_WEIGHT,
            rtc_external_time_weight: RTC_EXTERNAL_TIME_WEIGHT,
            telemetry_save_period: TELEMETRY_SAVE_PERIOD,
            telemetry_max_file_size: TELEMETRY_MAX_FILE_SIZE,
            fibo_iterations: FIBO_DEFAULT_ITERATIONS,
        }
    }
}

impl MissionConfig {
    /// Parse a JSON document. Absent fields take their defaults.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
