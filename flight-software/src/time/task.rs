use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hardware::rtc::Rtc;
use tracing::{debug, info, warn};

use super::{CurrentTime, TimePoint};
use crate::config::MissionConfig;
use crate::mission::{Action, ActionDescriptor, Update, UpdateDescriptor, UpdateResult};
use crate::state::SystemState;

/// Mission time and RTC reading taken at the same moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reference {
    mission: Duration,
    rtc: Duration,
}

/// Publishes mission time into the snapshot and corrects clock drift against
/// the external RTC.
///
/// Every correction period the time elapsed on the mission clock since the
/// last reference is averaged with the time elapsed on the RTC, using the
/// configured weights. The clock is only ever moved forward.
pub struct TimeTask {
    clock: Arc<dyn CurrentTime>,
    rtc: Arc<dyn Rtc>,
    reference: Mutex<Option<Reference>>,
    period: Duration,
    mission_weight: u32,
    external_weight: u32,
}

impl TimeTask {
    pub fn new(clock: Arc<dyn CurrentTime>, rtc: Arc<dyn Rtc>, config: &MissionConfig) -> Self {
        Self {
            clock,
            rtc,
            reference: Mutex::new(None),
            period: config.rtc_correction_period,
            mission_weight: config.rtc_mission_time_weight,
            external_weight: config.rtc_external_time_weight,
        }
    }

    pub fn build_update(self: &Arc<Self>) -> UpdateDescriptor<SystemState> {
        UpdateDescriptor::new("Time", self.clone())
    }

    pub fn build_action(self: &Arc<Self>) -> ActionDescriptor<SystemState> {
        ActionDescriptor::new("Correct time", self.clone())
    }

    fn reference(&self) -> MutexGuard<'_, Option<Reference>> {
        self.reference.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Weighted average of the two elapsed spans.
    fn corrected_delta(&self, mission: Duration, external: Duration) -> Duration {
        let weights = u128::from(self.mission_weight) + u128::from(self.external_weight);
        if weights == 0 {
            return mission;
        }

        let average = (mission.as_millis() * u128::from(self.mission_weight)
            + external.as_millis() * u128::from(self.external_weight))
            / weights;
        Duration::from_millis(average as u64)
    }
}

impl Update<SystemState> for TimeTask {
    fn update(&self, state: &mut SystemState) -> UpdateResult {
        match self.clock.get_current_time() {
            Some(time) => {
                state.time = time;
                UpdateResult::Ok
            }
            None => UpdateResult::Warning,
        }
    }
}

impl Action<SystemState> for TimeTask {
    fn condition(&self, state: &SystemState) -> bool {
        match *self.reference() {
            None => true,
            Some(reference) => state.time.saturating_sub(reference.mission) >= self.period,
        }
    }

    fn execute(&self, state: &SystemState) {
        let external = match self.rtc.read_time() {
            Ok(time) => time,
            Err(e) => {
                warn!("Unable to read RTC: {e}");
                return;
            }
        };
        let now = self.clock.get_current_time().unwrap_or(state.time);

        let mut reference = self.reference();
        let Some(previous) = *reference else {
            debug!("RTC reference set: mission {now:?}, rtc {external:?}");
            *reference = Some(Reference {
                mission: now,
                rtc: external,
            });
            return;
        };

        let mission_delta = now.saturating_sub(previous.mission);
        let external_delta = external.saturating_sub(previous.rtc);
        let corrected = previous.mission + self.corrected_delta(mission_delta, external_delta);

        let mut mission = now;
        if corrected > now {
            info!("Correcting mission time by {:?}", corrected - now);
            if self.clock.set_current_time(TimePoint::from_duration(corrected)) {
                mission = corrected;
            }
        } else {
            debug!(
                "Mission time ahead of RTC estimate by {:?}, not corrected",
                now - corrected
            );
        }

        *reference = Some(Reference {
            mission,
            rtc: external,
        });
    }
}
