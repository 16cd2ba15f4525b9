//! Persistent mission clock.
//!
//! The clock is advanced externally (typically once per second). Every
//! advance that crosses the notification period invokes the time-passed
//! callback and fires the tick pulse; every advance that crosses the save
//! period writes the time to three files. On boot the three copies are
//! majority-voted.
//!
//! Two locks are involved. The timer lock guards the counters and is held
//! only for arithmetic. The notification lock serialises the notify-and-save
//! tail so two advances never write the files concurrently.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use shared::fs::{read_exact, FileSystem};
use shared::sync::Pulse;
use tracing::{debug, info, warn};

use super::{CurrentTime, TimePoint};
use crate::config::MissionConfig;

/// Redundant copies of the persisted mission time.
pub const TIME_FILES: [&str; 3] = ["/time0", "/time1", "/time2"];

/// Save attempts before giving up on a tick.
const SAVE_ATTEMPTS: usize = 3;

/// Longest a waiter sleeps before re-reading the clock.
const WAIT_RECHECK: Duration = Duration::from_secs(1);

/// Called with the new mission time whenever a notification period elapses.
pub type TimePassedCallback = Box<dyn Fn(TimePoint) + Send + Sync>;

/// Value held by at least two of three copies, else the smallest.
pub fn majority_vote(values: [u64; 3]) -> u64 {
    let [a, b, c] = values;
    if a == b || a == c {
        a
    } else if b == c {
        b
    } else {
        a.min(b).min(c)
    }
}

#[derive(Debug, Default)]
struct TimerCounters {
    current: Duration,
    since_notification: Duration,
    since_save: Duration,
}

/// What the tail of an update has to do.
#[derive(Debug, Clone, Copy)]
struct TimerState {
    time: Duration,
    send_notification: bool,
    save_time: bool,
}

/// Mission clock with triple-redundant persistence.
pub struct TimeProvider {
    fs: Arc<dyn FileSystem>,
    timer: Mutex<TimerCounters>,
    notification: Mutex<Option<TimePassedCallback>>,
    tick: Pulse,
    notification_period: Duration,
    save_period: Duration,
}

impl TimeProvider {
    /// Create the clock, starting from the persisted mission time.
    pub fn new(fs: Arc<dyn FileSystem>, config: &MissionConfig) -> Self {
        let recovered = Self::recover_persisted(fs.as_ref());
        info!("Mission time recovered: {:?}", TimePoint::from_duration(recovered));

        Self {
            fs,
            timer: Mutex::new(TimerCounters {
                current: recovered,
                ..Default::default()
            }),
            notification: Mutex::new(None),
            tick: Pulse::new(),
            notification_period: config.clock_notification_period,
            save_period: config.clock_save_period,
        }
    }

    /// Register the time-passed callback, replacing any previous one.
    pub fn set_time_passed_callback(&self, callback: TimePassedCallback) {
        *self.notification() = Some(callback);
    }

    /// Pulse fired on every notification.
    pub fn tick(&self) -> &Pulse {
        &self.tick
    }

    /// Read one persisted copy. Missing or short files read as `None`.
    pub fn read_persisted(fs: &dyn FileSystem, path: &str) -> Option<u64> {
        match read_exact::<8>(fs, path) {
            Ok(bytes) => Some(u64::from_le_bytes(bytes)),
            Err(e) => {
                warn!("Unable to read mission time from {path}: {e}");
                None
            }
        }
    }

    /// Majority-voted persisted mission time. Unreadable copies count as zero.
    pub fn recover_persisted(fs: &dyn FileSystem) -> Duration {
        let values = TIME_FILES.map(|path| Self::read_persisted(fs, path).unwrap_or(0));
        Duration::from_millis(majority_vote(values))
    }

    /// Block until mission time reaches `target`.
    ///
    /// Returns `false` if the clock stops reporting time.
    pub fn wait_until(&self, target: Duration) -> bool {
        loop {
            match self.get_current_time() {
                None => return false,
                Some(now) if now >= target => return true,
                Some(_) => {
                    self.tick
                        .wait(Some(self.notification_period.min(WAIT_RECHECK)));
                }
            }
        }
    }

    /// Block until `delay` of mission time has passed.
    pub fn long_delay(&self, delay: Duration) -> bool {
        match self.get_current_time() {
            Some(now) => self.wait_until(now + delay),
            None => false,
        }
    }

    fn timer(&self) -> MutexGuard<'_, TimerCounters> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notification(&self) -> MutexGuard<'_, Option<TimePassedCallback>> {
        self.notification
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn build_timer_state(&self, counters: &mut TimerCounters) -> TimerState {
        let state = TimerState {
            time: counters.current,
            send_notification: self.notification_period < counters.since_notification,
            save_time: self.save_period < counters.since_save,
        };

        if state.send_notification {
            counters.since_notification = Duration::ZERO;
        }
        if state.save_time {
            counters.since_save = Duration::ZERO;
        }
        state
    }

    fn process_change(&self, state: TimerState) {
        let callback = self.notification();

        if state.send_notification {
            if let Some(callback) = callback.as_ref() {
                callback(TimePoint::from_duration(state.time));
            }
            self.tick.set();
        }

        if state.save_time {
            self.save_time(state.time);
        }
    }

    fn save_time(&self, time: Duration) {
        let data = (time.as_millis() as u64).to_le_bytes();
        let mut total_errors = 0;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let errors = TIME_FILES
                .iter()
                .filter(|path| match self.fs.write(path, &data) {
                    Ok(()) => false,
                    Err(e) => {
                        debug!("Unable to save mission time to {path}: {e}");
                        true
                    }
                })
                .count();
            total_errors += errors;

            if errors <= 1 || attempts >= SAVE_ATTEMPTS {
                break;
            }
        }

        if total_errors > 0 {
            warn!("Mission time save hit {total_errors} errors over {attempts} attempts");
        }
    }
}

impl CurrentTime for TimeProvider {
    fn get_current_time(&self) -> Option<Duration> {
        Some(self.timer().current)
    }

    /// Refuses to move time backwards.
    fn set_current_time(&self, time: TimePoint) -> bool {
        let target = time.to_duration();
        let state = {
            let mut counters = self.timer();
            if target < counters.current {
                warn!(
                    "Refusing to move mission time back from {:?} to {:?}",
                    counters.current, target
                );
                return false;
            }

            counters.current = target;
            counters.since_notification = self.notification_period + Duration::from_millis(1);
            counters.since_save = self.save_period + Duration::from_millis(1);
            self.build_timer_state(&mut counters)
        };

        self.process_change(state);
        true
    }

    fn advance_time(&self, delta: Duration) {
        let state = {
            let mut counters = self.timer();
            counters.current += delta;
            counters.since_notification += delta;
            counters.since_save += delta;
            self.build_timer_state(&mut counters)
        };

        self.process_change(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::fs::MemoryFileSystem;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn persist(fs: &MemoryFileSystem, values: [u64; 3]) {
        for (path, value) in TIME_FILES.iter().zip(values) {
            fs.insert(path, &value.to_le_bytes());
        }
    }

    fn stored(fs: &MemoryFileSystem, path: &str) -> Option<u64> {
        TimeProvider::read_persisted(fs, path)
    }

    fn provider(fs: Arc<MemoryFileSystem>) -> TimeProvider {
        TimeProvider::new(fs, &MissionConfig::default())
    }

    #[test]
    fn test_majority_vote() {
        assert_eq!(majority_vote([100, 100, 7]), 100);
        assert_eq!(majority_vote([7, 100, 100]), 100);
        assert_eq!(majority_vote([100, 7, 100]), 100);
        assert_eq!(majority_vote([100, 7, 50]), 7);
        assert_eq!(majority_vote([5, 5, 5]), 5);
    }

    #[test]
    fn test_recovery_votes_files() {
        let fs = Arc::new(MemoryFileSystem::new());
        persist(&fs, [100, 100, 7]);
        assert_eq!(
            provider(fs.clone()).get_current_time(),
            Some(Duration::from_millis(100))
        );

        persist(&fs, [100, 7, 50]);
        assert_eq!(
            provider(fs).get_current_time(),
            Some(Duration::from_millis(7))
        );
    }

    #[test]
    fn test_recovery_treats_missing_and_short_files_as_zero() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.insert("/time0", &500u64.to_le_bytes());
        fs.insert("/time1", &[1, 2, 3]);
        // Copies: 500, 0, 0.
        assert_eq!(provider(fs).get_current_time(), Some(Duration::ZERO));
    }

    #[test]
    fn test_recovery_single_surviving_pair() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.insert("/time1", &900u64.to_le_bytes());
        fs.insert("/time2", &900u64.to_le_bytes());
        assert_eq!(
            provider(fs).get_current_time(),
            Some(Duration::from_millis(900))
        );
    }

    #[test]
    fn test_advance_is_monotonic() {
        let clock = provider(Arc::new(MemoryFileSystem::new()));
        let mut last = clock.get_current_time().unwrap();
        for step in [1, 0, 250, 1000, 7] {
            clock.advance_time(Duration::from_millis(step));
            let now = clock.get_current_time().unwrap();
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, Duration::from_millis(1258));
    }

    #[test]
    fn test_notification_after_period_elapses() {
        let clock = provider(Arc::new(MemoryFileSystem::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        clock.set_time_passed_callback(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        // The period has to be strictly exceeded.
        clock.advance_time(Duration::from_secs(10));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        clock.advance_time(Duration::from_millis(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance_time(Duration::from_secs(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_save_after_period_elapses() {
        let fs = Arc::new(MemoryFileSystem::new());
        let clock = provider(fs.clone());

        clock.advance_time(Duration::from_secs(15 * 60));
        assert_eq!(stored(&fs, "/time0"), None);

        clock.advance_time(Duration::from_secs(1));
        for path in TIME_FILES {
            assert_eq!(stored(&fs, path), Some(901_000));
        }
    }

    #[test]
    fn test_set_current_time_saves_and_notifies_immediately() {
        let fs = Arc::new(MemoryFileSystem::new());
        let clock = provider(fs.clone());
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        clock.set_time_passed_callback(Box::new(move |point| {
            *sink.lock().unwrap() = Some(point);
        }));

        let target = TimePoint::new(1, 2, 3, 4, 5);
        assert!(clock.set_current_time(target));

        assert_eq!(*seen.lock().unwrap(), Some(target));
        assert_eq!(
            stored(&fs, "/time2"),
            Some(target.to_duration().as_millis() as u64)
        );
        assert_eq!(clock.get_current_mission_time(), Some(target));
    }

    #[test]
    fn test_set_current_time_refuses_going_backwards() {
        let fs = Arc::new(MemoryFileSystem::new());
        persist(&fs, [60_000, 60_000, 60_000]);
        let clock = provider(fs);

        assert!(!clock.set_current_time(TimePoint::new(0, 0, 0, 30, 0)));
        assert_eq!(clock.get_current_time(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_save_tolerates_one_failing_copy() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.fail_writes("/time1");
        let clock = provider(fs.clone());

        clock.set_current_time(TimePoint::new(0, 0, 0, 42, 0));
        assert_eq!(stored(&fs, "/time0"), Some(42_000));
        assert_eq!(stored(&fs, "/time1"), None);
        assert_eq!(stored(&fs, "/time2"), Some(42_000));

        // Still recovers through the two healthy copies.
        assert_eq!(TimeProvider::recover_persisted(fs.as_ref()), Duration::from_secs(42));
    }

    #[test]
    fn test_save_gives_up_when_majority_fails() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.fail_writes("/time0");
        fs.fail_writes("/time1");
        let clock = provider(fs.clone());

        clock.set_current_time(TimePoint::new(0, 0, 1, 0, 0));
        assert_eq!(stored(&fs, "/time2"), Some(60_000));
        assert_eq!(stored(&fs, "/time0"), None);
    }

    #[test]
    fn test_wait_until_returns_when_time_reached() {
        let config = MissionConfig {
            clock_notification_period: Duration::from_millis(500),
            ..Default::default()
        };
        let clock = Arc::new(TimeProvider::new(Arc::new(MemoryFileSystem::new()), &config));
        let advancer = clock.clone();

        let handle = thread::spawn(move || {
            for _ in 0..30 {
                thread::sleep(Duration::from_millis(2));
                advancer.advance_time(Duration::from_secs(1));
            }
        });

        assert!(clock.wait_until(Duration::from_secs(25)));
        assert!(clock.get_current_time().unwrap() >= Duration::from_secs(25));
        handle.join().unwrap();
    }

    #[test]
    fn test_long_delay_already_elapsed_target() {
        let clock = provider(Arc::new(MemoryFileSystem::new()));
        assert!(clock.long_delay(Duration::ZERO));
    }
}
