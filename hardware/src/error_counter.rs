//! Per-device error counting for fault detection, isolation and recovery.
//!
//! Every driver reports the outcome of its transactions here. A failure adds
//! the device's `increment` to its counter, a success subtracts `decrement`.
//! When the counter reaches `limit` the registered [`LimitHandler`] is called,
//! once per rising crossing, and the counter stays clamped at `limit` until
//! successes bring it back down.
//!
//! Drivers use the scoped [`ErrorReporter`]:
//!
//! ```
//! use std::sync::Arc;
//! use hardware::error_counter::{Device, ErrorCounting, NoopLimitHandler};
//!
//! let counting = ErrorCounting::new(Arc::new(NoopLimitHandler));
//! {
//!     let mut reporter = counting.reporter(Device::Eps);
//!     reporter.failure();
//! } // failure reported here
//! assert_eq!(counting.current(Device::Eps), 5);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use strum::{EnumCount, EnumIter, IntoEnumIterator, IntoStaticStr};
use tracing::{debug, error};

/// Saturating per-device error count.
pub type CounterValue = u8;

/// Devices that own an error counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumCount, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Device {
    Comm,
    Eps,
    AntennaPrimary,
    AntennaBackup,
    Imtq,
    Payload,
    Rtc,
    Fram0,
    Fram1,
    Fram2,
    Gyro,
    Camera,
    SunSensor,
    Nand,
    Magnetometer,
}

/// Number of counters in the table.
pub const DEVICE_COUNT: usize = Device::COUNT;

impl Device {
    /// Position in the counter table.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Bit of this device in an escalation mask.
    pub fn mask_bit(self) -> u16 {
        1 << self.index()
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn all() -> impl Iterator<Item = Device> {
        Device::iter()
    }
}

/// Counting policy of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPolicy {
    pub limit: CounterValue,
    pub increment: CounterValue,
    pub decrement: CounterValue,
}

impl ErrorPolicy {
    pub const DEFAULT_LIMIT: CounterValue = 128;
    pub const DEFAULT_INCREMENT: CounterValue = 5;
    pub const DEFAULT_DECREMENT: CounterValue = 2;

    pub const fn new(
        limit: CounterValue,
        increment: CounterValue,
        decrement: CounterValue,
    ) -> Self {
        Self {
            limit,
            increment,
            decrement,
        }
    }

    /// Pack as `limit | increment << 8 | decrement << 16`.
    pub const fn encode(self) -> u32 {
        self.limit as u32 | (self.increment as u32) << 8 | (self.decrement as u32) << 16
    }

    /// Inverse of [`encode`](Self::encode). The top byte is ignored.
    pub const fn decode(raw: u32) -> Self {
        Self {
            limit: (raw & 0xff) as u8,
            increment: ((raw >> 8) & 0xff) as u8,
            decrement: ((raw >> 16) & 0xff) as u8,
        }
    }
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_LIMIT,
            Self::DEFAULT_INCREMENT,
            Self::DEFAULT_DECREMENT,
        )
    }
}

/// Reaction to a counter reaching its limit.
///
/// Called without any counter lock held.
pub trait LimitHandler: Send + Sync {
    fn limit_reached(&self, device: Device, value: CounterValue);
}

/// Handler that only logs. Useful before the real handler is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLimitHandler;

impl LimitHandler for NoopLimitHandler {
    fn limit_reached(&self, device: Device, value: CounterValue) {
        debug!("Error limit reached for {} ({value}), no handler", device.name());
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CounterEntry {
    current: CounterValue,
    policy: ErrorPolicy,
    above_limit: bool,
}

/// Table of per-device error counters.
pub struct ErrorCounting {
    entries: Mutex<[CounterEntry; DEVICE_COUNT]>,
    handler: Arc<dyn LimitHandler>,
}

impl ErrorCounting {
    /// Create a table with default policies.
    pub fn new(handler: Arc<dyn LimitHandler>) -> Self {
        Self {
            entries: Mutex::new([CounterEntry::default(); DEVICE_COUNT]),
            handler,
        }
    }

    /// Record a failure.
    pub fn failure(&self, device: Device) {
        let crossed = {
            let mut entries = self.entries();
            let entry = &mut entries[device.index()];
            entry.current = entry.current.saturating_add(entry.policy.increment);

            if entry.current >= entry.policy.limit {
                entry.current = entry.policy.limit;
                let rising = !entry.above_limit;
                entry.above_limit = true;
                rising.then_some(entry.current)
            } else {
                None
            }
        };

        if let Some(value) = crossed {
            error!("Error counter for {} reached its limit ({value})", device.name());
            self.handler.limit_reached(device, value);
        }
    }

    /// Record a success.
    pub fn success(&self, device: Device) {
        let mut entries = self.entries();
        let entry = &mut entries[device.index()];
        entry.current = entry.current.saturating_sub(entry.policy.decrement);
        if entry.current < entry.policy.limit {
            entry.above_limit = false;
        }
    }

    /// Current counter value.
    pub fn current(&self, device: Device) -> CounterValue {
        self.entries()[device.index()].current
    }

    /// All counter values, indexed by [`Device::index`].
    pub fn values(&self) -> [CounterValue; DEVICE_COUNT] {
        let entries = *self.entries();
        entries.map(|entry| entry.current)
    }

    pub fn policy(&self, device: Device) -> ErrorPolicy {
        self.entries()[device.index()].policy
    }

    /// Replace the policy of one device. The counter value is kept.
    pub fn set_policy(&self, device: Device, policy: ErrorPolicy) {
        self.entries()[device.index()].policy = policy;
    }

    /// Scoped reporter bound to `device`.
    pub fn reporter(&self, device: Device) -> ErrorReporter<'_> {
        ErrorReporter {
            counting: self,
            device,
            failed: false,
        }
    }

    fn entries(&self) -> MutexGuard<'_, [CounterEntry; DEVICE_COUNT]> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reports exactly one outcome for a device when dropped.
///
/// The outcome is a failure if [`failure`](Self::failure) was called at least
/// once, a success otherwise.
pub struct ErrorReporter<'a> {
    counting: &'a ErrorCounting,
    device: Device,
    failed: bool,
}

impl ErrorReporter<'_> {
    pub fn device(&self) -> Device {
        self.device
    }

    /// Mark the scope as failed.
    pub fn failure(&mut self) {
        self.failed = true;
    }

    /// Mark the scope as failed if `result` is an error, and pass it through.
    pub fn track<T, E>(&mut self, result: Result<T, E>) -> Result<T, E> {
        if result.is_err() {
            self.failed = true;
        }
        result
    }
}

impl Drop for ErrorReporter<'_> {
    fn drop(&mut self) {
        if self.failed {
            self.counting.failure(self.device);
        } else {
            self.counting.success(self.device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicUsize,
    }

    impl LimitHandler for CountingHandler {
        fn limit_reached(&self, _device: Device, _value: CounterValue) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting() -> (ErrorCounting, Arc<CountingHandler>) {
        let handler = Arc::new(CountingHandler::default());
        (ErrorCounting::new(handler.clone()), handler)
    }

    #[test]
    fn test_policy_encoding() {
        let policy = ErrorPolicy::new(128, 5, 2);
        assert_eq!(policy.encode(), 128 | 5 << 8 | 2 << 16);
        assert_eq!(ErrorPolicy::decode(policy.encode()), policy);
        assert_eq!(ErrorPolicy::default(), policy);
    }

    #[test]
    fn test_failure_and_success_arithmetic() {
        let (counting, _) = counting();

        counting.failure(Device::Eps);
        counting.failure(Device::Eps);
        assert_eq!(counting.current(Device::Eps), 10);

        counting.success(Device::Eps);
        assert_eq!(counting.current(Device::Eps), 8);

        for _ in 0..10 {
            counting.success(Device::Eps);
        }
        assert_eq!(counting.current(Device::Eps), 0);
    }

    #[test]
    fn test_limit_crossing_calls_handler_once() {
        let (counting, handler) = counting();
        counting.set_policy(Device::Imtq, ErrorPolicy::new(10, 5, 2));

        counting.failure(Device::Imtq);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        counting.failure(Device::Imtq);
        assert_eq!(counting.current(Device::Imtq), 10);
        counting.failure(Device::Imtq);

        assert_eq!(counting.current(Device::Imtq), 10);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_rearms_after_dropping_below_limit() {
        let (counting, handler) = counting();
        counting.set_policy(Device::Gyro, ErrorPolicy::new(10, 5, 2));

        counting.failure(Device::Gyro);
        counting.failure(Device::Gyro);
        counting.success(Device::Gyro);
        assert_eq!(counting.current(Device::Gyro), 8);
        counting.failure(Device::Gyro);

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_saturating_counter_with_large_limit() {
        let (counting, handler) = counting();
        counting.set_policy(Device::Nand, ErrorPolicy::new(255, 200, 1));

        counting.failure(Device::Nand);
        counting.failure(Device::Nand);
        assert_eq!(counting.current(Device::Nand), 255);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_counters_are_independent() {
        let (counting, _) = counting();
        counting.failure(Device::Comm);

        assert_eq!(counting.current(Device::Comm), 5);
        assert_eq!(counting.current(Device::Payload), 0);
        assert_eq!(counting.values()[Device::Comm.index()], 5);
    }

    #[test]
    fn test_reporter_reports_success_by_default() {
        let (counting, _) = counting();
        counting.failure(Device::Rtc);
        {
            let _reporter = counting.reporter(Device::Rtc);
        }
        assert_eq!(counting.current(Device::Rtc), 3);
    }

    #[test]
    fn test_reporter_reports_single_failure() {
        let (counting, _) = counting();
        {
            let mut reporter = counting.reporter(Device::Camera);
            reporter.failure();
            reporter.failure();
            let _ = reporter.track::<(), ()>(Err(()));
        }
        assert_eq!(counting.current(Device::Camera), 5);
    }

    #[test]
    fn test_device_names_and_bits() {
        assert_eq!(Device::AntennaPrimary.name(), "antenna_primary");
        assert_eq!(Device::Comm.mask_bit(), 1);
        assert_eq!(Device::all().count(), DEVICE_COUNT);
    }
}
