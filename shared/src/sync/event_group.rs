use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bitflags::Flags;

/// Upper bound on how long a waiter can miss a bit set from interrupt context.
const ISR_POLL_PERIOD: Duration = Duration::from_millis(10);

/// Condition a waiter needs before it is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Any bit of the mask is set.
    Any,
    /// Every bit of the mask is set.
    All,
}

/// Typed event flags with blocking waits.
///
/// Bits live in an atomic word, so reads and updates never block. The mutex
/// only serialises waiters against the condition variable.
pub struct EventGroup<F> {
    bits: AtomicU32,
    lock: Mutex<()>,
    changed: Condvar,
    _flags: PhantomData<F>,
}

impl<F> Default for EventGroup<F>
where
    F: Flags<Bits = u32> + Copy,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<F> EventGroup<F>
where
    F: Flags<Bits = u32> + Copy,
{
    pub fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
            lock: Mutex::new(()),
            changed: Condvar::new(),
            _flags: PhantomData,
        }
    }

    /// Current flag value.
    pub fn get(&self) -> F {
        F::from_bits_retain(self.bits.load(Ordering::Acquire))
    }

    /// Set bits and wake all waiters. Returns the value after the update.
    pub fn set(&self, flags: F) -> F {
        let previous = self.bits.fetch_or(flags.bits(), Ordering::AcqRel);
        drop(self.lock.lock().unwrap_or_else(PoisonError::into_inner));
        self.changed.notify_all();
        F::from_bits_retain(previous | flags.bits())
    }

    /// Set bits without taking any lock.
    ///
    /// Safe to call from contexts that must not block. Waiters observe the
    /// change on their next poll, at most [`ISR_POLL_PERIOD`] later.
    pub fn set_from_isr(&self, flags: F) -> F {
        let previous = self.bits.fetch_or(flags.bits(), Ordering::AcqRel);
        self.changed.notify_all();
        F::from_bits_retain(previous | flags.bits())
    }

    /// Clear bits. Returns the value before the update.
    pub fn clear(&self, flags: F) -> F {
        let previous = self.bits.fetch_and(!flags.bits(), Ordering::AcqRel);
        F::from_bits_retain(previous)
    }

    /// Block until `mask` satisfies `mode` or the timeout elapses.
    ///
    /// Returns the flag value observed when the wait ended. Callers test the
    /// returned value to tell a release from a timeout. With `clear_on_exit`
    /// the mask bits are cleared, but only when the condition was met.
    pub fn wait(
        &self,
        mask: F,
        mode: WaitMode,
        clear_on_exit: bool,
        timeout: Option<Duration>,
    ) -> F {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            let current = self.bits.load(Ordering::Acquire);
            if Self::satisfied(current, mask.bits(), mode) {
                if clear_on_exit {
                    self.bits.fetch_and(!mask.bits(), Ordering::AcqRel);
                }
                return F::from_bits_retain(current);
            }

            let mut slice = ISR_POLL_PERIOD;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return F::from_bits_retain(current);
                }
                slice = slice.min(deadline - now);
            }

            guard = self
                .changed
                .wait_timeout(guard, slice)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn satisfied(current: u32, mask: u32, mode: WaitMode) -> bool {
        match mode {
            WaitMode::Any => current & mask != 0,
            WaitMode::All => current & mask == mask,
        }
    }
}
