use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Broadcast wake-up.
///
/// Every thread blocked in [`wait`](Self::wait) when [`set`](Self::set) is
/// called is released. A pulse with no waiters is not remembered.
#[derive(Debug, Default)]
pub struct Pulse {
    generation: Mutex<u64>,
    fired: Condvar,
}

impl Pulse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release all current waiters.
    pub fn set(&self) {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *generation = generation.wrapping_add(1);
        self.fired.notify_all();
    }

    /// Wait for the next pulse. Returns `false` on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = *generation;

        while *generation == entry {
            match deadline {
                None => {
                    generation = self
                        .fired
                        .wait(generation)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    generation = self
                        .fired
                        .wait_timeout(generation, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_times_out_without_pulse() {
        let pulse = Pulse::new();
        assert!(!pulse.wait(Some(Duration::from_millis(10))));
    }

    #[test]
    fn test_pulse_before_wait_is_not_remembered() {
        let pulse = Pulse::new();
        pulse.set();
        assert!(!pulse.wait(Some(Duration::from_millis(10))));
    }

    #[test]
    fn test_pulse_releases_all_waiters() {
        let pulse = Arc::new(Pulse::new());

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let pulse = Arc::clone(&pulse);
                thread::spawn(move || pulse.wait(Some(Duration::from_secs(5))))
            })
            .collect();

        // Keep pulsing until every waiter has observed one.
        while !waiters.iter().all(|handle| handle.is_finished()) {
            pulse.set();
            thread::sleep(Duration::from_millis(5));
        }

        for handle in waiters {
            assert!(handle.join().unwrap());
        }
    }
}
