use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

#[derive(Debug)]
struct Slot<T> {
    item: Option<T>,
    closed: bool,
}

/// Single-slot queue with overwrite semantics.
///
/// A writer never blocks: a pending item that has not been consumed yet is
/// replaced. Closing the mailbox releases a blocked reader.
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Mutex<Slot<T>>,
    available: Condvar,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                item: None,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Store `item`, replacing whatever is pending.
    pub fn overwrite(&self, item: T) {
        if self.lock().item.replace(item).is_some() {
            trace!("Mailbox item replaced before it was consumed");
        }
        self.available.notify_one();
    }

    /// Take the pending item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.lock().item.take()
    }

    /// Wait for an item.
    ///
    /// Returns `None` on timeout, or once the mailbox is closed and empty.
    pub fn pop(&self, timeout: Option<Duration>) -> Option<T> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut slot = self.lock();

        loop {
            if let Some(item) = slot.item.take() {
                return Some(item);
            }
            if slot.closed {
                return None;
            }

            slot = match deadline {
                None => self
                    .available
                    .wait(slot)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.available
                        .wait_timeout(slot, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Release blocked readers. Later pops drain a pending item, then return `None`.
    pub fn close(&self) {
        let pending = {
            let mut slot = self.lock();
            slot.closed = true;
            slot.item.is_some()
        };
        debug!("Mailbox closed (item pending: {pending})");
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_overwrite_keeps_latest() {
        let mailbox = Mailbox::new();
        mailbox.overwrite(1);
        mailbox.overwrite(2);

        assert_eq!(mailbox.try_pop(), Some(2));
        assert_eq!(mailbox.try_pop(), None);
    }

    #[test]
    fn test_pop_times_out_when_empty() {
        let mailbox = Mailbox::<u8>::new();
        assert_eq!(mailbox.pop(Some(Duration::from_millis(10))), None);
    }

    #[test]
    fn test_pop_blocks_until_item() {
        let mailbox = Arc::new(Mailbox::new());
        let writer = Arc::clone(&mailbox);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.overwrite("fibo");
        });

        assert_eq!(mailbox.pop(Some(Duration::from_secs(5))), Some("fibo"));
        handle.join().unwrap();
    }

    #[test]
    fn test_close_releases_reader() {
        let mailbox = Arc::new(Mailbox::<u8>::new());
        let closer = Arc::clone(&mailbox);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            closer.close();
        });

        assert_eq!(mailbox.pop(None), None);
        assert!(mailbox.is_closed());
        handle.join().unwrap();
    }

    #[test]
    fn test_close_drains_pending_item_first() {
        let mailbox = Mailbox::new();
        mailbox.overwrite(7u8);
        mailbox.close();

        assert_eq!(mailbox.pop(None), Some(7));
        assert_eq!(mailbox.pop(None), None);
    }
}
