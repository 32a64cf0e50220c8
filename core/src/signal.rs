//! Binary signal: a single-slot, single-consumer wakeup carrying a value.
//!
//! Behaves like a binary semaphore: giving a signal that already holds a
//! value is a no-op, so the first event wins. Taking empties the slot.
//! One give resolves at most one take.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

pub struct BinarySignal<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> BinarySignal<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Store `value` and wake the waiter. Returns `false`, dropping
    /// `value`, when a value is already pending.
    pub fn give(&self, value: T) -> bool {
        {
            let mut slot = self.slot.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
        }
        self.notify.notify_one();
        true
    }

    /// Take the value if one is pending, without waiting.
    pub fn try_take(&self) -> Option<T> {
        self.slot.lock().take()
    }

    /// Whether a value is waiting to be taken
    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Drop any pending value.
    pub fn reset(&self) {
        self.slot.lock().take();
    }

    /// Wait until a value is given.
    pub async fn take(&self) -> T {
        loop {
            // Register interest before checking the slot so a concurrent
            // give cannot slip between the check and the wait.
            let notified = self.notify.notified();
            if let Some(value) = self.try_take() {
                return value;
            }
            notified.await;
        }
    }

    /// Wait for a value for at most `timeout`.
    pub async fn take_timeout(&self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.take()).await.ok()
    }
}

impl<T> Default for BinarySignal<T> {
    fn default() -> Self {
        Self::new()
    }
}
