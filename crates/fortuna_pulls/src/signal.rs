//! One-shot completion slot shared between a worker thread and waiters.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Holds a value once a worker finishes, and wakes everyone waiting for it.
#[derive(Debug)]
pub struct Completion<T> {
    value: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T: Clone> Completion<T> {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Stores the value. The first completion wins.
    pub fn complete(&self, value: T) {
        let mut slot = self.value.lock();
        if slot.is_none() {
            *slot = Some(value);
        }
        self.ready.notify_all();
    }

    /// Waits until the value is available.
    pub fn wait(&self) -> T {
        let mut slot = self.value.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return value.clone();
            }
            self.ready.wait(&mut slot);
        }
    }

    /// Waits at most `timeout`. Returns `None` if the value is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.value.lock();
        while slot.is_none() {
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.clone()
    }

    /// Returns the value without waiting.
    pub fn peek(&self) -> Option<T> {
        self.value.lock().clone()
    }
}

impl<T: Clone> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_sees_value_from_other_thread() {
        let completion = Arc::new(Completion::new());
        let worker = {
            let completion = Arc::clone(&completion);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                completion.complete(7u32);
            })
        };
        assert_eq!(completion.wait(), 7);
        worker.join().unwrap();
    }

    #[test]
    fn test_timeout_and_first_write_wins() {
        let completion = Completion::new();
        assert_eq!(completion.wait_timeout(Duration::from_millis(5)), None);
        completion.complete("first");
        completion.complete("second");
        assert_eq!(completion.peek(), Some("first"));
        assert_eq!(completion.wait_timeout(Duration::from_millis(5)), Some("first"));
    }
}
