// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Small synchronisation helpers built on `parking_lot`.

#[cfg(test)]
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Counting semaphore.
#[derive(Debug, Default)]
pub(crate) struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    /// Increments the count and wakes one waiter.
    pub(crate) fn post(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.cond.notify_one();
    }

    /// Blocks until the count is non-zero, then decrements it.
    pub(crate) fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.cond.wait(&mut count);
        }
        *count -= 1;
    }

    /// Like [`Semaphore::wait`] with a timeout. Returns `false` on timeout.
    #[cfg(test)]
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count == 0 {
            if self.cond.wait_until(&mut count, deadline).timed_out() {
                return false;
            }
        }
        *count -= 1;
        true
    }
}

/// Number of buffers handed to an implementation and not yet returned.
///
/// [`TransitCounter::wait_zero`] blocks until the count drops back to zero and
/// wakes exactly when the last buffer comes back.
#[derive(Debug, Default)]
pub(crate) struct TransitCounter {
    count: Mutex<usize>,
    drained: Condvar,
}

impl TransitCounter {
    pub(crate) fn increment(&self) {
        *self.count.lock() += 1;
    }

    pub(crate) fn decrement(&self) {
        let mut count = self.count.lock();
        match count.checked_sub(1) {
            Some(value) => {
                *count = value;
                if value == 0 {
                    self.drained.notify_all();
                }
            }
            None => tracing::error!("in-transit counter underflow"),
        }
    }

    pub(crate) fn get(&self) -> usize {
        *self.count.lock()
    }

    pub(crate) fn wait_zero(&self) {
        let mut count = self.count.lock();
        while *count != 0 {
            self.drained.wait(&mut count);
        }
    }
}
