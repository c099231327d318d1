// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! FIFO queues of buffer headers.

use std::{collections::VecDeque, time::Duration};

use parking_lot::{Condvar, Mutex};

use super::header::BufferHeader;

/// A thread-safe FIFO of buffer headers.
#[derive(Debug, Default)]
pub struct Queue {
    items: Mutex<VecDeque<BufferHeader>>,
    available: Condvar,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header at the tail.
    pub fn put(&self, buffer: BufferHeader) {
        self.items.lock().push_back(buffer);
        self.available.notify_one();
    }

    /// Puts a header back at the head, ahead of everything queued.
    pub fn put_back(&self, buffer: BufferHeader) {
        self.items.lock().push_front(buffer);
        self.available.notify_one();
    }

    /// Takes the header at the head, if any.
    pub fn get(&self) -> Option<BufferHeader> {
        self.items.lock().pop_front()
    }

    /// Blocks until a header is available and takes it.
    pub fn wait(&self) -> BufferHeader {
        let mut items = self.items.lock();
        loop {
            if let Some(buffer) = items.pop_front() {
                return buffer;
            }
            self.available.wait(&mut items);
        }
    }

    /// Like [`Queue::wait`] but gives up after `timeout`.
    pub fn timed_wait(&self, timeout: Duration) -> Option<BufferHeader> {
        let mut items = self.items.lock();
        loop {
            if let Some(buffer) = items.pop_front() {
                return Some(buffer);
            }
            if self.available.wait_for(&mut items, timeout).timed_out() {
                return items.pop_front();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Takes every queued header, in order.
    pub fn drain(&self) -> Vec<BufferHeader> {
        self.items.lock().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;
    use crate::Pool;

    #[test]
    fn put_back_jumps_the_queue() {
        let pool = Pool::new(3, 0).unwrap();
        let queue = Queue::new();
        let first = pool.queue().get().unwrap();
        let second = pool.queue().get().unwrap();
        let urgent = pool.queue().get().unwrap();
        first.set_user_data(1);
        second.set_user_data(2);
        urgent.set_user_data(3);

        queue.put(first);
        queue.put(second);
        queue.put_back(urgent);

        let order: Vec<u64> = queue.drain().iter().map(|b| b.user_data()).collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn timed_wait_gives_up_on_empty_queue() {
        let queue = Queue::new();
        assert!(queue.timed_wait(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn wait_wakes_on_put_from_another_thread() {
        let pool = Pool::new(1, 0).unwrap();
        let queue = Arc::new(Queue::new());
        let buffer = pool.queue().get().unwrap();
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                queue.put(buffer);
            })
        };
        let received = queue.wait();
        assert_eq!(received.ref_count(), 1);
        producer.join().unwrap();
    }
}
