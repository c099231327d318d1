// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Pools of recyclable buffer headers.

use std::{fmt, sync::Arc};

use parking_lot::Mutex;

use super::{
    header::{BufferFields, BufferHeader},
    payload::Payload,
    queue::Queue,
};
use crate::{Port, Result};

/// Called with each header whose last reference was dropped.
///
/// Return the header to have it put back on the pool's free queue, or keep
/// it (e.g. by sending it somewhere) and return `None`. The callback must not
/// drop the header.
pub type PoolCallback = Arc<dyn Fn(&Pool, BufferHeader) -> Option<BufferHeader> + Send + Sync>;

struct PoolState {
    headers_num: usize,
    payload_size: u32,
}

pub(crate) struct PoolInner {
    queue: Queue,
    state: Mutex<PoolState>,
    allocator: Option<Port>,
    callback: Mutex<Option<PoolCallback>>,
}

impl PoolInner {
    pub(crate) fn recycle(pool: &Arc<PoolInner>, buffer: BufferHeader) {
        let callback = pool.callback.lock().clone();
        let buffer = match callback {
            Some(callback) => {
                let handle = Pool { inner: pool.clone() };
                match callback(&handle, buffer) {
                    Some(buffer) => buffer,
                    None => return,
                }
            }
            None => buffer,
        };
        pool.queue.put(buffer);
    }

    fn alloc_payload(&self, size: u32) -> Result<Option<Payload>> {
        match &self.allocator {
            Some(port) => port.payload_alloc(size),
            None if size == 0 => Ok(None),
            None => Ok(Some(Payload::heap(size as usize))),
        }
    }

    fn new_header(self: &Arc<Self>, size: u32) -> Result<BufferHeader> {
        let data = self.alloc_payload(size)?;
        Ok(BufferHeader::new_in(
            Arc::downgrade(self),
            BufferFields {
                alloc_size: if data.is_some() { size } else { 0 },
                data,
                ..Default::default()
            },
        ))
    }
}

/// A fixed set of buffer headers and the queue they are returned to.
///
/// Cloning gives another handle on the same pool.
///
/// # Examples
///
/// ```
/// use mmal::Pool;
///
/// # fn main() -> Result<(), mmal::Error> {
/// let pool = Pool::new(4, 1024)?;
/// let buffer = pool.queue().get().expect("pool is full");
/// assert_eq!(buffer.alloc_size(), 1024);
/// drop(buffer); // back in the pool
/// assert_eq!(pool.queue().len(), 4);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Creates a pool of `num` headers with heap payloads of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfMemory`] if payload allocation fails.
    pub fn new(num: usize, size: u32) -> Result<Pool> {
        Self::build(num, size, None)
    }

    /// Creates a pool whose payloads are allocated through `port`.
    ///
    /// Each payload keeps a reference on the port's component until the pool
    /// is destroyed or resized.
    pub fn for_port(port: &Port, num: usize, size: u32) -> Result<Pool> {
        Self::build(num, size, Some(port.clone()))
    }

    fn build(num: usize, size: u32, allocator: Option<Port>) -> Result<Pool> {
        let inner = Arc::new(PoolInner {
            queue: Queue::new(),
            state: Mutex::new(PoolState {
                headers_num: 0,
                payload_size: size,
            }),
            allocator,
            callback: Mutex::new(None),
        });
        for _ in 0..num {
            let header = inner.new_header(size)?;
            inner.queue.put(header);
            inner.state.lock().headers_num += 1;
        }
        Ok(Pool { inner })
    }

    /// The free queue.
    pub fn queue(&self) -> &Queue {
        &self.inner.queue
    }

    /// Total number of headers owned by the pool.
    pub fn headers_num(&self) -> usize {
        self.inner.state.lock().headers_num
    }

    /// Payload size of each header.
    pub fn payload_size(&self) -> u32 {
        self.inner.state.lock().payload_size
    }

    /// Whether every header is back on the free queue.
    pub fn is_full(&self) -> bool {
        self.queue().len() == self.headers_num()
    }

    /// Sets the release callback.
    pub fn set_callback(&self, callback: PoolCallback) {
        *self.inner.callback.lock() = Some(callback);
    }

    pub fn clear_callback(&self) {
        *self.inner.callback.lock() = None;
    }

    /// Changes the number of headers and their payload size.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::InvalidArg`] if some headers are still in use
    /// - any payload allocation error; the pool keeps its previous headers
    pub fn resize(&self, num: usize, size: u32) -> Result<()> {
        let mut state = self.inner.state.lock();
        if self.inner.queue.len() != state.headers_num {
            tracing::error!(
                "cannot resize pool: {} of {} buffers in use",
                state.headers_num - self.inner.queue.len(),
                state.headers_num
            );
            return Err(crate::Error::InvalidArg);
        }

        let mut headers = self.inner.queue.drain();
        if size != state.payload_size {
            let mut payloads = Vec::with_capacity(headers.len());
            for _ in 0..headers.len() {
                match self.inner.alloc_payload(size) {
                    Ok(payload) => payloads.push(payload),
                    Err(err) => {
                        headers.into_iter().for_each(|h| self.inner.queue.put(h));
                        return Err(err);
                    }
                }
            }
            for (header, payload) in headers.iter().zip(payloads) {
                let mut fields = header.lock();
                fields.alloc_size = if payload.is_some() { size } else { 0 };
                fields.data = payload;
            }
            state.payload_size = size;
        }

        while headers.len() > num {
            if let Some(header) = headers.pop() {
                header.retire();
            }
        }
        while headers.len() < num {
            match self.inner.new_header(size) {
                Ok(header) => headers.push(header),
                Err(err) => {
                    state.headers_num = headers.len();
                    headers.into_iter().for_each(|h| self.inner.queue.put(h));
                    return Err(err);
                }
            }
        }

        state.headers_num = headers.len();
        headers.into_iter().for_each(|h| self.inner.queue.put(h));
        Ok(())
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("headers_num", &self.headers_num())
            .field("free", &self.queue().len())
            .field("payload_size", &self.payload_size())
            .finish()
    }
}

impl PartialEq for Pool {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::Error;

    #[test]
    fn released_header_is_reset_and_returned() {
        let pool = Pool::new(1, 64).unwrap();
        let buffer = pool.queue().get().unwrap();
        buffer.set_length(10);
        buffer.set_user_data(7);
        drop(buffer);

        assert!(pool.is_full());
        let again = pool.queue().get().unwrap();
        assert_eq!(again.length(), 0);
        assert_eq!(again.user_data(), 7);
        assert_eq!(again.alloc_size(), 64);
    }

    #[test]
    fn acquired_header_returns_only_after_last_release() {
        let pool = Pool::new(1, 0).unwrap();
        let buffer = pool.queue().get().unwrap();
        let extra = buffer.acquire();
        assert_eq!(buffer.ref_count(), 2);
        drop(buffer);
        assert_eq!(pool.queue().len(), 0);
        extra.release();
        assert_eq!(pool.queue().len(), 1);
    }

    #[test]
    fn callback_can_keep_the_header() {
        let pool = Pool::new(1, 0).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let kept = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            let kept = kept.clone();
            pool.set_callback(Arc::new(move |_pool: &Pool, buffer: BufferHeader| -> Option<BufferHeader> {
                seen.fetch_add(1, Ordering::SeqCst);
                kept.lock().push(buffer);
                None
            }));
        }

        drop(pool.queue().get().unwrap());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(pool.queue().len(), 0);

        pool.clear_callback();
        kept.lock().clear();
        assert_eq!(pool.queue().len(), 1);
    }

    #[test]
    fn resize_requires_every_header_home() {
        let pool = Pool::new(2, 16).unwrap();
        let held = pool.queue().get().unwrap();
        assert_eq!(pool.resize(4, 32), Err(Error::InvalidArg));
        drop(held);

        pool.resize(4, 32).unwrap();
        assert_eq!(pool.headers_num(), 4);
        assert_eq!(pool.queue().len(), 4);
        assert!(pool.queue().drain().iter().all(|b| b.alloc_size() == 32));
    }

    #[test]
    fn shrinking_frees_surplus_headers() {
        let pool = Pool::new(5, 8).unwrap();
        pool.resize(2, 8).unwrap();
        assert_eq!(pool.headers_num(), 2);
        assert!(pool.is_full());
    }
}
