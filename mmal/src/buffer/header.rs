// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Reference-counted buffer headers.

use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::{Mutex, MutexGuard};

use super::{payload::Payload, pool::PoolInner};
use crate::{EventCode, EventPayload, FormatChangedEvent};

/// Mutable fields of a buffer header.
///
/// Obtained through [`BufferHeader::lock`].
#[derive(Debug, Default)]
pub struct BufferFields {
    /// Event code; `None` for media data.
    pub cmd: Option<EventCode>,
    /// Bitwise OR of [`crate::buffer::flags`] values.
    pub flags: u32,
    /// Offset of valid data in the payload.
    pub offset: u32,
    /// Length of valid data in the payload.
    pub length: u32,
    /// Size of the payload memory the header was set up with.
    pub alloc_size: u32,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    /// Free for client use; survives release.
    pub user_data: u64,
    pub data: Option<Payload>,
    /// Typed event payload when `cmd` is set.
    pub event: Option<EventPayload>,
}

impl BufferFields {
    /// Clears everything describing the current content, keeping the
    /// payload memory, its size and `user_data`.
    pub fn reset(&mut self) {
        self.cmd = None;
        self.flags = 0;
        self.offset = 0;
        self.length = 0;
        self.pts = None;
        self.dts = None;
        self.event = None;
    }
}

pub(crate) struct HeaderInner {
    refs: AtomicUsize,
    fields: Mutex<BufferFields>,
    home: Mutex<Weak<PoolInner>>,
}

/// A handle on a buffer header.
///
/// Each handle owns one reference. [`BufferHeader::acquire`] creates another
/// handle on the same header; dropping a handle (or calling
/// [`BufferHeader::release`]) gives its reference back. When the last
/// reference goes the header is reset and returned to its pool, going
/// through the pool's release callback if one is set.
pub struct BufferHeader {
    inner: Arc<HeaderInner>,
}

impl BufferHeader {
    pub(crate) fn new_in(home: Weak<PoolInner>, fields: BufferFields) -> Self {
        Self {
            inner: Arc::new(HeaderInner {
                refs: AtomicUsize::new(1),
                fields: Mutex::new(fields),
                home: Mutex::new(home),
            }),
        }
    }

    /// Adds a reference and returns a new handle on the same header.
    pub fn acquire(&self) -> BufferHeader {
        self.inner.refs.fetch_add(1, Ordering::AcqRel);
        BufferHeader {
            inner: self.inner.clone(),
        }
    }

    /// Gives this handle's reference back.
    pub fn release(self) {
        drop(self);
    }

    /// Number of live references.
    pub fn ref_count(&self) -> usize {
        self.inner.refs.load(Ordering::Acquire)
    }

    /// Whether both handles refer to the same header.
    pub fn ptr_eq(&self, other: &BufferHeader) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Locks the header's fields.
    pub fn lock(&self) -> MutexGuard<'_, BufferFields> {
        self.inner.fields.lock()
    }

    pub fn cmd(&self) -> Option<EventCode> {
        self.lock().cmd
    }

    pub fn length(&self) -> u32 {
        self.lock().length
    }

    pub fn set_length(&self, length: u32) {
        self.lock().length = length;
    }

    pub fn flags(&self) -> u32 {
        self.lock().flags
    }

    pub fn alloc_size(&self) -> u32 {
        self.lock().alloc_size
    }

    pub fn pts(&self) -> Option<i64> {
        self.lock().pts
    }

    pub fn user_data(&self) -> u64 {
        self.lock().user_data
    }

    pub fn set_user_data(&self, user_data: u64) {
        self.lock().user_data = user_data;
    }

    /// The format-changed payload, if this is a format-changed event.
    pub fn format_changed_event(&self) -> Option<FormatChangedEvent> {
        let fields = self.lock();
        match (&fields.cmd, &fields.event) {
            (Some(EventCode::FormatChanged), Some(EventPayload::FormatChanged(event))) => {
                Some(event.clone())
            }
            _ => None,
        }
    }

    /// The error carried by an error event.
    pub fn error_event(&self) -> Option<crate::Error> {
        let fields = self.lock();
        match (&fields.cmd, &fields.event) {
            (Some(EventCode::Error), Some(EventPayload::Error(err))) => Some(err.clone()),
            _ => None,
        }
    }

    /// Detaches the header from its pool so that dropping it frees it.
    pub(crate) fn retire(self) {
        *self.inner.home.lock() = Weak::new();
    }
}

impl fmt::Debug for BufferHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self.inner.fields.lock();
        f.debug_struct("BufferHeader")
            .field("ptr", &Arc::as_ptr(&self.inner))
            .field("cmd", &fields.cmd)
            .field("length", &fields.length)
            .field("alloc_size", &fields.alloc_size)
            .finish()
    }
}

impl Drop for BufferHeader {
    fn drop(&mut self) {
        if self.inner.refs.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        self.inner.fields.lock().reset();
        let home = self.inner.home.lock().upgrade();
        if let Some(pool) = home {
            self.inner.refs.store(1, Ordering::Release);
            PoolInner::recycle(
                &pool,
                BufferHeader {
                    inner: self.inner.clone(),
                },
            );
        }
    }
}
