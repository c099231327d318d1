// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Port state.
//!
//! A port's state has three independent axes: whether it is enabled, whether
//! an enabled port is flowing or paused, and whether it is connected to a peer
//! port. [`PortState`] is a snapshot of all three.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{BufferHeader, Port};

/// Whether an enabled port forwards buffers or holds them back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Flowing,
    /// Buffers sent to the port are queued until it is resumed or flushed.
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Disabled,
    Enabled(Flow),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Connectivity {
    Unconnected,
    Connected(Port),
}

/// A snapshot of a port's state.
#[derive(Debug, Clone, PartialEq)]
pub struct PortState {
    pub activity: Activity,
    pub connectivity: Connectivity,
}

impl PortState {
    pub fn is_enabled(&self) -> bool {
        matches!(self.activity, Activity::Enabled(_))
    }

    pub fn is_paused(&self) -> bool {
        self.activity == Activity::Enabled(Flow::Paused)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.connectivity, Connectivity::Connected(_))
    }
}

/// Lock-free mirror of the activity, readable while the send lock is held
/// elsewhere.
#[derive(Debug, Default)]
pub(crate) struct ActivityFlags {
    enabled: AtomicBool,
    paused: AtomicBool,
}

impl ActivityFlags {
    pub(crate) fn load(&self) -> Activity {
        if !self.enabled.load(Ordering::Acquire) {
            Activity::Disabled
        } else if self.paused.load(Ordering::Acquire) {
            Activity::Enabled(Flow::Paused)
        } else {
            Activity::Enabled(Flow::Flowing)
        }
    }

    fn store(&self, activity: Activity) {
        let (enabled, paused) = match activity {
            Activity::Disabled => (false, false),
            Activity::Enabled(Flow::Flowing) => (true, false),
            Activity::Enabled(Flow::Paused) => (true, true),
        };
        self.paused.store(paused, Ordering::Release);
        self.enabled.store(enabled, Ordering::Release);
    }
}

/// Everything guarded by a port's send lock.
#[derive(Debug)]
pub(crate) struct DataPath {
    activity: Activity,
    paused_queue: VecDeque<BufferHeader>,
}

impl Default for DataPath {
    fn default() -> Self {
        Self {
            activity: Activity::Disabled,
            paused_queue: VecDeque::new(),
        }
    }
}

impl DataPath {
    pub(crate) fn activity(&self) -> Activity {
        self.activity
    }

    /// Changes the activity and publishes it to `flags`.
    pub(crate) fn set_activity(&mut self, activity: Activity, flags: &ActivityFlags) {
        self.activity = activity;
        flags.store(activity);
    }

    pub(crate) fn hold(&mut self, buffer: BufferHeader) {
        self.paused_queue.push_back(buffer);
    }

    pub(crate) fn next_held(&mut self) -> Option<BufferHeader> {
        self.paused_queue.pop_front()
    }

    pub(crate) fn hold_front(&mut self, buffer: BufferHeader) {
        self.paused_queue.push_front(buffer);
    }

    pub(crate) fn take_held(&mut self) -> VecDeque<BufferHeader> {
        std::mem::take(&mut self.paused_queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_follow_the_data_path() {
        let flags = ActivityFlags::default();
        let mut path = DataPath::default();
        assert_eq!(flags.load(), Activity::Disabled);

        path.set_activity(Activity::Enabled(Flow::Paused), &flags);
        assert_eq!(flags.load(), Activity::Enabled(Flow::Paused));

        path.set_activity(Activity::Disabled, &flags);
        assert_eq!(flags.load(), Activity::Disabled);
        assert_eq!(path.activity(), Activity::Disabled);
    }
}
