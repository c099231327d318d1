// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Payload memory attached to buffer headers.

use std::fmt;

use crate::{Component, Port};

/// Memory backing a buffer header.
///
/// A payload allocated through [`Port::payload_alloc`] keeps a reference on
/// the owning component until it is dropped, at which point the port's
/// implementation gets the memory back through its `payload_free` hook.
pub struct Payload {
    data: Vec<u8>,
    owner: Option<(Port, Component)>,
}

impl Payload {
    /// Heap memory not tied to any port.
    pub fn heap(size: usize) -> Self {
        Self {
            data: vec![0; size],
            owner: None,
        }
    }

    /// Memory obtained from `port`'s allocator, keeping `component` alive.
    pub(crate) fn owned(data: Vec<u8>, port: Port, component: Component) -> Self {
        Self {
            data,
            owner: Some((port, component)),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The port this payload was allocated from, if any.
    pub fn port(&self) -> Option<&Port> {
        self.owner.as_ref().map(|(port, _)| port)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("len", &self.data.len())
            .field("port", &self.port().map(|port| port.name()))
            .finish()
    }
}

impl Drop for Payload {
    /// Returns port-allocated memory to the port and releases the component.
    fn drop(&mut self) {
        if let Some((port, component)) = self.owner.take() {
            port.free_payload_memory(std::mem::take(&mut self.data));
            drop(component);
        }
    }
}
