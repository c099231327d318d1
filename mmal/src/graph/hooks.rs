// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Client overrides for a graph's default behaviour.

use crate::{BufferHeader, Connection, Error, Parameter, Port, Result, SendError};

use super::Graph;

/// Optional overrides for the processing and facade behaviour of a [`Graph`].
///
/// Every hook runs before the default behaviour and may replace it. Returning
/// [`Error::NotSupported`] (or, for hooks that take a buffer, a [`SendError`]
/// carrying it) falls through to the default. Any other result is final.
///
/// The `port` handed to the facade hooks is the facade's own port, not the
/// inner port it shadows.
pub trait GraphHooks: Send + Sync {
    /// A facade port is being enabled.
    fn enable(&self, _graph: &Graph, _port: &Port) -> Result<()> {
        Err(Error::NotSupported)
    }

    /// A facade port is being disabled.
    fn disable(&self, _graph: &Graph, _port: &Port) -> Result<()> {
        Err(Error::NotSupported)
    }

    fn flush(&self, _graph: &Graph, _port: &Port) -> Result<()> {
        Err(Error::NotSupported)
    }

    /// A buffer was sent to a facade port.
    fn send_buffer(
        &self,
        _graph: &Graph,
        _port: &Port,
        buffer: BufferHeader,
    ) -> core::result::Result<(), SendError> {
        Err(SendError::new(Error::NotSupported, buffer))
    }

    /// `Ok` skips the default commit but still reads the inner port's
    /// settings back into the facade port.
    fn format_commit(&self, _graph: &Graph, _port: &Port) -> Result<()> {
        Err(Error::NotSupported)
    }

    /// Called for facade control and data ports alike.
    fn parameter_get(&self, _graph: &Graph, _port: &Port, _param: &mut Parameter) -> Result<()> {
        Err(Error::NotSupported)
    }

    fn parameter_set(&self, _graph: &Graph, _port: &Port, _param: &Parameter) -> Result<()> {
        Err(Error::NotSupported)
    }

    /// A facade port is being connected to (`Some`) or disconnected from
    /// (`None`) an outside port.
    fn connect(&self, _graph: &Graph, _port: &Port, _other: Option<&Port>) -> Result<()> {
        Err(Error::NotSupported)
    }

    fn payload_alloc(&self, _graph: &Graph, _port: &Port, _size: u32) -> Result<Vec<u8>> {
        Err(Error::NotSupported)
    }

    /// Returns the payload if the hook did not take it.
    fn payload_free(&self, _graph: &Graph, _port: &Port, payload: Vec<u8>) -> Option<Vec<u8>> {
        Some(payload)
    }

    /// A buffer was taken off a connection's queue, before it is sent on.
    fn connection_buffer(
        &self,
        _graph: &Graph,
        _connection: &Connection,
        buffer: BufferHeader,
    ) -> core::result::Result<(), SendError> {
        Err(SendError::new(Error::NotSupported, buffer))
    }

    /// An inner port returned a buffer that is about to go out through
    /// `port`.
    fn return_buffer(
        &self,
        _graph: &Graph,
        _port: &Port,
        buffer: BufferHeader,
    ) -> core::result::Result<(), SendError> {
        Err(SendError::new(Error::NotSupported, buffer))
    }

    /// An event arrived on a member's control port while the graph runs as
    /// a facade.
    fn control_callback(
        &self,
        _graph: &Graph,
        _port: &Port,
        buffer: BufferHeader,
    ) -> core::result::Result<(), SendError> {
        Err(SendError::new(Error::NotSupported, buffer))
    }

    /// The facade component itself is being enabled (`true`) or disabled.
    fn graph_enable(&self, _graph: &Graph, _enable: bool) -> Result<()> {
        Err(Error::NotSupported)
    }

    /// The graph is going away. Its members are still held.
    fn destroy(&self) {}
}
