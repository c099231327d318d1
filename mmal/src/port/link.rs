// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Port-to-port connections.
//!
//! Two connected ports either tunnel (their implementations exchange
//! buffers directly) or let the core move buffers. In the second case the
//! core allocates a pool when the connection is enabled, primes the output
//! from it and forwards buffers between the two ends with the callbacks
//! below.

use std::sync::{Arc, Weak};

use tracing::{debug, error, trace, warn};

use super::{BufferCallback, Port, PortType};
use crate::{BufferHeader, Error, Pool, Result};

/// Everything guarded by a port's connection lock.
#[derive(Debug, Default)]
pub(crate) struct LinkState {
    /// The core moves the buffers between the two ports.
    core_owned: bool,
    /// Pool of a core-owned connection, held by the port it is allocated
    /// from.
    pool: Option<Pool>,
}

/// The (output, input) ends of a link seen from `port`. For two clock ports
/// the peer plays the output.
fn ends<'a>(port: &'a Port, peer: &'a Port) -> (&'a Port, &'a Port) {
    let output = if port.inner.kind == PortType::Output {
        port
    } else {
        peer
    };
    let input = if peer.inner.kind == PortType::Input {
        peer
    } else {
        port
    };
    (output, input)
}

fn pool_of(port: &Port, local: &Port, link: &LinkState, peer_link: &LinkState) -> Option<Pool> {
    if port.ptr_eq(local) {
        link.pool.clone()
    } else {
        peer_link.pool.clone()
    }
}

fn report_error(port: &Port, err: Error) {
    match port.component() {
        Some(component) => {
            if let Err(lost) = component.send_error_event(err) {
                error!("{}: could not report error ({})", port.name(), lost);
            }
        }
        None => error!("{}: no component to report error to ({})", port.name(), err),
    }
}

/// Callback of the input end: buffers coming back go to the pool, except
/// clock buffers carrying data which go to the peer clock port.
fn connected_input_callback() -> BufferCallback {
    Arc::new(|port: &Port, buffer: BufferHeader| {
        trace!("{}: buffer from connected input, length {}", port.name(), buffer.length());
        if port.inner.kind == PortType::Clock
            && buffer.length() != 0
            && let Some(peer) = port.connected_port()
        {
            if let Err(err) = peer.send(buffer) {
                error!("{}: could not forward clock buffer ({})", port.name(), err.error);
            }
            return;
        }
        drop(buffer);
    })
}

/// Callback of the output end: data goes to the peer input; format changes
/// are applied to the output and forwarded in-band.
fn connected_output_callback() -> BufferCallback {
    Arc::new(|port: &Port, buffer: BufferHeader| {
        trace!("{}: buffer from connected output, length {}", port.name(), buffer.length());
        let Some(peer) = port.connected_port() else {
            drop(buffer);
            return;
        };

        if buffer.cmd().is_some() {
            // Other events are released as is.
            let Some(event) = buffer.format_changed_event() else {
                drop(buffer);
                return;
            };
            port.set_format(event.format);
            if let Err(err) = port.format_commit() {
                error!("{}: format commit failed ({})", port.name(), err);
                report_error(port, err);
                return;
            }
            if let Err(err) = peer.send(buffer) {
                report_error(port, err.into());
            }
            return;
        }

        if !port.is_enabled() {
            // Flushed while disabling.
            drop(buffer);
            return;
        }
        if let Err(err) = peer.send(buffer) {
            error!("{}: could not send buffer to {} ({})", port.name(), peer.name(), err.error);
        }
    })
}

fn populate_from_pool(port: &Port, pool: &Pool) -> Result<()> {
    trace!("{}: priming from {:?}", port.name(), pool);
    for _ in 0..port.buffer_requirements().buffer_num {
        let Some(buffer) = pool.queue().get() else {
            error!("{}: too few buffers in the pool", port.name());
            return Err(Error::OutOfMemory);
        };
        if let Err(err) = port.send(buffer) {
            let (err, buffer) = err.into_parts();
            error!("{}: failed to send buffer ({})", port.name(), err);
            pool.queue().put(buffer);
            return Err(err);
        }
    }
    Ok(())
}

/// Hands the pool's buffers to the two clock ports in turn, output first.
fn populate_clock_ports(output: &Port, input: &Port, pool: &Pool) -> Result<()> {
    let mut sent = 0usize;
    while let Some(buffer) = pool.queue().get() {
        let port = if sent % 2 == 0 { output } else { input };
        if let Err(err) = port.send(buffer) {
            let (err, buffer) = err.into_parts();
            error!("{}: failed to send buffer to clock port ({})", port.name(), err);
            pool.queue().put(buffer);
            return Err(err);
        }
        sent += 1;
    }
    if sent == 1 {
        warn!("{}: single clock buffer, {} gets none", output.name(), input.name());
    }
    Ok(())
}

impl Port {
    /// The port this one is connected to.
    pub fn connected_port(&self) -> Option<Port> {
        self.inner.peer.lock().upgrade().map(|inner| Port { inner })
    }

    pub fn is_connected(&self) -> bool {
        self.inner.peer.lock().strong_count() != 0
    }

    /// Connects this port to `other`.
    ///
    /// An output connects to an input, and a clock port to another clock
    /// port. Either end may first link the port it stands in for instead
    /// (see [`PortImpl::connect_through`](super::PortImpl::connect_through)).
    /// Otherwise the output's implementation is asked to set up a tunnel; if
    /// it declines, the core will move buffers between the two ports once the
    /// connection is enabled.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArg`] for an invalid pair of ports or an enabled port
    /// - [`Error::AlreadyConnected`] if either port is connected
    pub fn connect(&self, other: &Port) -> Result<()> {
        let valid = matches!(
            (self.inner.kind, other.inner.kind),
            (PortType::Output, PortType::Input)
                | (PortType::Input, PortType::Output)
                | (PortType::Clock, PortType::Clock)
        );
        if !valid || self.ptr_eq(other) {
            error!("invalid port connection {} -> {}", self.name(), other.name());
            return Err(Error::InvalidArg);
        }
        trace!("connecting {} to {}", self.name(), other.name());

        for (port, peer) in [(self, other), (other, self)] {
            match port.inner.imp.connect_through(port, Some(peer)) {
                Err(Error::NotSupported) => {}
                result => return result,
            }
        }

        let mut link = self.inner.link.lock();
        if self.is_connected() {
            error!("{}: already connected", self.name());
            return Err(Error::AlreadyConnected);
        }
        if self.is_enabled() {
            error!("{}: should not be enabled", self.name());
            return Err(Error::InvalidArg);
        }

        let mut other_link = other.inner.link.lock();
        if other.is_connected() {
            error!("{}: already connected", other.name());
            return Err(Error::AlreadyConnected);
        }
        if other.is_enabled() {
            error!("{}: should not be enabled", other.name());
            return Err(Error::InvalidArg);
        }

        *self.inner.peer.lock() = Arc::downgrade(&other.inner);
        *other.inner.peer.lock() = Arc::downgrade(&self.inner);

        let (output, input) = ends(self, other);
        let core_owned = match output.inner.imp.connect(output, Some(input)) {
            Ok(()) => false,
            Err(Error::NotSupported) => true,
            Err(err) => {
                debug!("{}: tunnel refused ({}), core moves buffers", output.name(), err);
                true
            }
        };
        link.core_owned = core_owned;
        other_link.core_owned = core_owned;
        debug!(
            "connected {} to {} ({})",
            self.name(),
            other.name(),
            if core_owned { "core-owned" } else { "tunnelled" }
        );
        Ok(())
    }

    /// Breaks the connection, disabling both ends first if needed.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the port is not connected
    /// - errors from disabling the ports or tearing down the tunnel
    pub fn disconnect(&self) -> Result<()> {
        trace!("{}: disconnecting", self.name());
        match self.inner.imp.connect_through(self, None) {
            Err(Error::NotSupported) => {}
            result => return result,
        }

        let mut link = self.inner.link.lock();
        let Some(peer) = self.connected_port() else {
            debug!("{}: not connected", self.name());
            return Err(Error::NotConnected);
        };
        let mut peer_link = peer.inner.link.lock();
        let (output, input) = ends(self, &peer);

        if self.is_enabled() {
            let output_pool = pool_of(output, self, &link, &peer_link);
            let input_pool = pool_of(input, self, &link, &peer_link);
            output.disable_internal(output_pool.as_ref())?;
            input.disable_internal(input_pool.as_ref())?;
            link.pool = None;
            peer_link.pool = None;
        }

        if !link.core_owned {
            output.inner.imp.connect(output, None).inspect_err(|err| {
                error!("{}: disconnection failed ({})", output.name(), err);
            })?;
        }

        *self.inner.peer.lock() = Weak::new();
        *peer.inner.peer.lock() = Weak::new();
        link.core_owned = false;
        peer_link.core_owned = false;
        debug!("disconnected {} from {}", self.name(), peer.name());
        Ok(())
    }

    pub(super) fn enable_connected(
        &self,
        link: &mut LinkState,
        peer: &Port,
        peer_link: &mut LinkState,
    ) -> Result<()> {
        let pool = self.connection_enable(link, peer, peer_link)?;
        if let Err(err) = self.start_connected(peer, pool.as_ref()) {
            let (output, input) = ends(self, peer);
            for port in [output, input] {
                let port_pool = pool_of(port, self, link, peer_link);
                if let Err(rollback) = port.disable_internal(port_pool.as_ref()) {
                    error!("{}: rollback failed ({})", port.name(), rollback);
                }
            }
            link.pool = None;
            peer_link.pool = None;
            return Err(err);
        }
        Ok(())
    }

    /// Enables both ends, input first when the peer is the input, then
    /// primes the output from a core-owned pool.
    fn start_connected(&self, peer: &Port, pool: Option<&Pool>) -> Result<()> {
        if peer.inner.kind == PortType::Input {
            peer.enable_internal(connected_input_callback())?;
            self.enable_internal(connected_output_callback())?;
        } else {
            self.enable_internal(connected_input_callback())?;
            peer.enable_internal(connected_output_callback())?;
        }

        let Some(pool) = pool else {
            return Ok(());
        };
        let (output, input) = ends(self, peer);
        if output.inner.kind == PortType::Clock && input.inner.kind == PortType::Clock {
            populate_clock_ports(output, input, pool)
        } else {
            populate_from_pool(output, pool)
        }
    }

    /// Negotiates buffer count and size across the link and, for a
    /// core-owned connection, allocates its pool.
    fn connection_enable(
        &self,
        link: &mut LinkState,
        peer: &Port,
        peer_link: &mut LinkState,
    ) -> Result<Option<Pool>> {
        let (output, input) = ends(self, peer);
        let out_req = output.buffer_requirements();
        let in_req = input.buffer_requirements();
        let num = out_req.buffer_num.max(in_req.buffer_num);
        let mut size = out_req.buffer_size.max(in_req.buffer_size);
        for port in [output, input] {
            port.set_buffer_num(num);
            port.set_buffer_size(size);
        }
        if output.capabilities().passthrough {
            size = 0;
        }
        if !link.core_owned {
            return Ok(None);
        }

        let pool_port = if output.capabilities().allocation {
            output
        } else {
            input
        };
        let pool = Pool::for_port(pool_port, num as usize, size).inspect_err(|err| {
            error!("{}: failed to create connection pool ({})", pool_port.name(), err);
        })?;

        let weak_output = Arc::downgrade(&output.inner);
        pool.set_callback(Arc::new(
            move |_pool: &Pool, buffer: BufferHeader| -> Option<BufferHeader> {
                let Some(inner) = weak_output.upgrade() else {
                    return Some(buffer);
                };
                let output = Port { inner };
                if !output.is_enabled() {
                    return Some(buffer);
                }
                // Back to the pool only if the output refuses it.
                output.send(buffer).err().map(|err| err.buffer)
            },
        ));

        if pool_port.ptr_eq(self) {
            link.pool = Some(pool.clone());
        } else {
            peer_link.pool = Some(pool.clone());
        }
        Ok(Some(pool))
    }

    pub(super) fn disable_connected(
        &self,
        link: &mut LinkState,
        peer: &Port,
        peer_link: &mut LinkState,
    ) -> Result<()> {
        let own_pool = link.pool.clone();
        let peer_pool = peer_link.pool.clone();
        if peer.inner.kind != PortType::Input {
            peer.disable_internal(peer_pool.as_ref())?;
        }
        self.disable_internal(own_pool.as_ref())?;
        if peer.inner.kind == PortType::Input {
            peer.disable_internal(peer_pool.as_ref())?;
        }

        link.pool = None;
        peer_link.pool = None;
        Ok(())
    }
}
