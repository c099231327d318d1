// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Client-side connections between an output port and an input port.
//!
//! Unless it tunnels, a [`Connection`] owns a [`Pool`] of buffers for the
//! link and a [`Queue`] of full buffers coming out of the output port. It
//! does not move buffers by itself: its callback tells the client (usually a
//! [`crate::Graph`]) that something arrived in the queue or came back to the
//! pool, and the client sends them on.

use std::{
    fmt,
    ops::{BitOr, BitOrAssign},
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::{
    BufferCallback, BufferHeader, BufferRequirements, Component, Error, Parameter, Pool, Port,
    PortType, Queue, Result,
    config::{TimeSource, default_time_source},
};

/// Connection behaviour flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnectionFlags(u32);

impl ConnectionFlags {
    /// The two ports exchange buffers directly; no pool or queue.
    pub const TUNNELLING: Self = Self(0x01);
    /// Allocate the pool's payloads from the input port.
    pub const ALLOCATION_ON_INPUT: Self = Self(0x02);
    /// Allocate the pool's payloads from the output port.
    pub const ALLOCATION_ON_OUTPUT: Self = Self(0x04);
    /// Leave the ports' buffer count and size alone on enable.
    pub const KEEP_BUFFER_REQUIREMENTS: Self = Self(0x08);
    /// Deliver buffers from the producing callback instead of a worker pass.
    pub const DIRECT: Self = Self(0x10);
    /// Do not copy the output format onto the input on creation.
    pub const KEEP_PORT_FORMATS: Self = Self(0x20);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ConnectionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ConnectionFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Called when a buffer lands in the queue or goes back to the pool.
pub type ConnectionCallback = Arc<dyn Fn(&Connection) + Send + Sync>;

/// How long the last setup, enable and disable took, in µs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionTimings {
    pub setup_us: i64,
    pub enable_us: i64,
    pub disable_us: i64,
}

pub(crate) struct ConnectionInner {
    id: Uuid,
    name: String,
    flags: ConnectionFlags,
    output: Port,
    input: Port,
    // References held for the connection's lifetime.
    _components: [Component; 2],
    pool: Option<Pool>,
    queue: Queue,
    /// Serialises enable and disable.
    op_lock: Mutex<()>,
    enabled: AtomicBool,
    callback: Mutex<Option<ConnectionCallback>>,
    timings: Mutex<ConnectionTimings>,
    time: Arc<dyn TimeSource>,
}

impl ConnectionInner {
    fn is_tunnelling(&self) -> bool {
        self.flags.contains(ConnectionFlags::TUNNELLING)
    }

    fn is_clock(&self) -> bool {
        self.output.port_type() == PortType::Clock
    }

    fn notify(self: &Arc<Self>) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(&Connection {
                inner: self.clone(),
            });
        }
    }

    fn disable(&self) -> Result<()> {
        let _op = self.op_lock.lock();
        if !self.enabled.load(Ordering::Acquire) {
            return Ok(());
        }
        trace!("{}: disabling", self.name);
        let start = self.time.now_us();

        if self.is_tunnelling() {
            self.output.disable().inspect_err(|err| {
                error!("{}: output port failed to disable ({})", self.name, err);
            })?;
        } else {
            self.input.disable().inspect_err(|err| {
                error!("{}: input port failed to disable ({})", self.name, err);
            })?;
            self.output.disable().inspect_err(|err| {
                error!("{}: output port failed to disable ({})", self.name, err);
            })?;

            for buffer in self.queue.drain() {
                drop(buffer);
            }
            if let Some(pool) = &self.pool
                && !pool.is_full()
            {
                error!(
                    "{}: {} of {} buffers unaccounted for",
                    self.name,
                    pool.headers_num() - pool.queue().len(),
                    pool.headers_num()
                );
            }
        }

        self.enabled.store(false, Ordering::Release);
        self.timings.lock().disable_us = self.time.now_us() - start;
        debug!("{}: disabled", self.name);
        Ok(())
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        debug!("{}: destroying ({})", self.name, self.id);
        if let Err(err) = self.disable() {
            error!("{}: could not disable on destroy ({})", self.name, err);
        }
        if self.is_tunnelling()
            && let Err(err) = self.output.disconnect()
        {
            error!("{}: could not disconnect on destroy ({})", self.name, err);
        }
        if let Some(pool) = &self.pool {
            pool.clear_callback();
        }
    }
}

/// A connection from an output port to an input port (or between two clock
/// ports).
///
/// Cloning acquires a reference; dropping the last one disables the
/// connection if needed, undoes a tunnel and frees the pool and queue.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

/// Buffers returned to the pool go back on its queue, then the client is told.
fn released_callback(connection: Weak<ConnectionInner>) -> crate::PoolCallback {
    Arc::new(
        move |pool: &Pool, buffer: BufferHeader| -> Option<BufferHeader> {
            let Some(inner) = connection.upgrade() else {
                return Some(buffer);
            };
            trace!("{}: buffer back in the pool", inner.name);
            pool.queue().put(buffer);
            inner.notify();
            None
        },
    )
}

/// Full buffers from the output port are queued for the client.
fn output_callback(connection: Weak<ConnectionInner>) -> BufferCallback {
    Arc::new(move |port: &Port, buffer: BufferHeader| {
        let Some(inner) = connection.upgrade() else {
            drop(buffer);
            return;
        };
        trace!("{}: buffer from {}, length {}", inner.name, port.name(), buffer.length());
        inner.queue.put(buffer);
        inner.notify();
    })
}

/// Buffers consumed by the input port go back to the pool.
fn input_callback() -> BufferCallback {
    Arc::new(|port: &Port, buffer: BufferHeader| {
        trace!("{}: buffer consumed, length {}", port.name(), buffer.length());
        drop(buffer);
    })
}

/// Clock buffers carrying an update go to the other end, empty ones to the
/// pool.
fn clock_callback(connection: Weak<ConnectionInner>) -> BufferCallback {
    Arc::new(move |port: &Port, buffer: BufferHeader| {
        let Some(inner) = connection.upgrade() else {
            drop(buffer);
            return;
        };
        if buffer.length() == 0 {
            drop(buffer);
            return;
        }
        let other = if port.ptr_eq(&inner.output) {
            &inner.input
        } else {
            &inner.output
        };
        if let Err(err) = other.send(buffer) {
            error!("{}: could not forward clock buffer to {} ({})", inner.name, other.name(), err.error);
        }
    })
}

impl Connection {
    /// Connects `output` to `input`.
    ///
    /// Unless [`ConnectionFlags::KEEP_PORT_FORMATS`] is set, the output's
    /// format is copied onto the input and committed there. A passthrough
    /// output is told the input's buffer requirements.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArg`] for ports that cannot be connected or whose
    ///   component is gone
    /// - the input's format commit error
    /// - errors from port-level connection or pool creation
    pub fn create(output: &Port, input: &Port, flags: ConnectionFlags) -> Result<Connection> {
        Self::create_with_time(output, input, flags, default_time_source())
    }

    /// [`Connection::create`] with the clock used for the timings.
    pub fn create_with_time(
        output: &Port,
        input: &Port,
        flags: ConnectionFlags,
        time: Arc<dyn TimeSource>,
    ) -> Result<Connection> {
        let valid = matches!(
            (output.port_type(), input.port_type()),
            (PortType::Output, PortType::Input) | (PortType::Clock, PortType::Clock)
        );
        if !valid {
            error!("invalid port types {} -> {}", output.name(), input.name());
            return Err(Error::InvalidArg);
        }
        let start = time.now_us();

        let (Some(out_component), Some(in_component)) = (output.component(), input.component())
        else {
            error!("{} or {} has no component", output.name(), input.name());
            return Err(Error::InvalidArg);
        };

        if !flags.contains(ConnectionFlags::KEEP_PORT_FORMATS) {
            input.set_format(output.format());
            input.format_commit()?;
        }

        if output.capabilities().passthrough {
            let wanted = input.buffer_requirements();
            let param = Parameter::BufferRequirements(BufferRequirements {
                buffer_num_min: wanted.buffer_num_min,
                buffer_size_min: wanted.buffer_size_min,
                buffer_alignment_min: wanted.buffer_alignment_min,
                buffer_num_recommended: wanted.buffer_num_recommended,
                buffer_size_recommended: wanted.buffer_size_recommended,
                ..Default::default()
            });
            match output.parameter_set(&param) {
                Ok(()) | Err(Error::NotSupported) => {}
                Err(err) => {
                    error!("{}: could not propagate buffer requirements ({})", output.name(), err);
                    return Err(err);
                }
            }
        }

        let name = format!("{}/{}", output.name(), input.name());
        let pool = if flags.contains(ConnectionFlags::TUNNELLING) {
            output.connect(input)?;
            None
        } else {
            let pool_port = if flags.contains(ConnectionFlags::ALLOCATION_ON_INPUT) {
                input
            } else if flags.contains(ConnectionFlags::ALLOCATION_ON_OUTPUT)
                || output.capabilities().allocation
            {
                output
            } else {
                input
            };
            Some(Pool::for_port(pool_port, 0, 0)?)
        };

        let inner = Arc::new_cyclic(|weak: &Weak<ConnectionInner>| {
            if let Some(pool) = &pool {
                pool.set_callback(released_callback(weak.clone()));
            }
            ConnectionInner {
                id: Uuid::new_v4(),
                name,
                flags,
                output: output.clone(),
                input: input.clone(),
                _components: [out_component, in_component],
                pool,
                queue: Queue::new(),
                op_lock: Mutex::new(()),
                enabled: AtomicBool::new(false),
                callback: Mutex::new(None),
                timings: Mutex::new(ConnectionTimings::default()),
                time,
            }
        });
        inner.timings.lock().setup_us = inner.time.now_us() - start;
        info!("{}: created ({})", inner.name, inner.id);
        Ok(Connection { inner })
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// `<output name>/<input name>`.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn flags(&self) -> ConnectionFlags {
        self.inner.flags
    }

    pub fn output(&self) -> &Port {
        &self.inner.output
    }

    pub fn input(&self) -> &Port {
        &self.inner.input
    }

    /// The connection's pool; `None` when tunnelling.
    pub fn pool(&self) -> Option<&Pool> {
        self.inner.pool.as_ref()
    }

    /// Full buffers waiting to be sent to the input.
    pub fn queue(&self) -> &Queue {
        &self.inner.queue
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    pub fn timings(&self) -> ConnectionTimings {
        *self.inner.timings.lock()
    }

    pub fn ptr_eq(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Sets the callback run when buffers arrive in the queue or return to
    /// the pool. It may run on any thread.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        *self.inner.callback.lock() = Some(Arc::new(callback));
    }

    pub fn clear_callback(&self) {
        *self.inner.callback.lock() = None;
    }

    /// Adds a reference.
    pub fn acquire(&self) -> Connection {
        trace!("{}: acquire", self.inner.name);
        self.clone()
    }

    /// Drops this reference.
    pub fn release(self) {
        trace!("{}: release", self.inner.name);
        drop(self);
    }

    /// Drops this reference; the connection goes away with the last one.
    pub fn destroy(self) {
        debug!("{}: destroy", self.inner.name);
        drop(self);
    }

    /// Enables the connection.
    ///
    /// Both ports get the larger of the two buffer counts and sizes and the
    /// pool is resized to match, then the output and the input are enabled.
    /// A clock connection is primed with buffers on both ends.
    ///
    /// # Errors
    ///
    /// Pool resize or port enable errors. The output is disabled again if
    /// the input fails to enable.
    pub fn enable(&self) -> Result<()> {
        let inner = &self.inner;
        let _op = inner.op_lock.lock();
        if self.is_enabled() {
            return Ok(());
        }
        trace!("{}: enabling", inner.name);
        let start = inner.time.now_us();

        if !inner.flags.contains(ConnectionFlags::KEEP_BUFFER_REQUIREMENTS) {
            for port in [&inner.output, &inner.input] {
                let requirements = port.buffer_requirements();
                port.set_buffer_num(
                    requirements
                        .buffer_num_recommended
                        .max(requirements.buffer_num_min),
                );
                port.set_buffer_size(
                    requirements
                        .buffer_size_recommended
                        .max(requirements.buffer_size_min),
                );
            }
        }

        let Some(pool) = &inner.pool else {
            inner.output.enable(None).inspect_err(|err| {
                error!("{}: output port couldn't be enabled ({})", inner.name, err);
            })?;
            return self.enabled_after(start);
        };

        let out_req = inner.output.buffer_requirements();
        let in_req = inner.input.buffer_requirements();
        let num = out_req.buffer_num.max(in_req.buffer_num);
        let size = out_req.buffer_size.max(in_req.buffer_size);
        for port in [&inner.output, &inner.input] {
            port.set_buffer_num(num);
            port.set_buffer_size(size);
        }
        let payload_size = if inner.output.capabilities().passthrough {
            0
        } else {
            size
        };
        pool.resize(num as usize, payload_size).inspect_err(|err| {
            error!("{}: couldn't resize pool ({})", inner.name, err);
        })?;

        let weak = Arc::downgrade(inner);
        let (out_cb, in_cb) = if inner.is_clock() {
            (clock_callback(weak.clone()), clock_callback(weak))
        } else {
            (output_callback(weak), input_callback())
        };

        inner.output.enable(Some(out_cb)).inspect_err(|err| {
            error!("{}: output port couldn't be enabled ({})", inner.name, err);
        })?;
        if let Err(err) = inner.input.enable(Some(in_cb)) {
            error!("{}: input port couldn't be enabled ({})", inner.name, err);
            if let Err(rollback) = inner.output.disable() {
                error!("{}: output port couldn't be disabled ({})", inner.name, rollback);
            }
            return Err(err);
        }

        if inner.is_clock() {
            self.prime_clock_ports(pool);
        }
        self.enabled_after(start)
    }

    fn enabled_after(&self, start: i64) -> Result<()> {
        self.inner.enabled.store(true, Ordering::Release);
        self.inner.timings.lock().enable_us = self.inner.time.now_us() - start;
        debug!("{}: enabled", self.inner.name);
        Ok(())
    }

    /// Hands pool buffers to the output and the input in turn.
    fn prime_clock_ports(&self, pool: &Pool) {
        let ends = [&self.inner.output, &self.inner.input];
        let mut sent = 0usize;
        while let Some(buffer) = pool.queue().get() {
            let port = ends[sent % 2];
            if let Err(err) = port.send(buffer) {
                let (err, buffer) = err.into_parts();
                error!("{}: failed to prime clock port {} ({})", self.inner.name, port.name(), err);
                pool.queue().put(buffer);
                return;
            }
            sent += 1;
        }
        if sent == 1 {
            warn!("{}: single clock buffer, input end not primed", self.inner.name);
        }
    }

    /// Disables the connection: input first, then output. Queued buffers go
    /// back to the pool.
    pub fn disable(&self) -> Result<()> {
        self.inner.disable()
    }

    /// Handles a format-changed event coming out of the output port.
    ///
    /// If the input takes format changes in-band and the current buffers are
    /// big enough, the new format is committed on the output and the event
    /// is forwarded to the input. Otherwise the connection is disabled, both
    /// ends are reconfigured and it is enabled again.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArg`] if `buffer` is not a format-changed event, or
    /// the first error of the reconfiguration.
    pub fn event_format_changed(&self, buffer: &BufferHeader) -> Result<()> {
        let Some(event) = buffer.format_changed_event() else {
            error!("{}: not a format changed event", self.inner.name);
            return Err(Error::InvalidArg);
        };
        let output = &self.inner.output;
        let input = &self.inner.input;
        let current = output.buffer_requirements();

        if input.capabilities().supports_event_format_change
            && current.buffer_size >= event.buffer_size_min
            && current.buffer_num >= event.buffer_num_min
        {
            debug!("{}: in-band format change", self.inner.name);
            output.set_format(event.format);
            output.format_commit()?;
            return input.send(buffer.acquire()).map_err(Error::from);
        }

        debug!("{}: reconfiguring for format change", self.inner.name);
        self.disable()?;

        output.set_format(event.format);
        output.format_commit()?;
        let mut requirements = output.buffer_requirements();
        requirements.buffer_num_min = requirements.buffer_num_min.max(event.buffer_num_min);
        requirements.buffer_size_min = requirements.buffer_size_min.max(event.buffer_size_min);
        requirements.buffer_num_recommended = event.buffer_num_recommended;
        requirements.buffer_size_recommended = event.buffer_size_recommended;
        requirements.clamp_to_minimums();
        output.set_buffer_requirements(requirements);

        input.set_format(output.format());
        input.format_commit()?;

        self.enable()
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.inner.name)
            .field("flags", &self.inner.flags)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let flags = ConnectionFlags::TUNNELLING | ConnectionFlags::DIRECT;
        assert!(flags.contains(ConnectionFlags::DIRECT));
        assert!(!flags.contains(ConnectionFlags::KEEP_PORT_FORMATS));
        assert_eq!(ConnectionFlags::from_bits(flags.bits()), flags);
        assert!(ConnectionFlags::empty().contains(ConnectionFlags::empty()));
    }
}
