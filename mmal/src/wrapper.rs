// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! A pull-style facade over one component.
//!
//! The [`Wrapper`] owns a pool for each input port and a pool plus a queue of
//! full buffers for each output port. Clients take empty buffers, fill and
//! send them, and collect full buffers, optionally blocking until one is
//! there, instead of writing port callbacks.

use std::{fmt, sync::Arc, sync::Weak};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::{
    BufferCallback, BufferHeader, Component, Error, EventCode, Parameter, Pool, PoolCallback, Port,
    PortType, Queue, Result,
    config::{TimeSource, default_time_source},
};

/// How [`Wrapper::port_enable`] sets up a port's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WrapperFlags {
    /// Allocate payload memory of the port's buffer size for each buffer.
    pub payload_allocate: bool,
    /// Ask the port for zero-copy memory.
    pub use_shared_memory: bool,
}

/// Called whenever a buffer becomes available. It may run on any thread.
pub type WrapperCallback = Arc<dyn Fn(&Wrapper) + Send + Sync>;

/// How long the last setup, enable and disable took, in µs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WrapperTimings {
    pub setup_us: i64,
    pub enable_us: i64,
    pub disable_us: i64,
}

struct OutputSlot {
    pool: Pool,
    queue: Queue,
}

pub(crate) struct WrapperInner {
    component: Component,
    input_pools: Vec<Pool>,
    outputs: Vec<OutputSlot>,
    /// First error reported by the component.
    status: Mutex<Option<Error>>,
    /// Bumped on every wake-up so waiters never miss one.
    generation: Mutex<u64>,
    available: Condvar,
    callback: Mutex<Option<WrapperCallback>>,
    timings: Mutex<WrapperTimings>,
    time: Arc<dyn TimeSource>,
}

impl WrapperInner {
    fn notify(self: &Arc<Self>) {
        *self.generation.lock() += 1;
        self.available.notify_all();
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(&Wrapper {
                inner: self.clone(),
            });
        }
    }

    fn pool_of(&self, port: &Port) -> Result<&Pool> {
        let owned = self
            .component
            .ports(port.port_type())
            .get(port.index())
            .is_some_and(|own| own.ptr_eq(port));
        let pool = match port.port_type() {
            PortType::Input if owned => self.input_pools.get(port.index()),
            PortType::Output if owned => self.outputs.get(port.index()).map(|slot| &slot.pool),
            _ => None,
        };
        pool.ok_or_else(|| {
            error!("{}: not a data port of {}", port.name(), self.component.name());
            Error::InvalidArg
        })
    }

    fn disable_port(&self, port: &Port) -> Result<()> {
        let start = self.time.now_us();
        port.disable()?;
        let pool = self.pool_of(port)?;
        if port.port_type() == PortType::Output
            && let Some(slot) = self.outputs.get(port.index())
        {
            for buffer in slot.queue.drain() {
                drop(buffer);
            }
        }
        if !pool.is_full() {
            warn!(
                "{}: {} of {} buffers not returned",
                port.name(),
                pool.headers_num() - pool.queue().len(),
                pool.headers_num()
            );
        }
        self.timings.lock().disable_us = self.time.now_us() - start;
        debug!("{}: disabled", port.name());
        Ok(())
    }
}

impl Drop for WrapperInner {
    fn drop(&mut self) {
        debug!("{}: destroying wrapper", self.component.name());
        let ports: Vec<Port> = self
            .component
            .inputs()
            .iter()
            .chain(self.component.outputs())
            .filter(|port| port.is_enabled())
            .cloned()
            .collect();
        for port in ports {
            if let Err(err) = self.disable_port(&port) {
                error!("{}: could not disable on destroy ({})", port.name(), err);
            }
        }
        if let Err(err) = self.component.control().disable() {
            error!("{}: could not disable control port ({})", self.component.name(), err);
        }
        for pool in self
            .input_pools
            .iter()
            .chain(self.outputs.iter().map(|slot| &slot.pool))
        {
            pool.clear_callback();
        }
    }
}

/// Blocking buffer access to a single component.
///
/// Cloning gives another handle; the wrapper disables the component's ports
/// and releases it with the last one.
///
/// # Examples
///
/// ```no_run
/// use mmal::{Wrapper, WrapperFlags};
///
/// # fn main() -> Result<(), mmal::Error> {
/// let wrapper = Wrapper::create("converter")?;
/// let component = wrapper.component();
/// let input = component.input(0).ok_or(mmal::Error::InvalidArg)?;
/// let output = component.output(0).ok_or(mmal::Error::InvalidArg)?;
/// let flags = WrapperFlags { payload_allocate: true, ..Default::default() };
/// wrapper.port_enable(&input, flags)?;
/// wrapper.port_enable(&output, flags)?;
///
/// let empty = wrapper.buffer_get_empty(&output, true)?;
/// output.send(empty)?;
/// let full = wrapper.buffer_get_full(&output, true)?;
/// println!("got {} bytes", full.length());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Wrapper {
    inner: Arc<WrapperInner>,
}

/// Returned buffers go back on the free queue, then waiters are woken.
fn released_callback(wrapper: Weak<WrapperInner>) -> PoolCallback {
    Arc::new(
        move |pool: &Pool, buffer: BufferHeader| -> Option<BufferHeader> {
            let Some(inner) = wrapper.upgrade() else {
                return Some(buffer);
            };
            pool.queue().put(buffer);
            inner.notify();
            None
        },
    )
}

/// Records the first error the component reports.
fn control_callback(wrapper: Weak<WrapperInner>) -> BufferCallback {
    Arc::new(move |port: &Port, event: BufferHeader| {
        let Some(inner) = wrapper.upgrade() else {
            drop(event);
            return;
        };
        if event.cmd() == Some(EventCode::Error) {
            let reported = event.error_event().unwrap_or(Error::Io);
            error!("{}: component reported {}", port.name(), reported);
            inner.status.lock().get_or_insert(reported);
        } else {
            debug!("{}: ignoring event {:?}", port.name(), event.cmd());
        }
        drop(event);
        inner.notify();
    })
}

/// Consumed input buffers go back to their pool; output buffers are queued.
fn port_callback(wrapper: Weak<WrapperInner>) -> BufferCallback {
    Arc::new(move |port: &Port, buffer: BufferHeader| {
        let Some(inner) = wrapper.upgrade() else {
            drop(buffer);
            return;
        };
        match port.port_type() {
            PortType::Output => {
                let Some(slot) = inner.outputs.get(port.index()) else {
                    drop(buffer);
                    return;
                };
                trace!("{}: full buffer, length {}", port.name(), buffer.length());
                slot.queue.put(buffer);
                inner.notify();
            }
            _ => drop(buffer),
        }
    })
}

impl Wrapper {
    /// Creates the component registered under `name` and wraps it.
    ///
    /// # Errors
    ///
    /// Component creation errors, or those of [`Wrapper::new`].
    pub fn create(name: &str) -> Result<Wrapper> {
        let component = Component::create(name)?;
        Self::new(component)
    }

    /// Wraps an existing component.
    ///
    /// # Errors
    ///
    /// Pool creation errors, or the control port enable error.
    pub fn new(component: Component) -> Result<Wrapper> {
        Self::with_time(component, default_time_source())
    }

    /// [`Wrapper::new`] with the clock used for the timings.
    pub fn with_time(component: Component, time: Arc<dyn TimeSource>) -> Result<Wrapper> {
        let start = time.now_us();
        let input_pools = component
            .inputs()
            .iter()
            .map(|port| Pool::for_port(port, 0, 0))
            .collect::<Result<Vec<_>>>()?;
        let outputs = component
            .outputs()
            .iter()
            .map(|port| {
                Ok(OutputSlot {
                    pool: Pool::for_port(port, 0, 0)?,
                    queue: Queue::new(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let inner = Arc::new(WrapperInner {
            component,
            input_pools,
            outputs,
            status: Mutex::new(None),
            generation: Mutex::new(0),
            available: Condvar::new(),
            callback: Mutex::new(None),
            timings: Mutex::new(WrapperTimings::default()),
            time,
        });
        let weak = Arc::downgrade(&inner);
        for pool in inner
            .input_pools
            .iter()
            .chain(inner.outputs.iter().map(|slot| &slot.pool))
        {
            pool.set_callback(released_callback(weak.clone()));
        }

        inner
            .component
            .control()
            .enable(Some(control_callback(weak)))
            .inspect_err(|err| {
                error!("{}: could not enable control port ({})", inner.component.name(), err);
            })?;

        inner.timings.lock().setup_us = inner.time.now_us() - start;
        info!("{}: wrapped", inner.component.name());
        Ok(Wrapper { inner })
    }

    pub fn component(&self) -> &Component {
        &self.inner.component
    }

    /// The first error reported by the component, if any.
    pub fn status(&self) -> Result<()> {
        match self.inner.status.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn timings(&self) -> WrapperTimings {
        *self.inner.timings.lock()
    }

    /// Sets the callback run whenever a buffer becomes available.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(&Wrapper) + Send + Sync + 'static,
    {
        *self.inner.callback.lock() = Some(Arc::new(callback));
    }

    pub fn clear_callback(&self) {
        *self.inner.callback.lock() = None;
    }

    /// Sizes the port's pool from its buffer count and size, then enables
    /// the port.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArg`] for a port that is not one of the wrapped
    ///   component's inputs or outputs
    /// - zero-copy parameter errors other than [`Error::NotSupported`]
    /// - pool resize and port enable errors
    pub fn port_enable(&self, port: &Port, flags: WrapperFlags) -> Result<()> {
        let inner = &self.inner;
        let start = inner.time.now_us();
        let pool = inner.pool_of(port)?;

        if flags.use_shared_memory {
            match port.parameter_set(&Parameter::ZeroCopy(true)) {
                Ok(()) | Err(Error::NotSupported) => {}
                Err(err) => {
                    error!("{}: could not set zero copy ({})", port.name(), err);
                    return Err(err);
                }
            }
        }

        let requirements = port.buffer_requirements();
        let size = if flags.payload_allocate {
            requirements.buffer_size
        } else {
            0
        };
        pool.resize(requirements.buffer_num as usize, size)
            .inspect_err(|err| {
                error!("{}: could not resize pool ({})", port.name(), err);
            })?;

        port.enable(Some(port_callback(Arc::downgrade(inner))))?;
        inner.timings.lock().enable_us = inner.time.now_us() - start;
        debug!("{}: enabled with {} buffers of {} bytes", port.name(), requirements.buffer_num, size);
        Ok(())
    }

    /// Disables the port. Full buffers still queued on an output are
    /// released.
    pub fn port_disable(&self, port: &Port) -> Result<()> {
        self.inner.pool_of(port)?;
        self.inner.disable_port(port)
    }

    /// Takes an empty buffer from the port's pool.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArg`] for a port that is not wrapped
    /// - [`Error::Again`] if none is free and `wait` is false
    /// - the component's reported error, once one was reported
    pub fn buffer_get_empty(&self, port: &Port, wait: bool) -> Result<BufferHeader> {
        let pool = self.inner.pool_of(port)?;
        self.wait_for(|| pool.queue().get(), wait)
    }

    /// Takes a full buffer returned by an output port.
    ///
    /// # Errors
    ///
    /// As [`Wrapper::buffer_get_empty`]; `port` must be an output.
    pub fn buffer_get_full(&self, port: &Port, wait: bool) -> Result<BufferHeader> {
        self.inner.pool_of(port)?;
        let Some(slot) = self.inner.outputs.get(port.index()).filter(|_| {
            port.port_type() == PortType::Output
        }) else {
            error!("{}: full buffers only come from outputs", port.name());
            return Err(Error::InvalidArg);
        };
        self.wait_for(|| slot.queue.get(), wait)
    }

    fn wait_for(
        &self,
        mut take: impl FnMut() -> Option<BufferHeader>,
        wait: bool,
    ) -> Result<BufferHeader> {
        loop {
            let seen = *self.inner.generation.lock();
            if let Some(buffer) = take() {
                return Ok(buffer);
            }
            self.status()?;
            if !wait {
                return Err(Error::Again);
            }
            let mut generation = self.inner.generation.lock();
            while *generation == seen {
                self.inner.available.wait(&mut generation);
            }
        }
    }
}

impl fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wrapper")
            .field("component", &self.inner.component.name())
            .field("status", &self.inner.status.lock())
            .finish()
    }
}
