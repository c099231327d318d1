// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Graphs: components and connections driven by one worker thread.
//!
//! A [`Graph`] holds references on the components and connections added to
//! it. Once enabled, a worker thread moves buffers for every connection that
//! neither tunnels nor delivers directly: empty buffers from each pool go to
//! the output port, full buffers from each queue go to the input port. The
//! worker visits connections round-robin and gives each one a bounded amount
//! of time per pass, so a busy connection cannot starve a quiet one.
//!
//! [`Graph::build`] wraps the graph in a [`Component`] whose ports shadow the
//! ports exposed with [`Graph::add_port`].

mod facade;
mod hooks;
mod worker;

use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::AtomicUsize,
    },
};

use parking_lot::Mutex;
use tracing::{debug, error, info, trace};
use uuid::Uuid;

pub use self::hooks::GraphHooks;
use self::worker::Worker;
use crate::{
    BufferCallback, BufferHeader, Component, Connection, ConnectionFlags, Error, Port, PortType,
    Result,
    component::ComponentInner,
    config::{GraphConfig, TimeSource, default_time_source},
};

/// Receives events from the control ports of a graph's components.
pub type GraphEventCallback = Arc<dyn Fn(&Graph, &Port, BufferHeader) + Send + Sync>;

/// How the ports of a component relate, for propagating enable, disable,
/// flush and format changes through a graph facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Topology {
    /// Every input feeds every output.
    #[default]
    All,
    /// Input `n` only feeds output `n`.
    Straight,
}

impl TryFrom<u32> for Topology {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Topology::All),
            1 => Ok(Topology::Straight),
            other => {
                error!("unsupported topology {}", other);
                Err(Error::NotSupported)
            }
        }
    }
}

struct Member {
    component: Component,
    topology: Topology,
}

#[derive(Default)]
struct Members {
    components: Vec<Member>,
    connections: Vec<Connection>,
    input: Vec<Port>,
    output: Vec<Port>,
    clock: Vec<Port>,
}

impl Members {
    fn exposed(&self, kind: PortType) -> Option<&Vec<Port>> {
        match kind {
            PortType::Input => Some(&self.input),
            PortType::Output => Some(&self.output),
            PortType::Clock => Some(&self.clock),
            PortType::Control => None,
        }
    }

    fn exposed_mut(&mut self, kind: PortType) -> Option<&mut Vec<Port>> {
        match kind {
            PortType::Input => Some(&mut self.input),
            PortType::Output => Some(&mut self.output),
            PortType::Clock => Some(&mut self.clock),
            PortType::Control => None,
        }
    }
}

pub(crate) struct GraphInner {
    id: Uuid,
    config: GraphConfig,
    time: Arc<dyn TimeSource>,
    members: Mutex<Members>,
    /// Round-robin start for the queue pass.
    cursor: AtomicUsize,
    worker: Mutex<Option<Worker>>,
    event_callback: Mutex<Option<GraphEventCallback>>,
    hooks: Mutex<Option<Arc<dyn GraphHooks>>>,
    facade: Mutex<Weak<ComponentInner>>,
}

impl GraphInner {
    /// Schedules a processing pass on the facade's action thread, or on the
    /// worker thread.
    fn wake(&self) {
        let facade = self.facade.lock().upgrade();
        if let Some(inner) = facade {
            if let Err(err) = (Component { inner }).action_trigger() {
                error!("graph {}: could not trigger facade action ({})", self.id, err);
            }
            return;
        }
        if let Some(worker) = self.worker.lock().as_ref() {
            worker.wake();
        }
    }
}

impl Drop for GraphInner {
    fn drop(&mut self) {
        debug!("graph {}: destroying", self.id);
        if let Some(worker) = self.worker.get_mut().take() {
            worker.stop();
        }
        if let Some(hooks) = self.hooks.get_mut().take() {
            hooks.destroy();
        }
        let members = std::mem::take(self.members.get_mut());
        drop(members.connections);
        drop(members.components);
    }
}

/// A set of components and connections processed together.
///
/// Cloning gives another handle on the same graph. The graph, and the
/// references it holds, go away with the last handle (or with the last handle
/// on the component built from it).
///
/// # Examples
///
/// ```no_run
/// use mmal::{Component, ConnectionFlags, Graph, PortType};
///
/// # fn main() -> Result<(), mmal::Error> {
/// let graph = Graph::new();
/// let decoder = graph.new_component("decoder")?;
/// let renderer = graph.new_component("renderer")?;
/// graph.new_connection(
///     &decoder.output(0).ok_or(mmal::Error::InvalidArg)?,
///     &renderer.input(0).ok_or(mmal::Error::InvalidArg)?,
///     ConnectionFlags::empty(),
/// )?;
/// assert!(graph.find_port("DECODER", PortType::Input, 0).is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Graph {
    pub(crate) inner: Arc<GraphInner>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Graph {
        Self::with_config(GraphConfig::default(), default_time_source())
    }

    /// Creates a graph with explicit limits and clock.
    pub fn with_config(config: GraphConfig, time: Arc<dyn TimeSource>) -> Graph {
        let graph = Graph {
            inner: Arc::new(GraphInner {
                id: Uuid::new_v4(),
                config,
                time,
                members: Mutex::new(Members::default()),
                cursor: AtomicUsize::new(0),
                worker: Mutex::new(None),
                event_callback: Mutex::new(None),
                hooks: Mutex::new(None),
                facade: Mutex::new(Weak::new()),
            }),
        };
        info!("graph {}: created", graph.id());
        graph
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &GraphConfig {
        &self.inner.config
    }

    /// Installs client overrides, replacing any previous ones.
    pub fn set_hooks(&self, hooks: impl GraphHooks + 'static) {
        *self.inner.hooks.lock() = Some(Arc::new(hooks));
    }

    pub(crate) fn hooks(&self) -> Option<Arc<dyn GraphHooks>> {
        self.inner.hooks.lock().clone()
    }

    fn slots_left(&self, used: usize, what: &str) -> Result<()> {
        if used >= self.inner.config.max_slots {
            error!("graph {}: no space for {}", self.id(), what);
            return Err(Error::OutOfSpace);
        }
        Ok(())
    }

    /// Adds a reference on `component`.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfSpace`] when the component slots are full.
    pub fn add_component(&self, component: &Component) -> Result<()> {
        trace!("graph {}: adding component {}", self.id(), component.name());
        let mut members = self.inner.members.lock();
        self.slots_left(members.components.len(), component.name())?;
        members.components.push(Member {
            component: component.clone(),
            topology: Topology::All,
        });
        Ok(())
    }

    /// Sets how the ports of a member component relate.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArg`] if `component` is not in the graph.
    pub fn component_topology(&self, component: &Component, topology: Topology) -> Result<()> {
        let mut members = self.inner.members.lock();
        let member = members
            .components
            .iter_mut()
            .find(|member| member.component.ptr_eq(component))
            .ok_or_else(|| {
                error!("graph {}: {} is not a member", self.id(), component.name());
                Error::InvalidArg
            })?;
        member.topology = topology;
        Ok(())
    }

    /// Adds a reference on `connection`.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfSpace`] when the connection slots are full.
    pub fn add_connection(&self, connection: &Connection) -> Result<()> {
        trace!("graph {}: adding connection {}", self.id(), connection.name());
        let mut members = self.inner.members.lock();
        self.slots_left(members.connections.len(), connection.name())?;
        members.connections.push(connection.clone());
        Ok(())
    }

    /// Exposes an inner port on the component built from this graph. Ports
    /// of each type are exposed in the order they are added.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArg`] for a control port
    /// - [`Error::OutOfSpace`] when that type's slots are full
    pub fn add_port(&self, port: &Port) -> Result<()> {
        trace!("graph {}: exposing port {}", self.id(), port.name());
        let mut members = self.inner.members.lock();
        let max_slots = self.inner.config.max_slots;
        let Some(list) = members.exposed_mut(port.port_type()) else {
            error!("graph {}: cannot expose {}", self.id(), port.name());
            return Err(Error::InvalidArg);
        };
        if list.len() >= max_slots {
            error!("graph {}: no space for port {}", self.id(), port.name());
            return Err(Error::OutOfSpace);
        }
        list.push(port.clone());
        Ok(())
    }

    /// Creates a registered component and adds it.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfSpace`] when the component slots are full, or the
    /// creation error.
    pub fn new_component(&self, name: &str) -> Result<Component> {
        self.slots_left(self.inner.members.lock().components.len(), name)?;
        let component = Component::create(name).inspect_err(|err| {
            error!("graph {}: could not create component {} ({})", self.id(), name, err);
        })?;
        self.add_component(&component)?;
        Ok(component)
    }

    /// Creates a connection and adds it.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArg`] unless `output` is an output and `input` an
    ///   input, or both are clocks
    /// - [`Error::OutOfSpace`] when the connection slots are full
    /// - the creation error
    pub fn new_connection(
        &self,
        output: &Port,
        input: &Port,
        flags: ConnectionFlags,
    ) -> Result<Connection> {
        let valid = matches!(
            (output.port_type(), input.port_type()),
            (PortType::Output, PortType::Input) | (PortType::Clock, PortType::Clock)
        );
        if !valid {
            error!("graph {}: cannot connect {} to {}", self.id(), output.name(), input.name());
            return Err(Error::InvalidArg);
        }
        self.slots_left(
            self.inner.members.lock().connections.len(),
            &format!("{}/{}", output.name(), input.name()),
        )?;

        let connection =
            Connection::create_with_time(output, input, flags, self.inner.time.clone())?;
        self.add_connection(&connection)?;
        Ok(connection)
    }

    /// The member components, in the order they were added.
    pub fn components(&self) -> Vec<Component> {
        self.inner
            .members
            .lock()
            .components
            .iter()
            .map(|member| member.component.clone())
            .collect()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.inner.members.lock().connections.clone()
    }

    /// The exposed ports of one type.
    pub fn exposed_ports(&self, kind: PortType) -> Vec<Port> {
        self.inner
            .members
            .lock()
            .exposed(kind)
            .cloned()
            .unwrap_or_default()
    }

    fn topology_of(&self, component: &Component) -> Option<Topology> {
        self.inner
            .members
            .lock()
            .components
            .iter()
            .find(|member| member.component.ptr_eq(component))
            .map(|member| member.topology)
    }

    /// Finds the port of a member by component name (ignoring case), type
    /// and index.
    pub fn find_port(&self, name: &str, kind: PortType, index: usize) -> Option<Port> {
        let members = self.inner.members.lock();
        let found = members
            .components
            .iter()
            .filter(|member| member.component.name().eq_ignore_ascii_case(name))
            .find_map(|member| member.component.ports(kind).get(index).cloned());
        if found.is_none() {
            info!("port {}:{}:{} not found", name, kind, index);
        }
        found
    }

    /// Starts the worker thread, enables every member's control port and
    /// every connection, then lets the worker hand out empty buffers.
    ///
    /// Control port events go to `callback`; without one they are logged and
    /// dropped.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArg`] if the graph is already enabled
    /// - [`Error::OutOfSpace`] if the worker thread cannot be started
    /// - the first connection enable error; the worker is stopped but the
    ///   connections already enabled stay enabled until [`Graph::disable`]
    pub fn enable(&self, callback: Option<GraphEventCallback>) -> Result<()> {
        {
            let mut worker = self.inner.worker.lock();
            if worker.is_some() {
                error!("graph {}: already enabled", self.id());
                return Err(Error::InvalidArg);
            }
            *worker = Some(Worker::spawn(Arc::downgrade(&self.inner), self.id())?);
        }
        *self.inner.event_callback.lock() = callback;

        for component in self.components() {
            let control = component.control();
            if let Err(err) = control.enable(Some(self.control_callback())) {
                error!("graph {}: could not enable port {} ({})", self.id(), control.name(), err);
            }
        }

        for connection in self.connections() {
            let graph = Arc::downgrade(&self.inner);
            connection.set_callback(move |connection| worker::connection_ready(&graph, connection));
            if let Err(err) = connection.enable() {
                error!("graph {}: could not enable {} ({})", self.id(), connection.name(), err);
                self.stop_worker();
                return Err(err);
            }
        }

        self.inner.wake();
        info!("graph {}: enabled", self.id());
        Ok(())
    }

    fn control_callback(&self) -> BufferCallback {
        let graph = Arc::downgrade(&self.inner);
        Arc::new(move |port: &Port, event: BufferHeader| {
            let target = graph.upgrade().and_then(|inner| {
                let callback = inner.event_callback.lock().clone();
                callback.map(|callback| (Graph { inner }, callback))
            });
            match target {
                Some((graph, callback)) => callback(&graph, port, event),
                None => {
                    error!(
                        "event lost on port {} (event callback not defined)",
                        port.name()
                    );
                    drop(event);
                }
            }
        })
    }

    fn stop_worker(&self) {
        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            worker.stop();
        }
    }

    /// Stops the worker thread, then disables the connections in order.
    ///
    /// # Errors
    ///
    /// The first connection disable error; later connections are left
    /// enabled.
    pub fn disable(&self) -> Result<()> {
        self.stop_worker();
        for connection in self.connections() {
            connection.disable()?;
        }
        info!("graph {}: disabled", self.id());
        Ok(())
    }

    /// Whether the worker thread is running.
    pub fn is_enabled(&self) -> bool {
        self.inner.worker.lock().is_some()
    }

    /// Wraps the graph in a component called `name`.
    ///
    /// The component has one port for each exposed port, mirroring its
    /// format and buffer requirements. Operations on those ports are
    /// forwarded to the inner ports and propagated along the graph's
    /// connections. Buffers are moved on the component's action thread.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArg`] if the graph is already wrapped, or errors from
    /// building the component.
    pub fn build(&self, name: &str) -> Result<Component> {
        facade::build(self, name)
    }

    pub fn ptr_eq(&self, other: &Graph) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members = self.inner.members.lock();
        f.debug_struct("Graph")
            .field("id", &self.inner.id)
            .field("components", &members.components.len())
            .field("connections", &members.connections.len())
            .finish()
    }
}
