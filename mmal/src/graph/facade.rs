// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! A graph seen from outside as a single component.
//!
//! Each port of the facade shadows one exposed inner port. Enabling,
//! disabling, flushing or committing a format on a facade port also walks the
//! graph's connections from the inner port, following each member's
//! [`Topology`], so the whole chain behind the port follows along.

use std::sync::{Arc, Weak};

use tracing::{debug, error, info, trace};

use super::{Graph, GraphInner, Topology, worker};
use crate::{
    BufferCallback, BufferHeader, Component, ComponentImpl, Error, Parameter, ParameterId, Port,
    PortImpl, PortType, Result, SendError,
    component::ComponentInner,
    port::PortInner,
};

pub(super) fn build(graph: &Graph, name: &str) -> Result<Component> {
    trace!("graph {}: building component {}", graph.id(), name);
    if graph.inner.facade.lock().upgrade().is_some() {
        error!("graph {}: already built as a component", graph.id());
        return Err(Error::InvalidArg);
    }

    let mut builder = Component::builder(name)
        .control(FacadeControl {
            graph: graph.clone(),
        })
        .module(FacadeModule {
            graph: graph.clone(),
        });
    for kind in [PortType::Input, PortType::Output, PortType::Clock] {
        for index in 0..graph.exposed_ports(kind).len() {
            builder = builder.port(
                kind,
                Arc::new(FacadePort {
                    graph: graph.clone(),
                    kind,
                    index,
                }),
            );
        }
    }
    let component = builder.build()?;

    for kind in [PortType::Input, PortType::Output, PortType::Clock] {
        for (facade_port, inner) in component.ports(kind).iter().zip(graph.exposed_ports(kind)) {
            mirror(facade_port, &inner, true);
        }
    }

    let weak_graph = Arc::downgrade(&graph.inner);
    component.action_register(move |_| {
        let Some(inner) = weak_graph.upgrade() else {
            return;
        };
        let graph = Graph { inner };
        while worker::process(&graph) {}
    })?;

    for connection in graph.connections() {
        let weak_graph = Arc::downgrade(&graph.inner);
        connection.set_callback(move |connection| worker::connection_ready(&weak_graph, connection));
    }

    *graph.inner.facade.lock() = Arc::downgrade(&component.inner);

    let callback =
        member_control_callback(Arc::downgrade(&graph.inner), Arc::downgrade(&component.inner));
    for member in graph.components() {
        let control = member.control();
        if let Err(err) = control.enable(Some(callback.clone())) {
            error!("could not enable port {} ({})", control.name(), err);
        }
    }

    info!("graph {}: built as component {}", graph.id(), component.name());
    Ok(component)
}

/// Member control events go to the hook, then out of the facade's control
/// port.
fn member_control_callback(
    graph: Weak<GraphInner>,
    facade: Weak<ComponentInner>,
) -> BufferCallback {
    Arc::new(move |port: &Port, event: BufferHeader| {
        let mut event = event;
        if let Some(inner) = graph.upgrade() {
            let graph = Graph { inner };
            if let Some(hooks) = graph.hooks() {
                match hooks.control_callback(&graph, port, event) {
                    Ok(()) => return,
                    Err(err) if err.is_not_supported() => event = err.buffer,
                    Err(_) => return,
                }
            }
        }
        match facade.upgrade() {
            Some(inner) => Component { inner }.control().event_send(event),
            None => {
                error!("event lost on port {} (graph component is gone)", port.name());
                drop(event);
            }
        }
    })
}

/// Copies an inner port's format, requirements and capabilities onto the
/// facade port. The buffer count and size are copied only on `init`.
fn mirror(facade_port: &Port, inner: &Port, init: bool) {
    facade_port.set_format(inner.format());
    refresh_requirements(facade_port, inner);
    if init {
        let source = inner.buffer_requirements();
        facade_port.set_buffer_num(source.buffer_num);
        facade_port.set_buffer_size(source.buffer_size);
    }
    facade_port.set_capabilities(inner.capabilities());
}

fn refresh_requirements(facade_port: &Port, inner: &Port) {
    let source = inner.buffer_requirements();
    let mut requirements = facade_port.buffer_requirements();
    requirements.buffer_num_min = source.buffer_num_min;
    requirements.buffer_num_recommended = source.buffer_num_recommended;
    requirements.buffer_size_min = source.buffer_size_min;
    requirements.buffer_size_recommended = source.buffer_size_recommended;
    requirements.buffer_alignment_min = source.buffer_alignment_min;
    facade_port.set_buffer_requirements(requirements);
}

/// Whether buffers can flow between two ports of the same member.
fn linked(graph: &Graph, port: &Port, other: &Port) -> bool {
    let Some(component) = port.component() else {
        return false;
    };
    match graph.topology_of(&component) {
        Some(Topology::Straight) => port.index() == other.index(),
        Some(Topology::All) => true,
        None => false,
    }
}

/// Enables (or disables) the connections on the far side of `port`'s
/// component, then recurses from their other end.
fn propagate_state(graph: &Graph, port: &Port, enable: bool) -> Result<()> {
    trace!("graph {}: propagating {} from {}", graph.id(), enable, port.name());
    let Some(component) = port.component() else {
        return Ok(());
    };
    let kind = match port.port_type() {
        PortType::Output => PortType::Input,
        PortType::Input => PortType::Output,
        other => other,
    };
    let connections = graph.connections();

    for candidate in component.ports(kind) {
        if candidate.is_enabled() == enable {
            continue;
        }
        let Some(connection) = connections
            .iter()
            .find(|c| c.output().ptr_eq(candidate) || c.input().ptr_eq(candidate))
        else {
            continue;
        };
        if !linked(graph, port, candidate) {
            continue;
        }

        if enable {
            connection.enable()?;
        }
        let next = if connection.input().ptr_eq(candidate) {
            connection.output()
        } else {
            connection.input()
        };
        propagate_state(graph, next, enable)?;
        if !enable {
            connection.disable()?;
        }
    }
    Ok(())
}

/// Flushes `port`, then for an input drops what waits in the queues leaving
/// its component and flushes the next inputs down.
fn propagate_flush(graph: &Graph, port: &Port) -> Result<()> {
    trace!("graph {}: flushing from {}", graph.id(), port.name());
    port.flush()?;
    if port.port_type() == PortType::Output {
        return Ok(());
    }
    let Some(component) = port.component() else {
        return Ok(());
    };
    let connections = graph.connections();

    for candidate in component.outputs() {
        if !candidate.is_enabled() {
            continue;
        }
        let Some(connection) = connections.iter().find(|c| c.output().ptr_eq(candidate)) else {
            continue;
        };
        if !linked(graph, port, candidate) {
            continue;
        }
        for buffer in connection.queue().drain() {
            drop(buffer);
        }
        propagate_flush(graph, connection.input())?;
    }
    Ok(())
}

/// Carries a committed input format across the still-disabled connections
/// leaving its component.
fn propagate_format(graph: &Graph, port: &Port) -> Result<()> {
    if matches!(port.port_type(), PortType::Output | PortType::Clock) {
        return Ok(());
    }
    let Some(component) = port.component() else {
        return Ok(());
    };
    let connections = graph.connections();

    for candidate in component.outputs() {
        if candidate.is_enabled() {
            continue;
        }
        let Some(connection) = connections.iter().find(|c| c.output().ptr_eq(candidate)) else {
            continue;
        };
        if !linked(graph, port, candidate) {
            continue;
        }
        let input = connection.input();
        input.set_format(connection.output().format());
        input.format_commit()?;
        debug!("{}: format carried from {}", input.name(), connection.output().name());
        propagate_format(graph, input)?;
    }
    Ok(())
}

/// Runs `hook`, falling through to `default` only on
/// [`Error::NotSupported`].
fn hook_or<T>(
    graph: &Graph,
    hook: impl FnOnce(&dyn super::GraphHooks) -> Result<T>,
    default: impl FnOnce() -> Result<T>,
) -> Result<T> {
    if let Some(hooks) = graph.hooks() {
        match hook(hooks.as_ref()) {
            Err(Error::NotSupported) => {}
            result => return result,
        }
    }
    default()
}

/// Control port of the facade: parameters go to each member in turn.
struct FacadeControl {
    graph: Graph,
}

impl FacadeControl {
    fn fan_out(&self, mut apply: impl FnMut(&Port) -> Result<()>) -> Result<()> {
        let mut result = Err(Error::NotSupported);
        for member in self.graph.components() {
            result = apply(&member.control());
            if result.is_ok() {
                break;
            }
        }
        result
    }
}

impl PortImpl for FacadeControl {
    fn enable(&self, _port: &Port) -> Result<()> {
        Ok(())
    }

    fn disable(&self, _port: &Port) -> Result<()> {
        Ok(())
    }

    fn parameter_get(&self, port: &Port, param: &mut Parameter) -> Result<()> {
        if let Some(hooks) = self.graph.hooks() {
            match hooks.parameter_get(&self.graph, port, param) {
                Err(Error::NotSupported) => {}
                result => return result,
            }
        }
        self.fan_out(|control| control.parameter_get(param))
    }

    fn parameter_set(&self, port: &Port, param: &Parameter) -> Result<()> {
        hook_or(
            &self.graph,
            |hooks| hooks.parameter_set(&self.graph, port, param),
            || self.fan_out(|control| control.parameter_set(param)),
        )
    }
}

/// Component-level hooks of the facade.
struct FacadeModule {
    graph: Graph,
}

impl ComponentImpl for FacadeModule {
    fn enable(&self, _component: &Component) -> Result<()> {
        hook_or(
            &self.graph,
            |hooks| hooks.graph_enable(&self.graph, true),
            || Err(Error::NotSupported),
        )
    }

    fn disable(&self, _component: &Component) -> Result<()> {
        hook_or(
            &self.graph,
            |hooks| hooks.graph_enable(&self.graph, false),
            || Err(Error::NotSupported),
        )
    }
}

/// A facade port standing for the `index`th exposed port of type `kind`.
struct FacadePort {
    graph: Graph,
    kind: PortType,
    index: usize,
}

impl FacadePort {
    fn inner_port(&self) -> Result<Port> {
        self.graph
            .inner
            .members
            .lock()
            .exposed(self.kind)
            .and_then(|ports| ports.get(self.index).cloned())
            .ok_or_else(|| {
                error!("graph {}: no inner port for {}:{}", self.graph.id(), self.kind, self.index);
                Error::InvalidArg
            })
    }

    /// Buffers and events from the inner port leave through the facade port.
    fn forward_callback(&self, facade_port: &Port) -> BufferCallback {
        let facade_port: Weak<PortInner> = Arc::downgrade(&facade_port.inner);
        let graph = Arc::downgrade(&self.graph.inner);
        Arc::new(move |_: &Port, buffer: BufferHeader| {
            let Some(inner) = facade_port.upgrade() else {
                drop(buffer);
                return;
            };
            let port = Port { inner };
            let mut buffer = buffer;
            if let Some(graph) = graph.upgrade().map(|inner| Graph { inner })
                && let Some(hooks) = graph.hooks()
            {
                match hooks.return_buffer(&graph, &port, buffer) {
                    Ok(()) => return,
                    Err(err) if err.is_not_supported() => buffer = err.buffer,
                    Err(_) => return,
                }
            }
            if buffer.cmd().is_some() {
                port.event_send(buffer);
            } else {
                port.buffer_header_callback(buffer);
            }
        })
    }
}

impl PortImpl for FacadePort {
    fn enable(&self, port: &Port) -> Result<()> {
        let inner = self.inner_port()?;
        let requirements = port.buffer_requirements();
        inner.set_buffer_num(requirements.buffer_num);
        inner.set_buffer_size(requirements.buffer_size);

        if let Some(hooks) = self.graph.hooks() {
            match hooks.enable(&self.graph, port) {
                Err(Error::NotSupported) => {}
                result => return result,
            }
        }

        inner.enable(Some(self.forward_callback(port)))?;
        let result = propagate_state(&self.graph, &inner, true);
        if let Some(component) = port.component()
            && let Err(err) = component.action_trigger()
        {
            error!("{}: could not trigger processing ({})", port.name(), err);
        }
        result
    }

    fn disable(&self, port: &Port) -> Result<()> {
        let inner = self.inner_port()?;
        if let Some(hooks) = self.graph.hooks() {
            match hooks.disable(&self.graph, port) {
                Err(Error::NotSupported) => {}
                result => return result,
            }
        }

        // Disabling flushes, so only walk the chain from an input unless
        // the graph has none.
        let has_inputs = !self.graph.exposed_ports(PortType::Input).is_empty();
        if !has_inputs || inner.port_type() == PortType::Input {
            propagate_state(&self.graph, &inner, false)?;
        }
        inner.disable()
    }

    fn flush(&self, port: &Port) -> Result<()> {
        let inner = self.inner_port()?;
        hook_or(
            &self.graph,
            |hooks| hooks.flush(&self.graph, port),
            || propagate_flush(&self.graph, &inner),
        )
    }

    fn send(&self, port: &Port, buffer: BufferHeader) -> core::result::Result<(), SendError> {
        let inner = match self.inner_port() {
            Ok(inner) => inner,
            Err(err) => return Err(SendError::new(err, buffer)),
        };
        let mut buffer = buffer;
        if let Some(hooks) = self.graph.hooks() {
            match hooks.send_buffer(&self.graph, port, buffer) {
                Err(err) if err.is_not_supported() => buffer = err.buffer,
                result => return result,
            }
        }
        inner.send(buffer)
    }

    fn set_format(&self, port: &Port) -> Result<()> {
        let inner = self.inner_port()?;
        let hooked = match self.graph.hooks() {
            Some(hooks) => match hooks.format_commit(&self.graph, port) {
                Ok(()) => true,
                Err(Error::NotSupported) => false,
                Err(err) => return Err(err),
            },
            None => false,
        };

        if !hooked {
            inner.set_format(port.format());
            let requirements = port.buffer_requirements();
            inner.set_buffer_num(requirements.buffer_num);
            inner.set_buffer_size(requirements.buffer_size);
            inner.format_commit()?;
            propagate_format(&self.graph, &inner).inspect_err(|err| {
                error!("couldn't propagate format commit of port {} ({})", inner.name(), err);
            })?;
        }

        mirror(port, &inner, false);
        if self.kind == PortType::Input
            && let Some(component) = port.component()
        {
            let exposed = self.graph.exposed_ports(PortType::Output);
            for (facade_output, inner_output) in component.outputs().iter().zip(&exposed) {
                mirror(facade_output, inner_output, false);
            }
        }
        Ok(())
    }

    fn parameter_get(&self, port: &Port, param: &mut Parameter) -> Result<()> {
        if let Some(hooks) = self.graph.hooks() {
            match hooks.parameter_get(&self.graph, port, param) {
                Err(Error::NotSupported) => {}
                result => return result,
            }
        }
        self.inner_port()?.parameter_get(param)
    }

    fn parameter_set(&self, port: &Port, param: &Parameter) -> Result<()> {
        let inner = self.inner_port()?;
        hook_or(
            &self.graph,
            |hooks| hooks.parameter_set(&self.graph, port, param),
            || {
                inner.parameter_set(param)?;
                if param.id() == ParameterId::BufferRequirements
                    && let Some(component) = port.component()
                {
                    for kind in [PortType::Input, PortType::Output] {
                        let exposed = self.graph.exposed_ports(kind);
                        for (facade_port, shadowed) in component.ports(kind).iter().zip(&exposed) {
                            refresh_requirements(facade_port, shadowed);
                        }
                    }
                }
                Ok(())
            },
        )
    }

    /// The facade port never links itself; the inner port takes the link.
    fn connect_through(&self, port: &Port, other: Option<&Port>) -> Result<()> {
        let inner = self.inner_port()?;
        hook_or(
            &self.graph,
            |hooks| hooks.connect(&self.graph, port, other),
            || match other {
                Some(other) => inner.connect(other),
                None => inner.disconnect(),
            },
        )
    }

    fn payload_alloc(&self, port: &Port, size: u32) -> Result<Vec<u8>> {
        let inner = self.inner_port()?;
        hook_or(
            &self.graph,
            |hooks| hooks.payload_alloc(&self.graph, port, size),
            || inner.payload_alloc_raw(size),
        )
    }

    fn payload_free(&self, port: &Port, payload: Vec<u8>) {
        let Ok(inner) = self.inner_port() else {
            return;
        };
        let payload = match self.graph.hooks() {
            Some(hooks) => hooks.payload_free(&self.graph, port, payload),
            None => Some(payload),
        };
        if let Some(payload) = payload {
            inner.free_payload_memory(payload);
        }
    }
}
