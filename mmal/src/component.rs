// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Components: named processing elements owning a set of ports.
//!
//! A [`Component`] is a shared handle. Cloning acquires a reference and
//! dropping releases it; when the last one goes, every still-enabled port is
//! disabled, the action thread is stopped and the implementation's
//! [`ComponentImpl::destroy`] hook runs, all on the releasing thread.

mod action;
pub mod registry;

use std::{fmt, sync::Arc};

use parking_lot::MutexGuard;
use tracing::{debug, error, info};
use uuid::Uuid;

pub use self::action::ActionFn;
use self::action::Action;
use crate::{
    Error, EventCode, EventPayload, Pool, Port, PortImpl, PortType, Result,
    config::{ComponentConfig, TimeSource, default_time_source},
};

/// Component-wide behaviour, supplied by the implementation.
pub trait ComponentImpl: Send + Sync {
    fn enable(&self, _component: &Component) -> Result<()> {
        Err(Error::NotSupported)
    }

    fn disable(&self, _component: &Component) -> Result<()> {
        Err(Error::NotSupported)
    }

    /// Called once the component's ports are disabled, before it is freed.
    fn destroy(&self) {}
}

/// Default control port: accepts enable and disable, declines the rest.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlPort;

impl PortImpl for ControlPort {
    fn enable(&self, _port: &Port) -> Result<()> {
        Ok(())
    }

    fn disable(&self, _port: &Port) -> Result<()> {
        Ok(())
    }
}

/// State the ports of a component reach even while it is being destroyed.
pub(crate) struct ComponentShared {
    pub(crate) id: Uuid,
    pub(crate) name: String,
    pub(crate) event_pool: Pool,
    pub(crate) action: Action,
    pub(crate) time: Arc<dyn TimeSource>,
}

pub(crate) struct ComponentInner {
    pub(crate) shared: Arc<ComponentShared>,
    control: Port,
    input: Vec<Port>,
    output: Vec<Port>,
    clock: Vec<Port>,
    module: Option<Arc<dyn ComponentImpl>>,
}

impl ComponentInner {
    fn ports(&self) -> impl Iterator<Item = &Port> {
        std::iter::once(&self.control)
            .chain(&self.input)
            .chain(&self.output)
            .chain(&self.clock)
    }
}

impl Drop for ComponentInner {
    fn drop(&mut self) {
        debug!("{}: destroying ({})", self.shared.name, self.shared.id);
        for port in self.ports() {
            if port.is_enabled()
                && let Err(err) = port.disable()
            {
                error!("{}: could not disable on destroy ({})", port.name(), err);
            }
        }
        self.shared.action.deregister();
        if let Some(module) = &self.module {
            module.destroy();
        }
    }
}

/// A handle on a component.
///
/// # Examples
///
/// ```
/// use mmal::{Component, ControlPort, PortType};
///
/// # fn main() -> Result<(), mmal::Error> {
/// let component = Component::builder("null_sink").input(ControlPort).build()?;
/// assert_eq!(component.ports(PortType::Input).len(), 1);
/// assert_eq!(component.input(0).map(|port| port.name()).as_deref(), Some("null_sink:in:0"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Component {
    pub(crate) inner: Arc<ComponentInner>,
}

impl Component {
    /// Starts building a component called `name`.
    pub fn builder(name: &str) -> ComponentBuilder {
        ComponentBuilder::new(name)
    }

    pub fn id(&self) -> Uuid {
        self.inner.shared.id
    }

    pub fn name(&self) -> &str {
        &self.inner.shared.name
    }

    pub fn control(&self) -> Port {
        self.inner.control.clone()
    }

    pub fn input(&self, index: usize) -> Option<Port> {
        self.inner.input.get(index).cloned()
    }

    pub fn output(&self, index: usize) -> Option<Port> {
        self.inner.output.get(index).cloned()
    }

    pub fn clock(&self, index: usize) -> Option<Port> {
        self.inner.clock.get(index).cloned()
    }

    pub fn inputs(&self) -> &[Port] {
        &self.inner.input
    }

    pub fn outputs(&self) -> &[Port] {
        &self.inner.output
    }

    pub fn clocks(&self) -> &[Port] {
        &self.inner.clock
    }

    /// The ports of one type, in index order.
    pub fn ports(&self, kind: PortType) -> &[Port] {
        match kind {
            PortType::Control => std::slice::from_ref(&self.inner.control),
            PortType::Input => &self.inner.input,
            PortType::Output => &self.inner.output,
            PortType::Clock => &self.inner.clock,
        }
    }

    /// Number of live handles on this component, payload references
    /// included.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn ptr_eq(&self, other: &Component) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Free buffers in the event pool.
    pub fn free_events(&self) -> usize {
        self.inner.shared.event_pool.queue().len()
    }

    /// Runs the implementation's enable hook.
    pub fn enable(&self) -> Result<()> {
        match &self.inner.module {
            Some(module) => module.enable(self),
            None => Err(Error::NotSupported),
        }
    }

    /// Runs the implementation's disable hook.
    pub fn disable(&self) -> Result<()> {
        match &self.inner.module {
            Some(module) => module.disable(self),
            None => Err(Error::NotSupported),
        }
    }

    /// Reports an asynchronous error through an event on the control port.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfSpace`] if no event buffer is left.
    pub fn send_error_event(&self, error: Error) -> Result<()> {
        let control = self.control();
        let event = control.event_get(EventCode::Error)?;
        event.lock().event = Some(EventPayload::Error(error));
        control.event_send(event);
        Ok(())
    }

    /// Starts the action thread, running `action` on each trigger.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArg`] if an action is already registered.
    pub fn action_register<F>(&self, action: F) -> Result<()>
    where
        F: Fn(&Component) + Send + Sync + 'static,
    {
        self.inner.shared.action.register(self, Arc::new(action))
    }

    /// Stops the action thread.
    pub fn action_deregister(&self) -> Result<()> {
        if self.inner.shared.action.deregister() {
            Ok(())
        } else {
            Err(Error::InvalidArg)
        }
    }

    /// Wakes the action thread.
    pub fn action_trigger(&self) -> Result<()> {
        self.inner.shared.action.trigger()
    }

    /// Takes the action lock, excluding the action and any port disable or
    /// flush on this component.
    pub fn action_lock(&self) -> MutexGuard<'_, ()> {
        self.inner.shared.action.lock()
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name())
            .field("id", &self.id())
            .field("inputs", &self.inner.input.len())
            .field("outputs", &self.inner.output.len())
            .field("clocks", &self.inner.clock.len())
            .finish()
    }
}

/// Builder for [`Component`].
pub struct ComponentBuilder {
    name: String,
    config: ComponentConfig,
    time: Option<Arc<dyn TimeSource>>,
    control: Arc<dyn PortImpl>,
    ports: Vec<(PortType, Arc<dyn PortImpl>)>,
    module: Option<Arc<dyn ComponentImpl>>,
}

impl ComponentBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            config: ComponentConfig::default(),
            time: None,
            control: Arc::new(ControlPort),
            ports: Vec::new(),
            module: None,
        }
    }

    pub fn config(mut self, config: ComponentConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock used for port statistics.
    pub fn time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = Some(time);
        self
    }

    /// Replaces the default control port implementation.
    pub fn control(mut self, imp: impl PortImpl + 'static) -> Self {
        self.control = Arc::new(imp);
        self
    }

    pub fn input(self, imp: impl PortImpl + 'static) -> Self {
        self.port(PortType::Input, Arc::new(imp))
    }

    pub fn output(self, imp: impl PortImpl + 'static) -> Self {
        self.port(PortType::Output, Arc::new(imp))
    }

    pub fn clock(self, imp: impl PortImpl + 'static) -> Self {
        self.port(PortType::Clock, Arc::new(imp))
    }

    /// Adds a port of any non-control type from a shared implementation.
    pub fn port(mut self, kind: PortType, imp: Arc<dyn PortImpl>) -> Self {
        if kind == PortType::Control {
            self.control = imp;
        } else {
            self.ports.push((kind, imp));
        }
        self
    }

    pub fn module(mut self, module: impl ComponentImpl + 'static) -> Self {
        self.module = Some(Arc::new(module));
        self
    }

    /// Creates the component and its ports.
    ///
    /// # Errors
    ///
    /// Returns an error if the event pool cannot be allocated.
    pub fn build(self) -> Result<Component> {
        let shared = Arc::new(ComponentShared {
            id: Uuid::new_v4(),
            name: self.name,
            event_pool: Pool::new(self.config.event_buffers, 0)?,
            action: Action::default(),
            time: self.time.unwrap_or_else(default_time_source),
        });

        let control = self.control;
        let ports = self.ports;
        let module = self.module;
        let inner = Arc::new_cyclic(|weak| {
            let make = |kind: PortType| -> Vec<Port> {
                ports
                    .iter()
                    .filter(|(port_kind, _)| *port_kind == kind)
                    .enumerate()
                    .map(|(index, (_, imp))| {
                        Port::new(kind, index, imp.clone(), shared.clone(), weak.clone())
                    })
                    .collect()
            };
            ComponentInner {
                control: Port::new(PortType::Control, 0, control, shared.clone(), weak.clone()),
                input: make(PortType::Input),
                output: make(PortType::Output),
                clock: make(PortType::Clock),
                shared: shared.clone(),
                module,
            }
        });

        let component = Component { inner };
        info!(
            "{}: created ({}) with {} inputs, {} outputs, {} clocks",
            component.name(),
            component.id(),
            component.inputs().len(),
            component.outputs().len(),
            component.clocks().len()
        );
        Ok(component)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::Parameter;

    struct Counting(Arc<AtomicUsize>);

    impl ComponentImpl for Counting {
        fn destroy(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn last_release_destroys_once() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let component = Component::builder("counted")
            .module(Counting(destroyed.clone()))
            .build()
            .unwrap();
        let extra = component.clone();
        drop(component);
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);
        drop(extra);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_enable_hook_is_not_supported() {
        let component = Component::builder("plain").build().unwrap();
        assert_eq!(component.enable(), Err(Error::NotSupported));
        assert_eq!(
            component.control().parameter_set(&Parameter::ZeroCopy(false)),
            Err(Error::NotSupported)
        );
    }

    #[test]
    fn error_event_reaches_control_callback() {
        let component = Component::builder("faulty").build().unwrap();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            component
                .control()
                .enable_with(move |_, event| seen.lock().push(event.error_event()))
                .unwrap();
        }

        component.send_error_event(Error::Corrupt).unwrap();
        assert_eq!(*seen.lock(), vec![Some(Error::Corrupt)]);
        assert_eq!(component.free_events(), 8);
    }

    #[test]
    fn event_pool_runs_dry() {
        let component = Component::builder("busy")
            .config(ComponentConfig { event_buffers: 1 })
            .build()
            .unwrap();
        let control = component.control();
        let held = control.event_get(EventCode::Eos).unwrap();
        assert_eq!(control.event_get(EventCode::Eos).unwrap_err(), Error::OutOfSpace);
        drop(held);
        assert_eq!(component.free_events(), 1);
    }

    #[test]
    fn action_runs_on_trigger() {
        let component = Component::builder("active").build().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = std::sync::mpsc::channel();
        {
            let runs = runs.clone();
            component
                .action_register(move |_| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    let _ = tx.send(());
                })
                .unwrap();
        }
        assert_eq!(
            component.action_register(|_| {}),
            Err(Error::InvalidArg)
        );

        component.action_trigger().unwrap();
        rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        component.action_deregister().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(component.action_trigger(), Err(Error::InvalidArg));
    }
}
