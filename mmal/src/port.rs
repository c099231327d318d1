// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Ports, the typed endpoints of a component.
//!
//! A [`Port`] is a cheap handle on a port owned by a [`Component`]. The core
//! keeps the port's state machine, its locks and its buffer accounting; the
//! component's behaviour is plugged in through [`PortImpl`].
//!
//! ## Buffer accounting
//!
//! Every buffer accepted by [`Port::send`] counts as "in transit" until the
//! implementation hands it back with [`Port::buffer_header_callback`].
//! [`Port::disable`] waits for that count to drop to zero, so once it returns
//! no callback for this port is still running or about to run.
//!
//! ## Locks
//!
//! Each port has a general lock (format commit, parameters, enable/disable),
//! a send lock (the data path), a stats lock and a connection lock. The
//! owning component's action lock is always taken before a send lock, and the
//! connection locks of two linked ports are taken local port first.

pub mod state;

mod link;
mod stats;

use std::{
    fmt,
    sync::{Arc, Weak},
};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use self::{
    link::LinkState,
    state::{Activity, ActivityFlags, Connectivity, DataPath, Flow, PortState},
    stats::PortStats,
};
use crate::{
    BufferHeader, BufferRequirements, Component, Error, EsFormat, EventCode, EventPayload,
    FormatChangedEvent, Parameter, Payload, Result, SendError, StatsDirection,
    component::{ComponentInner, ComponentShared},
    format::FourCc,
    sync::TransitCounter,
};

/// Client callback receiving buffers (and events) returned by a port.
pub type BufferCallback = Arc<dyn Fn(&Port, BufferHeader) + Send + Sync>;

/// The role of a port on its component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortType {
    Control,
    Input,
    Output,
    Clock,
}

impl PortType {
    /// Short name used in port names.
    pub fn short_name(&self) -> &'static str {
        match self {
            PortType::Control => "ctr",
            PortType::Input => "in",
            PortType::Output => "out",
            PortType::Clock => "clk",
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Capabilities advertised by a port implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// The port hands off references rather than needing payload memory.
    pub passthrough: bool,
    /// The port can allocate payload memory for a connection's pool.
    pub allocation: bool,
    /// The port accepts format-changed events in-band.
    pub supports_event_format_change: bool,
}

/// Behaviour of a port, supplied by the component implementation.
///
/// Every hook is optional. The defaults return [`Error::NotSupported`],
/// which the core treats as "use the default behaviour" where one exists
/// (parameters, payload allocation, connection setup) and as a failure where
/// none does (enable, disable, send, flush, format commit).
///
/// `send` and `flush` run with the port's send lock held; they must not call
/// [`Port::send`], [`Port::pause`] or [`Port::flush`] on the same port.
pub trait PortImpl: Send + Sync {
    /// Applies the format the client edited through [`Port::format_mut`].
    fn set_format(&self, _port: &Port) -> Result<()> {
        Err(Error::NotSupported)
    }

    fn enable(&self, _port: &Port) -> Result<()> {
        Err(Error::NotSupported)
    }

    fn disable(&self, _port: &Port) -> Result<()> {
        Err(Error::NotSupported)
    }

    /// Takes ownership of a buffer. It must come back through
    /// [`Port::buffer_header_callback`].
    fn send(&self, _port: &Port, buffer: BufferHeader) -> core::result::Result<(), SendError> {
        Err(SendError::new(Error::NotSupported, buffer))
    }

    /// Returns every buffer the implementation holds.
    fn flush(&self, _port: &Port) -> Result<()> {
        Err(Error::NotSupported)
    }

    /// Sets up (`Some`) or tears down (`None`) a tunnel to `other`.
    ///
    /// `Ok` means the implementations exchange buffers directly;
    /// [`Error::NotSupported`] means the core moves them.
    fn connect(&self, _port: &Port, _other: Option<&Port>) -> Result<()> {
        Err(Error::NotSupported)
    }

    /// Links (`Some`) or unlinks (`None`) `other` in place of `port`, before
    /// the core records anything.
    ///
    /// Ports standing in for another port connect that one instead.
    /// [`Error::NotSupported`] lets the core link `port` itself.
    fn connect_through(&self, _port: &Port, _other: Option<&Port>) -> Result<()> {
        Err(Error::NotSupported)
    }

    fn parameter_get(&self, _port: &Port, _param: &mut Parameter) -> Result<()> {
        Err(Error::NotSupported)
    }

    fn parameter_set(&self, _port: &Port, _param: &Parameter) -> Result<()> {
        Err(Error::NotSupported)
    }

    /// Allocates payload memory of `size` bytes.
    fn payload_alloc(&self, _port: &Port, _size: u32) -> Result<Vec<u8>> {
        Err(Error::NotSupported)
    }

    /// Takes back memory obtained from [`PortImpl::payload_alloc`].
    fn payload_free(&self, _port: &Port, _payload: Vec<u8>) {}
}

#[derive(Debug, Default)]
struct Settings {
    requirements: BufferRequirements,
    capabilities: Capabilities,
}

pub(crate) struct PortInner {
    kind: PortType,
    index: usize,
    imp: Arc<dyn PortImpl>,
    shared: Arc<ComponentShared>,
    component: Weak<ComponentInner>,
    name: Mutex<String>,
    format: Mutex<EsFormat>,
    settings: Mutex<Settings>,
    /// General lock.
    lock: Mutex<()>,
    /// Send lock.
    data_path: Mutex<DataPath>,
    activity: ActivityFlags,
    callback: Mutex<Option<BufferCallback>>,
    transit: TransitCounter,
    stats: Mutex<PortStats>,
    /// Connection lock.
    link: Mutex<LinkState>,
    /// Never held across calls, so callbacks can read it while the
    /// connection lock is taken.
    peer: Mutex<Weak<PortInner>>,
}

/// A handle on a component's port.
///
/// Cloning is cheap and gives another handle on the same port.
#[derive(Clone)]
pub struct Port {
    pub(crate) inner: Arc<PortInner>,
}

fn port_name(component: &str, kind: PortType, index: usize, encoding: FourCc) -> String {
    if encoding.is_unknown() {
        format!("{component}:{kind}:{index}")
    } else {
        format!("{component}:{kind}:{index}({encoding})")
    }
}

impl Port {
    pub(crate) fn new(
        kind: PortType,
        index: usize,
        imp: Arc<dyn PortImpl>,
        shared: Arc<ComponentShared>,
        component: Weak<ComponentInner>,
    ) -> Port {
        let name = port_name(&shared.name, kind, index, FourCc::UNKNOWN);
        trace!("{}: created", name);
        Port {
            inner: Arc::new(PortInner {
                kind,
                index,
                imp,
                shared,
                component,
                name: Mutex::new(name),
                format: Mutex::new(EsFormat::default()),
                settings: Mutex::new(Settings::default()),
                lock: Mutex::new(()),
                data_path: Mutex::new(DataPath::default()),
                activity: ActivityFlags::default(),
                callback: Mutex::new(None),
                transit: TransitCounter::default(),
                stats: Mutex::new(PortStats::default()),
                link: Mutex::new(LinkState::default()),
                peer: Mutex::new(Weak::new()),
            }),
        }
    }

    /// `component:type:index`, followed by the encoding once one is committed.
    pub fn name(&self) -> String {
        self.inner.name.lock().clone()
    }

    pub fn port_type(&self) -> PortType {
        self.inner.kind
    }

    pub fn index(&self) -> usize {
        self.inner.index
    }

    /// The owning component, unless it is being destroyed.
    pub fn component(&self) -> Option<Component> {
        self.inner.component.upgrade().map(|inner| Component { inner })
    }

    pub fn component_name(&self) -> &str {
        &self.inner.shared.name
    }

    /// Whether both handles refer to the same port.
    pub fn ptr_eq(&self, other: &Port) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// A copy of the current format.
    pub fn format(&self) -> EsFormat {
        self.inner.format.lock().clone()
    }

    /// Locks the format for editing. Edits take effect on
    /// [`Port::format_commit`].
    pub fn format_mut(&self) -> MutexGuard<'_, EsFormat> {
        self.inner.format.lock()
    }

    /// Replaces the format. Takes effect on [`Port::format_commit`].
    pub fn set_format(&self, format: EsFormat) {
        *self.inner.format.lock() = format;
    }

    pub fn buffer_requirements(&self) -> BufferRequirements {
        self.inner.settings.lock().requirements
    }

    /// Replaces the whole set of requirements. Meant for implementations
    /// updating their minimums and recommendations.
    pub fn set_buffer_requirements(&self, requirements: BufferRequirements) {
        self.inner.settings.lock().requirements = requirements;
    }

    /// Sets the number of buffers the client will use.
    pub fn set_buffer_num(&self, num: u32) {
        self.inner.settings.lock().requirements.buffer_num = num;
    }

    /// Sets the payload size the client will use.
    pub fn set_buffer_size(&self, size: u32) {
        self.inner.settings.lock().requirements.buffer_size = size;
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.settings.lock().capabilities
    }

    pub fn set_capabilities(&self, capabilities: Capabilities) {
        self.inner.settings.lock().capabilities = capabilities;
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.activity.load() != Activity::Disabled
    }

    pub fn is_paused(&self) -> bool {
        self.inner.activity.load() == Activity::Enabled(Flow::Paused)
    }

    pub fn state(&self) -> PortState {
        PortState {
            activity: self.inner.activity.load(),
            connectivity: match self.connected_port() {
                Some(peer) => Connectivity::Connected(peer),
                None => Connectivity::Unconnected,
            },
        }
    }

    /// Buffers accepted by `send` and not yet returned.
    pub fn in_transit(&self) -> usize {
        self.inner.transit.get()
    }

    fn update_name(&self) {
        let encoding = self.inner.format.lock().encoding;
        *self.inner.name.lock() =
            port_name(&self.inner.shared.name, self.inner.kind, self.inner.index, encoding);
    }

    fn clamp_requirements(&self) {
        self.inner.settings.lock().requirements.clamp_to_minimums();
    }

    /// Pushes the edited format down to the implementation.
    ///
    /// On success the port's buffer count and size are raised to their
    /// minimums; committing an input also re-clamps every output of the
    /// component, whose requirements may depend on the input format.
    ///
    /// # Errors
    ///
    /// Whatever the implementation returns, including
    /// [`Error::NotSupported`] when it has no `set_format` hook.
    pub fn format_commit(&self) -> Result<()> {
        trace!("{}: committing format", self.name());
        {
            let _lock = self.inner.lock.lock();
            self.inner.imp.set_format(self).inspect_err(|err| {
                error!("{}: format commit failed ({})", self.name(), err);
            })?;
        }

        self.update_name();
        self.clamp_requirements();
        if self.inner.kind == PortType::Input
            && let Some(component) = self.component()
        {
            component.outputs().iter().for_each(Port::clamp_requirements);
        }
        Ok(())
    }

    /// Enables the port.
    ///
    /// An unconnected port needs a `callback` to return buffers through. A
    /// connected port must be given `None`: the core enables both ends of
    /// the connection, allocating and priming a pool when the core moves the
    /// buffers.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArg`] if the port is already enabled, if the
    ///   callback does not match the connection state, or if the buffer
    ///   count or size is below its minimum
    /// - any error from the implementation; the steps already done are
    ///   undone
    pub fn enable(&self, callback: Option<BufferCallback>) -> Result<()> {
        trace!("{}: enabling", self.name());
        let mut link = self.inner.link.lock();
        if self.is_enabled() {
            error!("{}: already enabled", self.name());
            return Err(Error::InvalidArg);
        }

        let Some(peer) = self.connected_port() else {
            let Some(callback) = callback else {
                error!("{}: no callback given", self.name());
                return Err(Error::InvalidArg);
            };
            return self.enable_internal(callback);
        };
        if callback.is_some() {
            error!("{}: callback given for a connected port", self.name());
            return Err(Error::InvalidArg);
        }

        let mut peer_link = peer.inner.link.lock();
        self.enable_connected(&mut link, &peer, &mut peer_link)
    }

    /// [`Port::enable`] with a closure.
    pub fn enable_with<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&Port, BufferHeader) + Send + Sync + 'static,
    {
        self.enable(Some(Arc::new(callback)))
    }

    fn enable_internal(&self, callback: BufferCallback) -> Result<()> {
        let _lock = self.inner.lock.lock();
        if self.is_enabled() {
            return Ok(());
        }

        let requirements = self.buffer_requirements();
        if requirements.buffer_num < requirements.buffer_num_min {
            error!(
                "{}: buffer_num too small ({}/{})",
                self.name(),
                requirements.buffer_num,
                requirements.buffer_num_min
            );
            return Err(Error::InvalidArg);
        }
        if requirements.buffer_size < requirements.buffer_size_min {
            error!(
                "{}: buffer_size too small ({}/{})",
                self.name(),
                requirements.buffer_size,
                requirements.buffer_size_min
            );
            return Err(Error::InvalidArg);
        }

        *self.inner.callback.lock() = Some(callback);
        if let Err(err) = self.inner.imp.enable(self) {
            error!("{}: enable failed ({})", self.name(), err);
            *self.inner.callback.lock() = None;
            return Err(err);
        }

        self.inner
            .data_path
            .lock()
            .set_activity(Activity::Enabled(Flow::Flowing), &self.inner.activity);
        debug!("{}: enabled", self.name());
        Ok(())
    }

    /// Disables the port.
    ///
    /// Every buffer sent to the port, including the ones held while paused,
    /// has gone back through the callback by the time this returns. On a
    /// connected port the output end is disabled before the input end and the
    /// connection's pool is released. Disabling a disabled port succeeds.
    pub fn disable(&self) -> Result<()> {
        trace!("{}: disabling", self.name());
        let mut link = self.inner.link.lock();
        if !self.is_enabled() {
            debug!("{}: already disabled", self.name());
            return Ok(());
        }

        let Some(peer) = self.connected_port() else {
            return self.disable_internal(None);
        };
        let mut peer_link = peer.inner.link.lock();
        self.disable_connected(&mut link, &peer, &mut peer_link)
    }

    /// Disables this port only. `pool` is the connection pool this port owns,
    /// whose release callback must stop feeding the port.
    fn disable_internal(&self, pool: Option<&crate::Pool>) -> Result<()> {
        let _lock = self.inner.lock.lock();
        let previous = {
            let mut path = self.inner.data_path.lock();
            let previous = path.activity();
            if previous == Activity::Disabled {
                return Ok(());
            }
            path.set_activity(Activity::Disabled, &self.inner.activity);
            previous
        };

        let result = {
            let _action = self.inner.shared.action.lock();
            if let Some(pool) = pool {
                pool.clear_callback();
            }
            self.inner.imp.disable(self)
        };
        if let Err(err) = result {
            error!("{}: disable failed ({})", self.name(), err);
            self.inner
                .data_path
                .lock()
                .set_activity(previous, &self.inner.activity);
            return Err(err);
        }

        let held = self.inner.data_path.lock().take_held();
        for buffer in held {
            self.buffer_header_callback(buffer);
        }

        debug!("{}: waiting for {} buffers in transit", self.name(), self.in_transit());
        self.inner.transit.wait_zero();
        debug!("{}: no buffers left in transit", self.name());

        *self.inner.callback.lock() = None;
        Ok(())
    }

    /// Hands a buffer to the port.
    ///
    /// The buffer comes back through the port's callback. While the port is
    /// paused it is held by the core instead of reaching the implementation.
    /// Buffers sent to an output port are empty, so their length is reset.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArg`] if the port is disabled, or if the buffer
    ///   claims payload memory it does not have on a port that is not
    ///   passthrough
    /// - the implementation's error
    ///
    /// The refused buffer is returned inside the [`SendError`].
    pub fn send(&self, buffer: BufferHeader) -> core::result::Result<(), SendError> {
        let missing_payload = {
            let fields = buffer.lock();
            fields.alloc_size != 0 && fields.data.is_none()
        };
        if missing_payload && !self.capabilities().passthrough {
            error!("{}: buffer has no payload memory", self.name());
            return Err(SendError::new(Error::InvalidArg, buffer));
        }

        {
            let mut path = self.inner.data_path.lock();
            let Activity::Enabled(flow) = path.activity() else {
                error!("{}: send on a disabled port", self.name());
                return Err(SendError::new(Error::InvalidArg, buffer));
            };

            if self.inner.kind == PortType::Output && buffer.length() != 0 {
                debug!("{}: given an output buffer with length != 0", self.name());
                buffer.set_length(0);
            }

            self.inner.transit.increment();
            match flow {
                Flow::Paused => path.hold(buffer),
                Flow::Flowing => {
                    if let Err(err) = self.inner.imp.send(self, buffer) {
                        self.inner.transit.decrement();
                        error!("{}: send failed ({})", self.name(), err.error);
                        return Err(err);
                    }
                }
            }
        }

        self.record_stats(StatsDirection::Rx);
        Ok(())
    }

    /// Returns every buffer held by the implementation and by the core.
    ///
    /// A no-op on a disabled port. Held buffers are delivered through the
    /// callback after the locks are released.
    pub fn flush(&self) -> Result<()> {
        trace!("{}: flushing", self.name());
        let held = {
            let _action = self.inner.shared.action.lock();
            let mut path = self.inner.data_path.lock();
            if path.activity() == Activity::Disabled {
                return Ok(());
            }
            self.inner.imp.flush(self).inspect_err(|err| {
                error!("{}: flush failed ({})", self.name(), err);
            })?;
            path.take_held()
        };

        for buffer in held {
            self.buffer_header_callback(buffer);
        }
        Ok(())
    }

    /// Pauses or resumes an enabled port.
    ///
    /// Resuming hands the held buffers to the implementation in order. If
    /// one is refused it and the ones after it stay held and the port stays
    /// paused.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArg`] if the port is disabled
    /// - the implementation's error when replaying held buffers
    pub fn pause(&self, pause: bool) -> Result<()> {
        let mut path = self.inner.data_path.lock();
        let Activity::Enabled(flow) = path.activity() else {
            error!("{}: pause on a disabled port", self.name());
            return Err(Error::InvalidArg);
        };

        if pause {
            path.set_activity(Activity::Enabled(Flow::Paused), &self.inner.activity);
            return Ok(());
        }
        if flow == Flow::Flowing {
            return Ok(());
        }

        while let Some(buffer) = path.next_held() {
            if let Err(err) = self.inner.imp.send(self, buffer) {
                let (err, buffer) = err.into_parts();
                path.hold_front(buffer);
                error!("{}: could not replay held buffer ({})", self.name(), err);
                return Err(err);
            }
        }
        path.set_activity(Activity::Enabled(Flow::Flowing), &self.inner.activity);
        Ok(())
    }

    /// Reads a parameter, falling back to the core's own parameters when the
    /// implementation does not know it.
    pub fn parameter_get(&self, param: &mut Parameter) -> Result<()> {
        let _lock = self.inner.lock.lock();
        match self.inner.imp.parameter_get(self, param) {
            Err(Error::NotSupported) => self.core_parameter_get(param),
            result => result,
        }
    }

    /// Sets a parameter on the implementation.
    pub fn parameter_set(&self, param: &Parameter) -> Result<()> {
        let _lock = self.inner.lock.lock();
        self.inner.imp.parameter_set(self, param)
    }

    fn core_parameter_get(&self, param: &mut Parameter) -> Result<()> {
        match param {
            Parameter::CoreStatistics {
                direction,
                reset,
                stats,
            } => {
                *stats = self.inner.stats.lock().read(*direction, *reset);
                Ok(())
            }
            _ => Err(Error::NotSupported),
        }
    }

    /// Reads (and optionally resets) the statistics for one direction.
    pub fn statistics(&self, direction: StatsDirection, reset: bool) -> crate::CoreStatistics {
        self.inner.stats.lock().read(direction, reset)
    }

    fn record_stats(&self, direction: StatsDirection) {
        let now = self.inner.shared.time.now_us();
        self.inner.stats.lock().record(direction, now);
    }

    /// Allocates payload memory for a buffer on this port.
    ///
    /// Uses the implementation's allocator, or the heap if it has none. The
    /// payload keeps the component alive until it is dropped. A zero `size`
    /// gives no payload.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArg`] if the component is being destroyed
    /// - the implementation's allocation error
    pub fn payload_alloc(&self, size: u32) -> Result<Option<Payload>> {
        if size == 0 {
            return Ok(None);
        }
        let component = self.component().ok_or_else(|| {
            error!("{}: component is gone", self.name());
            Error::InvalidArg
        })?;
        let data = self.payload_alloc_raw(size)?;
        trace!("{}: allocated {} bytes of payload", self.name(), size);
        Ok(Some(Payload::owned(data, self.clone(), component)))
    }

    /// Gives a payload back, releasing the component reference it holds.
    pub fn payload_free(&self, payload: Payload) {
        if payload.port().is_some_and(|owner| !owner.ptr_eq(self)) {
            debug!("{}: freeing a payload owned by another port", self.name());
        }
        drop(payload);
    }

    pub(crate) fn payload_alloc_raw(&self, size: u32) -> Result<Vec<u8>> {
        let _lock = self.inner.lock.lock();
        match self.inner.imp.payload_alloc(self, size) {
            Err(Error::NotSupported) => Ok(vec![0; size as usize]),
            result => result,
        }
    }

    pub(crate) fn free_payload_memory(&self, data: Vec<u8>) {
        let _lock = self.inner.lock.lock();
        self.inner.imp.payload_free(self, data);
    }

    /// Returns a buffer from the implementation to the client.
    ///
    /// Implementations call this for every buffer they got through
    /// [`PortImpl::send`].
    pub fn buffer_header_callback(&self, buffer: BufferHeader) {
        trace!("{}: returning buffer (length {})", self.name(), buffer.length());
        self.record_stats(StatsDirection::Tx);

        let callback = self.inner.callback.lock().clone();
        match callback {
            Some(callback) => callback(self, buffer),
            None => {
                error!("{}: no callback to return buffer to", self.name());
                drop(buffer);
            }
        }
        self.inner.transit.decrement();
    }

    /// Delivers an event to the client's callback.
    ///
    /// Events are not counted as in transit. Without a callback the event is
    /// lost and released.
    pub fn event_send(&self, event: BufferHeader) {
        let callback = self.inner.callback.lock().clone();
        match callback {
            Some(callback) => callback(self, event),
            None => {
                error!(
                    "{}: event lost ({:?}), no callback",
                    self.name(),
                    event.cmd().map(|cmd| cmd.fourcc())
                );
                drop(event);
            }
        }
    }

    /// Takes an event buffer from the component's event pool.
    ///
    /// A format-changed event starts with a copy of the port's current format
    /// in its payload.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfSpace`] when the event pool is empty.
    pub fn event_get(&self, code: EventCode) -> Result<BufferHeader> {
        trace!("{}: event {}", self.name(), code.fourcc());
        let Some(event) = self.inner.shared.event_pool.queue().get() else {
            error!("{}: no event buffer left for {}", self.name(), code.fourcc());
            return Err(Error::OutOfSpace);
        };

        let payload = match code {
            EventCode::FormatChanged => Some(EventPayload::FormatChanged(FormatChangedEvent {
                format: self.format(),
                ..Default::default()
            })),
            _ => None,
        };
        {
            let mut fields = event.lock();
            fields.cmd = Some(code);
            fields.length = 0;
            fields.event = payload;
        }
        Ok(event)
    }
}

impl PartialEq for Port {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.name())
            .field("activity", &self.inner.activity.load())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Component, format::encoding};

    struct Echo;

    impl PortImpl for Echo {
        fn set_format(&self, port: &Port) -> Result<()> {
            let mut requirements = port.buffer_requirements();
            requirements.buffer_num_min = 2;
            requirements.buffer_size_min = port.format().video().map_or(0, |v| v.width * v.height);
            port.set_buffer_requirements(requirements);
            Ok(())
        }

        fn enable(&self, _port: &Port) -> Result<()> {
            Ok(())
        }

        fn disable(&self, _port: &Port) -> Result<()> {
            Ok(())
        }

        fn send(&self, port: &Port, buffer: BufferHeader) -> core::result::Result<(), SendError> {
            port.buffer_header_callback(buffer);
            Ok(())
        }
    }

    fn echo_component() -> Component {
        Component::builder("echo")
            .input(Echo)
            .output(Echo)
            .build()
            .unwrap()
    }

    #[test]
    fn commit_renames_and_clamps() {
        let component = echo_component();
        let input = component.input(0).unwrap();
        assert_eq!(input.name(), "echo:in:0");

        input.set_format(EsFormat::new_video(encoding::I420, 4, 4));
        input.format_commit().unwrap();
        assert_eq!(input.name(), "echo:in:0(I420)");
        let requirements = input.buffer_requirements();
        assert_eq!(requirements.buffer_num, 2);
        assert_eq!(requirements.buffer_size, 16);
    }

    #[test]
    fn send_counts_both_directions() {
        let component = echo_component();
        let input = component.input(0).unwrap();
        input.enable_with(|_, buffer| drop(buffer)).unwrap();

        let pool = crate::Pool::new(2, 0).unwrap();
        input.send(pool.queue().get().unwrap()).unwrap();
        input.send(pool.queue().get().unwrap()).unwrap();

        assert_eq!(input.statistics(StatsDirection::Rx, false).buffer_count, 2);
        assert_eq!(input.statistics(StatsDirection::Tx, false).buffer_count, 2);
        assert_eq!(input.in_transit(), 0);
        assert!(pool.is_full());
        input.disable().unwrap();
    }

    #[test]
    fn output_buffers_are_sent_empty() {
        let component = echo_component();
        let output = component.output(0).unwrap();
        let lengths = Arc::new(Mutex::new(Vec::new()));
        {
            let lengths = lengths.clone();
            output
                .enable_with(move |_, buffer| lengths.lock().push(buffer.length()))
                .unwrap();
        }

        let pool = crate::Pool::new(1, 0).unwrap();
        let buffer = pool.queue().get().unwrap();
        buffer.set_length(42);
        output.send(buffer).unwrap();
        assert_eq!(*lengths.lock(), vec![0]);
        output.disable().unwrap();
    }

    #[test]
    fn statistics_parameter_falls_back_to_core() {
        let component = echo_component();
        let input = component.input(0).unwrap();
        let mut param = Parameter::core_statistics(StatsDirection::Tx, false);
        input.parameter_get(&mut param).unwrap();
        assert_eq!(param, Parameter::core_statistics(StatsDirection::Tx, false));
        assert_eq!(
            input.parameter_set(&Parameter::ZeroCopy(true)),
            Err(Error::NotSupported)
        );
    }
}
