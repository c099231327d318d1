// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Mock components shared by the integration tests.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use mmal::{
    BufferHeader, BufferRequirements, Component, Port, PortImpl, PortType, Result, SendError,
};
use parking_lot::Mutex;

/// Ensures logging is initialized only once across all tests.
static LOG_ONCE: std::sync::Once = std::sync::Once::new();

/// Initializes logging once (respects the RUST_LOG environment variable).
pub fn setup_logging() {
    LOG_ONCE.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .with_test_writer()
            .init();
    });
}

/// A port implementation that keeps every buffer it is sent until the test
/// releases it, or until the port is flushed or disabled.
#[derive(Default)]
pub struct Holder {
    held: Mutex<VecDeque<BufferHeader>>,
    disables: AtomicUsize,
}

impl Holder {
    pub fn held(&self) -> usize {
        self.held.lock().len()
    }

    /// How many times the port was disabled.
    pub fn disables(&self) -> usize {
        self.disables.load(Ordering::SeqCst)
    }

    /// Tags the held buffers `first`, `first + 1`, ... oldest first.
    pub fn tag(&self, first: u64) {
        for (tag, buffer) in (first..).zip(self.held.lock().iter()) {
            buffer.set_user_data(tag);
        }
    }

    /// `user_data` of the held buffers, oldest first.
    pub fn tags(&self) -> Vec<u64> {
        self.held.lock().iter().map(BufferHeader::user_data).collect()
    }

    /// Returns up to `count` held buffers through `port`, each with
    /// `length` bytes of content. Returns how many went back.
    pub fn release(&self, port: &Port, count: usize, length: u32) -> usize {
        let mut released = 0;
        while released < count {
            let Some(buffer) = self.held.lock().pop_front() else {
                break;
            };
            buffer.set_length(length);
            port.buffer_header_callback(buffer);
            released += 1;
        }
        released
    }

    fn return_all(&self, port: &Port) {
        let held: Vec<_> = self.held.lock().drain(..).collect();
        for buffer in held {
            port.buffer_header_callback(buffer);
        }
    }
}

impl PortImpl for Holder {
    fn set_format(&self, _port: &Port) -> Result<()> {
        Ok(())
    }

    fn enable(&self, _port: &Port) -> Result<()> {
        Ok(())
    }

    fn disable(&self, port: &Port) -> Result<()> {
        self.disables.fetch_add(1, Ordering::SeqCst);
        self.return_all(port);
        Ok(())
    }

    fn send(&self, _port: &Port, buffer: BufferHeader) -> core::result::Result<(), SendError> {
        self.held.lock().push_back(buffer);
        Ok(())
    }

    fn flush(&self, port: &Port) -> Result<()> {
        self.return_all(port);
        Ok(())
    }
}

/// Keeps every buffer it is sent. Disabling hands them to another thread,
/// which returns them after `delay`.
pub struct Lazy {
    held: Mutex<Vec<BufferHeader>>,
    delay: Duration,
}

impl Lazy {
    pub fn new(delay: Duration) -> Lazy {
        Lazy {
            held: Mutex::new(Vec::new()),
            delay,
        }
    }
}

impl PortImpl for Lazy {
    fn enable(&self, _port: &Port) -> Result<()> {
        Ok(())
    }

    fn disable(&self, port: &Port) -> Result<()> {
        let held = std::mem::take(&mut *self.held.lock());
        let port = port.clone();
        let delay = self.delay;
        thread::spawn(move || {
            thread::sleep(delay);
            for buffer in held {
                port.buffer_header_callback(buffer);
            }
        });
        Ok(())
    }

    fn send(&self, _port: &Port, buffer: BufferHeader) -> core::result::Result<(), SendError> {
        self.held.lock().push(buffer);
        Ok(())
    }
}

/// An input that passes its committed format on to every output of its
/// component and sizes their buffers for one I420 frame of that format.
#[derive(Default)]
pub struct Follower {
    inner: Holder,
}

impl PortImpl for Follower {
    fn set_format(&self, port: &Port) -> Result<()> {
        let format = port.format();
        let frame = format
            .video()
            .map(|video| video.width * video.height * 3 / 2)
            .unwrap_or(0);
        if let Some(component) = port.component() {
            for output in component.outputs() {
                output.set_format(format.clone());
                let mut requirements = output.buffer_requirements();
                requirements.buffer_size_min = frame;
                requirements.buffer_size_recommended = frame;
                output.set_buffer_requirements(requirements);
            }
        }
        Ok(())
    }

    fn enable(&self, port: &Port) -> Result<()> {
        self.inner.enable(port)
    }

    fn disable(&self, port: &Port) -> Result<()> {
        self.inner.disable(port)
    }

    fn send(&self, port: &Port, buffer: BufferHeader) -> core::result::Result<(), SendError> {
        self.inner.send(port, buffer)
    }

    fn flush(&self, port: &Port) -> Result<()> {
        self.inner.flush(port)
    }
}

/// Returns every buffer from inside `send`. Output buffers come back
/// holding their whole payload.
///
/// Not for ports behind a direct connection: the buffer going back to the
/// pool would be sent on to the same port while its send is running.
pub struct Immediate;

impl PortImpl for Immediate {
    fn set_format(&self, _port: &Port) -> Result<()> {
        Ok(())
    }

    fn enable(&self, _port: &Port) -> Result<()> {
        Ok(())
    }

    fn disable(&self, _port: &Port) -> Result<()> {
        Ok(())
    }

    fn send(&self, port: &Port, buffer: BufferHeader) -> core::result::Result<(), SendError> {
        if port.port_type() == PortType::Output {
            buffer.set_length(buffer.alloc_size());
        }
        port.buffer_header_callback(buffer);
        Ok(())
    }
}

/// A component made of [`Holder`] ports, with handles on each of them.
pub struct Node {
    pub component: Component,
    pub inputs: Vec<Arc<Holder>>,
    pub outputs: Vec<Arc<Holder>>,
    pub clocks: Vec<Arc<Holder>>,
}

impl Node {
    pub fn new(name: &str, inputs: usize, outputs: usize) -> Node {
        let inputs: Vec<Arc<Holder>> = (0..inputs).map(|_| Arc::default()).collect();
        let outputs: Vec<Arc<Holder>> = (0..outputs).map(|_| Arc::default()).collect();
        let mut builder = Component::builder(name);
        for holder in &inputs {
            builder = builder.port(PortType::Input, holder.clone());
        }
        for holder in &outputs {
            builder = builder.port(PortType::Output, holder.clone());
        }
        let component = builder.build().unwrap();
        for port in component.inputs().iter().chain(component.outputs()) {
            port.set_buffer_requirements(requirements(3, 64));
        }
        Node {
            component,
            inputs,
            outputs,
            clocks: Vec::new(),
        }
    }

    /// A node with a single clock port and nothing else.
    pub fn clocked(name: &str, num: u32) -> Node {
        let holder = Arc::new(Holder::default());
        let component = Component::builder(name)
            .port(PortType::Clock, holder.clone())
            .build()
            .unwrap();
        component
            .clock(0)
            .unwrap()
            .set_buffer_requirements(requirements(num, 16));
        Node {
            component,
            inputs: Vec::new(),
            outputs: Vec::new(),
            clocks: vec![holder],
        }
    }

    /// A node whose single input is a [`Follower`], with [`Holder`]
    /// outputs.
    pub fn following(name: &str, outputs: usize) -> Node {
        let outputs: Vec<Arc<Holder>> = (0..outputs).map(|_| Arc::default()).collect();
        let mut builder = Component::builder(name).input(Follower::default());
        for holder in &outputs {
            builder = builder.port(PortType::Output, holder.clone());
        }
        let component = builder.build().unwrap();
        for port in component.inputs().iter().chain(component.outputs()) {
            port.set_buffer_requirements(requirements(3, 64));
        }
        Node {
            component,
            inputs: Vec::new(),
            outputs,
            clocks: Vec::new(),
        }
    }

    pub fn input(&self, index: usize) -> Port {
        self.component.input(index).unwrap()
    }

    pub fn output(&self, index: usize) -> Port {
        self.component.output(index).unwrap()
    }

    pub fn clock(&self) -> Port {
        self.component.clock(0).unwrap()
    }
}

/// `num` buffers of `size` bytes, recommended and current, with a minimum
/// of one buffer.
pub fn requirements(num: u32, size: u32) -> BufferRequirements {
    BufferRequirements {
        buffer_num: num,
        buffer_num_min: 1,
        buffer_num_recommended: num,
        buffer_size: size,
        buffer_size_min: 0,
        buffer_size_recommended: size,
        buffer_alignment_min: 0,
    }
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// A callback that stores every buffer it gets, for tests to inspect.
#[derive(Clone, Default)]
pub struct Collector {
    buffers: Arc<Mutex<Vec<BufferHeader>>>,
}

impl Collector {
    pub fn callback(&self) -> mmal::BufferCallback {
        let buffers = self.buffers.clone();
        Arc::new(move |_port: &Port, buffer: BufferHeader| buffers.lock().push(buffer))
    }

    pub fn len(&self) -> usize {
        self.buffers.lock().len()
    }

    pub fn lengths(&self) -> Vec<u32> {
        self.buffers.lock().iter().map(BufferHeader::length).collect()
    }

    pub fn take(&self) -> Vec<BufferHeader> {
        std::mem::take(&mut *self.buffers.lock())
    }
}
