// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Moves generated frames from a source component to a byte counter through
//! a graph, then prints what went through.
//!
//! Both components do their work on their own action thread: ports only
//! queue what they are sent and trigger the action.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use clap::Parser;
use mmal::{
    BufferHeader, BufferRequirements, Component, ConnectionFlags, Error, Graph, Port, PortImpl,
    Queue, SendError, StatsDirection,
    config::{GraphConfig, default_time_source},
};
use parking_lot::{Condvar, Mutex};
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Runs a source -> byte counter graph")]
struct Opts {
    /// Number of frames to produce.
    #[arg(long, default_value_t = 100)]
    frames: u64,

    /// Payload size of each frame, in bytes.
    #[arg(long, default_value_t = 4096)]
    frame_size: u32,

    /// Buffers in the connection pool.
    #[arg(long, default_value_t = 4)]
    buffers: u32,

    /// Hand frames to the counter from the source's thread instead of the
    /// graph worker.
    #[arg(long)]
    direct: bool,

    /// Graph configuration file (JSON).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Default)]
struct SourceState {
    empty: Queue,
    produced: AtomicU64,
    limit: u64,
}

/// Output port of the source: empty buffers wait for the action thread.
struct SourceOutput(Arc<SourceState>);

impl PortImpl for SourceOutput {
    fn enable(&self, _port: &Port) -> mmal::Result<()> {
        Ok(())
    }

    fn disable(&self, port: &Port) -> mmal::Result<()> {
        for buffer in self.0.empty.drain() {
            port.buffer_header_callback(buffer);
        }
        Ok(())
    }

    fn send(&self, port: &Port, buffer: BufferHeader) -> Result<(), SendError> {
        self.0.empty.put(buffer);
        if let Some(component) = port.component()
            && let Err(err) = component.action_trigger()
        {
            warn!("{}: could not wake the source ({})", port.name(), err);
        }
        Ok(())
    }
}

fn fill_frames(state: &SourceState, port: &Port) {
    while let Some(buffer) = state.empty.get() {
        let index = state.produced.load(Ordering::Acquire);
        if index >= state.limit {
            state.empty.put_back(buffer);
            return;
        }
        {
            let mut fields = buffer.lock();
            if let Some(data) = fields.data.as_mut() {
                data.as_mut_slice().fill(index as u8);
            }
            fields.length = fields.alloc_size;
            fields.pts = Some(index as i64 * 40_000);
        }
        state.produced.fetch_add(1, Ordering::AcqRel);
        port.buffer_header_callback(buffer);
    }
}

fn build_source(name: &str, state: Arc<SourceState>, size: u32, buffers: u32) -> mmal::Result<Component> {
    let component = Component::builder(name)
        .output(SourceOutput(state.clone()))
        .build()?;
    if let Some(output) = component.output(0) {
        output.set_buffer_requirements(BufferRequirements {
            buffer_num: buffers,
            buffer_num_min: 1,
            buffer_num_recommended: buffers,
            buffer_size: size,
            buffer_size_min: size,
            buffer_size_recommended: size,
            buffer_alignment_min: 0,
        });
    }
    component.action_register(move |component| {
        if let Some(output) = component.output(0) {
            fill_frames(&state, &output);
        }
    })?;
    Ok(component)
}

#[derive(Default)]
struct CounterState {
    full: Queue,
    bytes: AtomicU64,
    frames: Mutex<u64>,
    counted: Condvar,
}

impl CounterState {
    /// Waits until `frames` frames were counted or `timeout` passed.
    fn wait_for(&self, frames: u64, timeout: Duration) -> u64 {
        let mut counted = self.frames.lock();
        while *counted < frames {
            if self.counted.wait_for(&mut counted, timeout).timed_out() {
                break;
            }
        }
        *counted
    }
}

/// Input port of the counter: full buffers wait for the action thread.
struct CounterInput(Arc<CounterState>);

impl PortImpl for CounterInput {
    fn set_format(&self, _port: &Port) -> mmal::Result<()> {
        Ok(())
    }

    fn enable(&self, _port: &Port) -> mmal::Result<()> {
        Ok(())
    }

    fn disable(&self, port: &Port) -> mmal::Result<()> {
        for buffer in self.0.full.drain() {
            port.buffer_header_callback(buffer);
        }
        Ok(())
    }

    fn send(&self, port: &Port, buffer: BufferHeader) -> Result<(), SendError> {
        self.0.full.put(buffer);
        if let Some(component) = port.component()
            && let Err(err) = component.action_trigger()
        {
            warn!("{}: could not wake the counter ({})", port.name(), err);
        }
        Ok(())
    }
}

fn build_counter(name: &str, state: Arc<CounterState>) -> mmal::Result<Component> {
    let component = Component::builder(name)
        .input(CounterInput(state.clone()))
        .build()?;
    component.action_register(move |component| {
        let Some(input) = component.input(0) else {
            return;
        };
        while let Some(buffer) = state.full.get() {
            state.bytes.fetch_add(buffer.length() as u64, Ordering::AcqRel);
            *state.frames.lock() += 1;
            state.counted.notify_all();
            input.buffer_header_callback(buffer);
        }
    })?;
    Ok(component)
}

fn load_config(path: Option<&PathBuf>) -> mmal::Result<GraphConfig> {
    let Some(path) = path else {
        return Ok(GraphConfig::default());
    };
    let json = std::fs::read_to_string(path).map_err(|err| {
        Error::Other(format!(
            "Error while reading graph configuration from \"{}\": {}",
            path.display(),
            err
        ))
    })?;
    GraphConfig::from_json(&json)
}

fn run(opts: Opts) -> mmal::Result<()> {
    let source_state = Arc::new(SourceState {
        limit: opts.frames,
        ..Default::default()
    });
    let counter_state = Arc::new(CounterState::default());
    {
        let state = source_state.clone();
        let (size, buffers) = (opts.frame_size, opts.buffers);
        mmal::register("demo_source", move |name| {
            build_source(name, state.clone(), size, buffers)
        });
        let state = counter_state.clone();
        mmal::register("byte_counter", move |name| build_counter(name, state.clone()));
    }

    let graph = Graph::with_config(load_config(opts.config.as_ref())?, default_time_source());
    let source = graph.new_component("demo_source")?;
    let counter = graph.new_component("byte_counter")?;
    let output = source.output(0).ok_or(Error::InvalidArg)?;
    let input = counter.input(0).ok_or(Error::InvalidArg)?;
    let flags = if opts.direct {
        ConnectionFlags::DIRECT
    } else {
        ConnectionFlags::empty()
    };
    let connection = graph.new_connection(&output, &input, flags)?;

    graph.enable(Some(Arc::new(|_graph: &Graph, port: &Port, event: BufferHeader| {
        warn!("{}: event {:?} ({:?})", port.name(), event.cmd(), event.error_event());
    })))?;
    let counted = counter_state.wait_for(opts.frames, Duration::from_secs(30));
    graph.disable()?;

    let summary = serde_json::json!({
        "frames": counted,
        "bytes": counter_state.bytes.load(Ordering::Acquire),
        "connection": connection.timings(),
        "counter_input": input.statistics(StatsDirection::Rx, false),
    });
    info!(
        "{}",
        serde_json::to_string_pretty(&summary).map_err(|err| Error::Other(err.to_string()))?
    );

    if counted < opts.frames {
        return Err(Error::Other(format!(
            "only {} of {} frames arrived",
            counted, opts.frames
        )));
    }
    Ok(())
}

/// Logs go to stderr so the summary on stdout stays parseable.
fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    setup_logging();
    if let Err(err) = run(Opts::parse()) {
        error!("{}", err);
        std::process::exit(err.code() as i32);
    }
}
