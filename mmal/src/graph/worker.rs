// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! The processing pass and the thread that runs it.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use tracing::{debug, error, trace};
use uuid::Uuid;

use super::{Graph, GraphInner};
use crate::{
    BufferHeader, Connection, ConnectionFlags, Error, EventCode, Port, PortType, Result,
    sync::Semaphore,
};

#[derive(Default)]
struct Signal {
    wake: Semaphore,
    stop: AtomicBool,
}

/// A running worker thread.
pub(super) struct Worker {
    signal: Arc<Signal>,
    handle: JoinHandle<()>,
}

impl Worker {
    pub(super) fn spawn(graph: Weak<GraphInner>, id: Uuid) -> Result<Worker> {
        let signal = Arc::new(Signal::default());
        let handle = {
            let signal = signal.clone();
            thread::Builder::new()
                .name("mmal graph".to_string())
                .spawn(move || run(graph, signal))
                .map_err(|err| {
                    error!("graph {}: failed to create worker thread ({})", id, err);
                    Error::OutOfSpace
                })?
        };
        debug!("graph {}: worker thread started", id);
        Ok(Worker { signal, handle })
    }

    pub(super) fn wake(&self) {
        self.signal.wake.post();
    }

    /// Stops the thread and waits for it, unless called from the thread
    /// itself.
    pub(super) fn stop(self) {
        self.signal.stop.store(true, Ordering::Release);
        self.signal.wake.post();
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            error!("graph worker thread panicked");
        }
    }
}

fn run(graph: Weak<GraphInner>, signal: Arc<Signal>) {
    loop {
        signal.wake.wait();
        if signal.stop.load(Ordering::Acquire) {
            break;
        }
        let Some(inner) = graph.upgrade() else {
            break;
        };
        let graph = Graph { inner };
        while !signal.stop.load(Ordering::Acquire) && process(&graph) {}
    }
    trace!("graph worker thread exit");
}

/// Connection callback: runs a direct connection's buffer inline, otherwise
/// schedules a pass.
pub(super) fn connection_ready(graph: &Weak<GraphInner>, connection: &Connection) {
    let Some(inner) = graph.upgrade() else {
        return;
    };
    let flags = connection.flags();
    if flags.contains(ConnectionFlags::DIRECT)
        && !flags.contains(ConnectionFlags::TUNNELLING)
        && let Some(buffer) = connection.queue().get()
    {
        process_buffer(&Graph { inner }, connection, buffer);
        return;
    }
    inner.wake();
}

/// One processing pass. Returns whether any buffer moved.
///
/// Empty buffers go from every pool to its output port first. Then, starting
/// one connection further than the previous pass, each queue is drained into
/// its input port until it is empty or its time budget is spent.
pub(super) fn process(graph: &Graph) -> bool {
    let connections = graph.connections();
    let count = connections.len();
    if count == 0 {
        return false;
    }
    let mut run_again = false;

    let start = graph.inner.cursor.load(Ordering::Relaxed);
    for offset in 0..count {
        let connection = &connections[(start + offset) % count];
        if connection.flags().contains(ConnectionFlags::TUNNELLING) {
            continue;
        }
        let Some(pool) = connection.pool() else {
            continue;
        };

        while let Some(buffer) = pool.queue().get() {
            run_again = true;
            if let Err(err) = connection.output().send(buffer) {
                let (err, buffer) = err.into_parts();
                if connection.output().is_enabled() {
                    error!("{}: could not send empty buffer ({})", connection.name(), err);
                }
                pool.queue().put_back(buffer);
                run_again = false;
                break;
            }
        }
    }

    let start = graph.inner.cursor.fetch_add(1, Ordering::Relaxed);
    let budget = graph.inner.config.processing_budget_us;
    let time = &graph.inner.time;
    for offset in 0..count {
        let connection = &connections[(start + offset) % count];
        let flags = connection.flags();
        if flags.contains(ConnectionFlags::TUNNELLING) || flags.contains(ConnectionFlags::DIRECT) {
            continue;
        }

        let began = time.now_us();
        while time.now_us() - began < budget {
            let Some(buffer) = connection.queue().get() else {
                break;
            };
            run_again = true;
            process_buffer(graph, connection, buffer);
        }
    }

    run_again
}

/// Sends a buffer from a connection's queue on to its input port, or handles
/// it as an event.
pub(super) fn process_buffer(graph: &Graph, connection: &Connection, buffer: BufferHeader) {
    let buffer = match graph.hooks() {
        Some(hooks) => match hooks.connection_buffer(graph, connection, buffer) {
            Ok(()) => return,
            Err(err) if err.is_not_supported() => err.buffer,
            Err(err) => {
                debug!("{}: buffer consumed by hook ({})", connection.name(), err.error);
                return;
            }
        },
        None => buffer,
    };

    if buffer.cmd().is_some() {
        process_event(connection, connection.output(), buffer);
        return;
    }

    if let Err(err) = connection.input().send(buffer) {
        error!(
            "{} could not send buffer to {} ({})",
            connection.output().name(),
            connection.input().name(),
            err.error
        );
        let (err, buffer) = err.into_parts();
        drop(buffer);
        report_error(connection.output(), err);
    }
}

/// Format changes coming out of an output port reconfigure the connection.
/// Other events are dropped.
fn process_event(connection: &Connection, port: &Port, event: BufferHeader) {
    trace!("{}: event {:?}", port.name(), event.cmd());
    let result = if event.cmd() == Some(EventCode::FormatChanged)
        && port.port_type() == PortType::Output
    {
        if let Some(change) = event.format_changed_event() {
            debug!(
                "{}: format changed, buffers num (opt {}, min {}), size (opt {}, min {})",
                port.name(),
                change.buffer_num_recommended,
                change.buffer_num_min,
                change.buffer_size_recommended,
                change.buffer_size_min
            );
        }
        connection.event_format_changed(&event)
    } else {
        Ok(())
    };
    drop(event);

    if let Err(err) = result {
        report_error(port, err);
    }
}

fn report_error(port: &Port, err: Error) {
    let Some(component) = port.component() else {
        return;
    };
    if let Err(send_err) = component.send_error_event(err.clone()) {
        error!("{}: could not report {} ({})", component.name(), err, send_err);
    }
}
