// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Connection lifecycle, buffer flow and format changes, with the test
//! acting as the client that moves buffers.

mod common;

use std::{
    sync::{
        Arc, Barrier,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use common::{Holder, Node, setup_logging};
use mmal::{
    Capabilities, Component, Connection, ConnectionFlags, Error, EventCode, EventPayload, Pool,
    Port, PortImpl, Result, format::encoding,
};

/// An output that sets up tunnels with whatever it is connected to.
struct Tunnel;

impl PortImpl for Tunnel {
    fn enable(&self, _port: &Port) -> Result<()> {
        Ok(())
    }

    fn disable(&self, _port: &Port) -> Result<()> {
        Ok(())
    }

    fn connect(&self, _port: &Port, _other: Option<&Port>) -> Result<()> {
        Ok(())
    }
}

/// Hands every free pool buffer to the connection's output.
fn prime(connection: &Connection) {
    let pool = connection.pool().unwrap();
    while let Some(buffer) = pool.queue().get() {
        connection.output().send(buffer).unwrap();
    }
}

#[test]
fn create_copies_the_output_format() {
    setup_logging();
    let source = Node::new("source", 0, 1);
    let sink = Node::new("sink", 1, 0);
    source.output(0).format_mut().encoding = encoding::I420;

    let connection =
        Connection::create(&source.output(0), &sink.input(0), ConnectionFlags::empty()).unwrap();
    assert_eq!(sink.input(0).format().encoding, encoding::I420);
    assert_eq!(
        connection.name(),
        format!("{}/{}", source.output(0).name(), sink.input(0).name())
    );
    assert!(!connection.is_enabled());
}

#[test]
fn kept_port_formats_are_left_alone() {
    setup_logging();
    let source = Node::new("source", 0, 1);
    let sink = Node::new("sink", 1, 0);
    source.output(0).format_mut().encoding = encoding::I420;
    sink.input(0).format_mut().encoding = encoding::RGBA;

    let _connection = Connection::create(
        &source.output(0),
        &sink.input(0),
        ConnectionFlags::KEEP_PORT_FORMATS,
    )
    .unwrap();
    assert_eq!(sink.input(0).format().encoding, encoding::RGBA);
}

#[test]
fn inputs_cannot_feed_outputs() {
    setup_logging();
    let source = Node::new("source", 0, 1);
    let sink = Node::new("sink", 1, 0);
    assert_eq!(
        Connection::create(&sink.input(0), &source.output(0), ConnectionFlags::empty())
            .unwrap_err(),
        Error::InvalidArg
    );
}

/// Full buffers land in the queue, consumed ones go back to the pool, and
/// the callback hears about both. Disabling reclaims everything.
#[test]
fn buffers_travel_through_queue_and_pool() {
    setup_logging();
    let source = Node::new("source", 0, 1);
    let sink = Node::new("sink", 1, 0);
    let connection =
        Connection::create(&source.output(0), &sink.input(0), ConnectionFlags::empty()).unwrap();
    let notified = Arc::new(AtomicUsize::new(0));
    {
        let notified = notified.clone();
        connection.set_callback(move |_| {
            notified.fetch_add(1, Ordering::SeqCst);
        });
    }

    connection.enable().unwrap();
    assert!(connection.is_enabled());
    assert!(source.output(0).is_enabled() && sink.input(0).is_enabled());
    assert_eq!(connection.pool().unwrap().headers_num(), 3);
    assert_eq!(connection.pool().unwrap().payload_size(), 64);

    prime(&connection);
    assert_eq!(source.outputs[0].held(), 3);

    source.outputs[0].release(&source.output(0), 1, 9);
    assert_eq!(connection.queue().len(), 1);
    assert_eq!(notified.load(Ordering::SeqCst), 1);

    let full = connection.queue().get().unwrap();
    assert_eq!(full.length(), 9);
    sink.input(0).send(full).unwrap();
    sink.inputs[0].release(&sink.input(0), 1, 0);
    assert_eq!(connection.pool().unwrap().queue().len(), 1);
    assert_eq!(notified.load(Ordering::SeqCst), 2);

    connection.disable().unwrap();
    assert!(!connection.is_enabled());
    assert!(!source.output(0).is_enabled());
    assert!(connection.queue().is_empty());
    assert!(connection.pool().unwrap().is_full());
    connection.disable().unwrap();
}

/// Ports already at their recommended values come out of an enable and
/// disable cycle unchanged.
#[test]
fn enable_then_disable_keeps_port_requirements() {
    setup_logging();
    let source = Node::new("source", 0, 1);
    let sink = Node::new("sink", 1, 0);
    let connection =
        Connection::create(&source.output(0), &sink.input(0), ConnectionFlags::empty()).unwrap();
    let output_before = source.output(0).buffer_requirements();
    let input_before = sink.input(0).buffer_requirements();

    connection.enable().unwrap();
    connection.disable().unwrap();
    assert_eq!(source.output(0).buffer_requirements(), output_before);
    assert_eq!(sink.input(0).buffer_requirements(), input_before);
}

/// Two threads dropping the last two references race; the ports are
/// disabled exactly once.
#[test]
fn concurrent_releases_tear_down_once() {
    setup_logging();
    let source = Node::new("source", 0, 1);
    let sink = Node::new("sink", 1, 0);
    let connection =
        Connection::create(&source.output(0), &sink.input(0), ConnectionFlags::empty()).unwrap();
    connection.enable().unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let releasers: Vec<_> = [connection.acquire(), connection]
        .into_iter()
        .map(|handle| {
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                handle.release();
            })
        })
        .collect();
    for releaser in releasers {
        releaser.join().unwrap();
    }

    assert!(!source.output(0).is_enabled());
    assert!(!sink.input(0).is_enabled());
    assert_eq!(source.outputs[0].disables(), 1);
    assert_eq!(sink.inputs[0].disables(), 1);
}

/// A clock connection hands its buffers to both ends in turn.
#[test]
fn clock_connection_primes_both_ends() {
    setup_logging();
    let first = Node::clocked("first_clock", 4);
    let second = Node::clocked("second_clock", 4);
    let connection =
        Connection::create(&first.clock(), &second.clock(), ConnectionFlags::empty()).unwrap();

    connection.enable().unwrap();
    assert_eq!(connection.pool().unwrap().headers_num(), 4);
    assert_eq!(first.clocks[0].held(), 2);
    assert_eq!(second.clocks[0].held(), 2);

    connection.disable().unwrap();
    assert!(connection.pool().unwrap().is_full());
}

#[test]
fn single_buffer_clock_connection_primes_the_output_only() {
    setup_logging();
    let first = Node::clocked("first_clock", 1);
    let second = Node::clocked("second_clock", 1);
    let connection =
        Connection::create(&first.clock(), &second.clock(), ConnectionFlags::empty()).unwrap();

    connection.enable().unwrap();
    assert_eq!(first.clocks[0].held(), 1);
    assert_eq!(second.clocks[0].held(), 0);

    connection.disable().unwrap();
    assert!(connection.pool().unwrap().is_full());
}

#[test]
fn passthrough_output_gets_a_pool_without_payloads() {
    setup_logging();
    let source = Node::new("source", 0, 1);
    let sink = Node::new("sink", 1, 0);
    source.output(0).set_capabilities(Capabilities {
        passthrough: true,
        ..Default::default()
    });

    let connection =
        Connection::create(&source.output(0), &sink.input(0), ConnectionFlags::empty()).unwrap();
    connection.enable().unwrap();
    assert_eq!(connection.pool().unwrap().headers_num(), 3);
    assert_eq!(connection.pool().unwrap().payload_size(), 0);
    connection.disable().unwrap();
}

#[test]
fn tunnel_has_no_pool_and_undoes_itself() {
    setup_logging();
    let source = Component::builder("tunnel_source").output(Tunnel).build().unwrap();
    let sink = Component::builder("tunnel_sink")
        .input(Holder::default())
        .build()
        .unwrap();
    let output = source.output(0).unwrap();
    let input = sink.input(0).unwrap();

    let connection = Connection::create(&output, &input, ConnectionFlags::TUNNELLING).unwrap();
    assert!(connection.pool().is_none());
    assert!(output.is_connected());

    connection.enable().unwrap();
    assert!(output.is_enabled() && input.is_enabled());

    drop(connection);
    assert!(!output.is_connected());
    assert!(!output.is_enabled() && !input.is_enabled());
}

/// A format change the input cannot take in-band makes the connection
/// disable, reconfigure both ends and enable again.
#[test]
fn format_change_reconfigures_the_connection() {
    setup_logging();
    let source = Node::new("source", 0, 1);
    let sink = Node::new("sink", 1, 0);
    let output = source.output(0);
    let connection =
        Connection::create(&output, &sink.input(0), ConnectionFlags::empty()).unwrap();
    connection.enable().unwrap();
    prime(&connection);

    let event = output.event_get(EventCode::FormatChanged).unwrap();
    if let Some(EventPayload::FormatChanged(change)) = &mut event.lock().event {
        change.format.encoding = encoding::RGBA;
        change.buffer_num_min = 5;
        change.buffer_num_recommended = 5;
        change.buffer_size_min = 128;
        change.buffer_size_recommended = 128;
    }
    connection.event_format_changed(&event).unwrap();

    assert!(connection.is_enabled());
    assert_eq!(output.format().encoding, encoding::RGBA);
    assert_eq!(sink.input(0).format().encoding, encoding::RGBA);
    assert_eq!(connection.pool().unwrap().headers_num(), 5);
    assert_eq!(connection.pool().unwrap().payload_size(), 128);

    connection.disable().unwrap();
    drop(event);
}

/// An input that takes format changes in-band receives the event itself and
/// the connection stays as it is.
#[test]
fn in_band_format_change_reaches_the_input() {
    setup_logging();
    let source = Node::new("source", 0, 1);
    let sink = Node::new("sink", 1, 0);
    sink.input(0).set_capabilities(Capabilities {
        supports_event_format_change: true,
        ..Default::default()
    });
    let output = source.output(0);
    let connection =
        Connection::create(&output, &sink.input(0), ConnectionFlags::empty()).unwrap();
    connection.enable().unwrap();

    let event = output.event_get(EventCode::FormatChanged).unwrap();
    if let Some(EventPayload::FormatChanged(change)) = &mut event.lock().event {
        change.format.encoding = encoding::H264;
    }
    connection.event_format_changed(&event).unwrap();

    assert_eq!(output.format().encoding, encoding::H264);
    assert_eq!(sink.inputs[0].held(), 1);
    assert_eq!(connection.pool().unwrap().headers_num(), 3);

    connection.disable().unwrap();
    drop(event);
}

#[test]
fn format_change_needs_an_event() {
    setup_logging();
    let source = Node::new("source", 0, 1);
    let sink = Node::new("sink", 1, 0);
    let connection =
        Connection::create(&source.output(0), &sink.input(0), ConnectionFlags::empty()).unwrap();
    let pool = Pool::new(1, 0).unwrap();
    let buffer = pool.queue().get().unwrap();
    assert_eq!(connection.event_format_changed(&buffer), Err(Error::InvalidArg));
}
