// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Graph scheduling and the graph-as-component facade.
//!
//! Buffers move on the graph's worker thread (or the facade's action
//! thread), so these tests wait for the expected state with
//! [`common::wait_until`] instead of asserting right away.

mod common;

use std::sync::Arc;

use common::{Collector, Node, setup_logging, wait_until};
use mmal::{
    BufferHeader, Connection, ConnectionFlags, EsFormat, Error, EventCode, Graph,
    GraphEventCallback, GraphHooks, Pool, Port, PortType, Result, SendError, format::encoding,
};
use parking_lot::Mutex;

/// A source and a sink joined by one connection in a fresh graph.
fn chain(flags: ConnectionFlags) -> (Graph, Node, Node, Connection) {
    let graph = Graph::new();
    let source = Node::new("source", 0, 1);
    let sink = Node::new("sink", 1, 0);
    graph.add_component(&source.component).unwrap();
    graph.add_component(&sink.component).unwrap();
    let connection = graph
        .new_connection(&source.output(0), &sink.input(0), flags)
        .unwrap();
    (graph, source, sink, connection)
}

/// The worker primes the output, forwards full buffers to the input and
/// recycles consumed ones back to the output.
#[test]
fn worker_moves_buffers_both_ways() {
    setup_logging();
    let (graph, source, sink, connection) = chain(ConnectionFlags::empty());
    graph.enable(None).unwrap();
    assert!(graph.is_enabled());
    wait_until("output primed", || source.outputs[0].held() == 3);

    source.outputs[0].release(&source.output(0), 2, 10);
    wait_until("buffers at the sink", || sink.inputs[0].held() == 2);

    sink.inputs[0].release(&sink.input(0), 2, 0);
    wait_until("output primed again", || source.outputs[0].held() == 3);

    graph.disable().unwrap();
    assert!(!graph.is_enabled());
    assert!(!connection.is_enabled());
    assert!(connection.pool().unwrap().is_full());
}

/// Buffers reach the input in the order the output returned them.
#[test]
fn worker_keeps_buffer_order() {
    setup_logging();
    let (graph, source, sink, _connection) = chain(ConnectionFlags::empty());
    for port in [source.output(0), sink.input(0)] {
        port.set_buffer_requirements(common::requirements(8, 64));
    }
    graph.enable(None).unwrap();
    wait_until("output primed", || source.outputs[0].held() == 8);

    source.outputs[0].tag(1);
    source.outputs[0].release(&source.output(0), 8, 10);
    wait_until("buffers at the sink", || sink.inputs[0].held() == 8);
    assert_eq!(sink.inputs[0].tags(), (1..=8).collect::<Vec<u64>>());

    graph.disable().unwrap();
}

/// A direct connection hands the buffer to the input from the thread that
/// returned it.
#[test]
fn direct_connection_delivers_inline() {
    setup_logging();
    let (graph, source, sink, _connection) = chain(ConnectionFlags::DIRECT);
    graph.enable(None).unwrap();
    wait_until("output primed", || source.outputs[0].held() == 3);

    source.outputs[0].release(&source.output(0), 1, 5);
    assert_eq!(sink.inputs[0].held(), 1);

    graph.disable().unwrap();
}

#[test]
fn enabling_twice_is_refused() {
    setup_logging();
    let (graph, _source, _sink, _connection) = chain(ConnectionFlags::empty());
    graph.enable(None).unwrap();
    assert_eq!(graph.enable(None), Err(Error::InvalidArg));
    graph.disable().unwrap();
}

/// Events from member control ports reach the graph's event callback.
#[test]
fn member_events_reach_the_callback() {
    setup_logging();
    let (graph, _source, sink, _connection) = chain(ConnectionFlags::empty());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let callback: GraphEventCallback = {
        let seen = seen.clone();
        Arc::new(move |_graph: &Graph, port: &Port, event: BufferHeader| {
            seen.lock().push((port.component_name().to_string(), event.error_event()));
        })
    };
    graph.enable(Some(callback)).unwrap();

    sink.component.send_error_event(Error::Corrupt).unwrap();
    assert_eq!(
        seen.lock().as_slice(),
        &[("sink".to_string(), Some(Error::Corrupt))]
    );

    graph.disable().unwrap();
}

/// Takes every buffer coming off a connection.
#[derive(Clone, Default)]
struct Tap {
    taken: Arc<Mutex<Vec<BufferHeader>>>,
}

impl GraphHooks for Tap {
    fn connection_buffer(
        &self,
        _graph: &Graph,
        _connection: &Connection,
        buffer: BufferHeader,
    ) -> core::result::Result<(), SendError> {
        self.taken.lock().push(buffer);
        Ok(())
    }
}

#[test]
fn hook_can_take_connection_buffers() {
    setup_logging();
    let (graph, source, sink, _connection) = chain(ConnectionFlags::DIRECT);
    let tap = Tap::default();
    graph.set_hooks(tap.clone());
    graph.enable(None).unwrap();
    wait_until("output primed", || source.outputs[0].held() == 3);

    source.outputs[0].release(&source.output(0), 1, 7);
    assert_eq!(tap.taken.lock().len(), 1);
    assert_eq!(sink.inputs[0].held(), 0);

    tap.taken.lock().clear();
    graph.disable().unwrap();
}

/// A filter followed by a sink, wrapped as one component exposing the
/// filter's input and output.
struct Wrapped {
    graph: Graph,
    filter: Node,
    sink: Node,
    facade: mmal::Component,
}

fn wrapped() -> Wrapped {
    let graph = Graph::new();
    let filter = Node::new("filter", 1, 2);
    let sink = Node::new("sink", 1, 0);
    graph.add_component(&filter.component).unwrap();
    graph.add_component(&sink.component).unwrap();
    graph
        .new_connection(&filter.output(0), &sink.input(0), ConnectionFlags::empty())
        .unwrap();
    graph.add_port(&filter.input(0)).unwrap();
    graph.add_port(&filter.output(1)).unwrap();
    let facade = graph.build("wrapped").unwrap();
    Wrapped {
        graph,
        filter,
        sink,
        facade,
    }
}

#[test]
fn facade_mirrors_exposed_ports() {
    setup_logging();
    let wrapped = wrapped();
    let facade = &wrapped.facade;
    assert_eq!(facade.name(), "wrapped");
    assert_eq!(facade.inputs().len(), 1);
    assert_eq!(facade.outputs().len(), 1);
    assert_eq!(
        facade.input(0).unwrap().buffer_requirements(),
        wrapped.filter.input(0).buffer_requirements()
    );
    assert_eq!(wrapped.graph.build("again").unwrap_err(), Error::InvalidArg);
}

/// Enabling the facade input enables the chain behind it; buffers sent to
/// the facade reach the inner port and come back out of the facade.
#[test]
fn facade_port_drives_the_chain() {
    setup_logging();
    let wrapped = wrapped();
    let facade_input = wrapped.facade.input(0).unwrap();
    let filter_input = wrapped.filter.input(0);
    let returned = Collector::default();

    facade_input.enable(Some(returned.callback())).unwrap();
    assert!(filter_input.is_enabled());
    assert!(wrapped.filter.output(0).is_enabled());
    assert!(wrapped.sink.input(0).is_enabled());
    assert!(!wrapped.filter.output(1).is_enabled());
    wait_until("filter output primed", || wrapped.filter.outputs[0].held() == 3);

    let pool = Pool::new(1, 64).unwrap();
    facade_input.send(pool.queue().get().unwrap()).unwrap();
    assert_eq!(wrapped.filter.inputs[0].held(), 1);
    wrapped.filter.inputs[0].release(&filter_input, 1, 0);
    assert_eq!(returned.len(), 1);
    drop(returned.take());

    wrapped.filter.outputs[0].release(&wrapped.filter.output(0), 1, 11);
    wait_until("buffer at the sink", || wrapped.sink.inputs[0].held() == 1);

    facade_input.disable().unwrap();
    assert!(!filter_input.is_enabled());
    assert!(!wrapped.filter.output(0).is_enabled());
    assert!(!wrapped.sink.input(0).is_enabled());
}

#[test]
fn member_events_leave_through_the_facade_control_port() {
    setup_logging();
    let wrapped = wrapped();
    let events = Collector::default();
    wrapped
        .facade
        .control()
        .enable(Some(events.callback()))
        .unwrap();

    wrapped.sink.component.send_error_event(Error::Io).unwrap();
    let received = events.take();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].cmd(), Some(EventCode::Error));
    assert_eq!(received[0].error_event(), Some(Error::Io));
}

#[test]
fn facade_finds_ports_by_component_name() {
    setup_logging();
    let wrapped = wrapped();
    let port = wrapped.graph.find_port("FILTER", PortType::Output, 1).unwrap();
    assert!(port.ptr_eq(&wrapped.filter.output(1)));
    assert!(wrapped.graph.find_port("filter", PortType::Output, 2).is_none());
}

/// Committing a format on the facade input carries it through the filter to
/// the still-disabled sink, and reads the new requirements back out.
#[test]
fn facade_format_commit_reaches_downstream() {
    setup_logging();
    let graph = Graph::new();
    let filter = Node::following("scaler", 2);
    let sink = Node::new("sink", 1, 0);
    graph.add_component(&filter.component).unwrap();
    graph.add_component(&sink.component).unwrap();
    graph
        .new_connection(&filter.output(0), &sink.input(0), ConnectionFlags::KEEP_PORT_FORMATS)
        .unwrap();
    graph.add_port(&filter.input(0)).unwrap();
    graph.add_port(&filter.output(1)).unwrap();
    let facade = graph.build("scaler_graph").unwrap();

    let facade_input = facade.input(0).unwrap();
    facade_input.set_format(EsFormat::new_video(encoding::I420, 64, 48));
    facade_input.format_commit().unwrap();

    assert_eq!(filter.output(0).format().encoding, encoding::I420);
    assert_eq!(sink.input(0).format().encoding, encoding::I420);
    assert_eq!(sink.input(0).format().video().unwrap().width, 64);

    let facade_output = facade.output(0).unwrap();
    assert_eq!(facade_output.format().encoding, encoding::I420);
    assert_eq!(facade_output.buffer_requirements().buffer_size_min, 64 * 48 * 3 / 2);
}

/// Connecting a facade port links the inner port it shadows.
#[test]
fn facade_connect_links_the_inner_port() {
    setup_logging();
    let wrapped = wrapped();
    let outside = Node::new("outside", 1, 0);
    let facade_output = wrapped.facade.output(0).unwrap();
    let shadowed = wrapped.filter.output(1);

    facade_output.connect(&outside.input(0)).unwrap();
    assert!(shadowed.is_connected());
    assert!(outside.input(0).connected_port().unwrap().ptr_eq(&shadowed));
    assert!(!facade_output.is_connected());

    facade_output.disconnect().unwrap();
    assert!(!shadowed.is_connected());
    assert!(!outside.input(0).is_connected());
}

/// Refuses every link made through the facade.
struct NoLinks;

impl GraphHooks for NoLinks {
    fn connect(&self, _graph: &Graph, _port: &Port, _other: Option<&Port>) -> Result<()> {
        Err(Error::InvalidArg)
    }
}

#[test]
fn hook_can_refuse_facade_connect() {
    setup_logging();
    let wrapped = wrapped();
    wrapped.graph.set_hooks(NoLinks);
    let outside = Node::new("outside", 1, 0);

    assert_eq!(
        wrapped.facade.output(0).unwrap().connect(&outside.input(0)),
        Err(Error::InvalidArg)
    );
    assert!(!wrapped.filter.output(1).is_connected());
    assert!(!outside.input(0).is_connected());
}
