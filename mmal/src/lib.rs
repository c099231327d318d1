// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! # MMAL - Multi-Media Abstraction Layer runtime
//!
//! A component-based media pipeline runtime. Components expose typed ports,
//! ports are linked by connections that move reference-counted buffer headers,
//! and graphs schedule many connections on a worker thread.
//!
//! ## Overview
//!
//! The runtime core does not decode, encode or render anything itself. It owns
//! the plumbing every component relies on: port state, buffer accounting,
//! format negotiation and the threading that moves buffers between components.
//! Component authors plug their behaviour in through [`PortImpl`] and
//! [`ComponentImpl`].
//!
//! ### Key Concepts
//!
//! - **Component**: a named processing element with control, input, output and
//!   clock ports ([`Component`])
//! - **Port**: an endpoint with a format, buffer requirements and an
//!   enable/pause/connect state machine ([`Port`])
//! - **Buffer header**: a reference-counted descriptor of one unit of media
//!   data or one event ([`BufferHeader`]), recycled through a [`Pool`]
//! - **Connection**: a client-side link from an output port to an input port
//!   with its own pool and queue ([`Connection`])
//! - **Graph**: a set of components and connections processed by a worker
//!   thread, which can itself be wrapped as a component ([`Graph`])
//! - **Wrapper**: a pull-style facade for synchronous clients ([`Wrapper`])
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐  out   ┌────────────┐   in   ┌───────────┐
//! │ Component ├───────►│ Connection ├───────►│ Component │
//! └───────────┘        │ pool+queue │        └───────────┘
//!                      └─────┬──────┘
//!                            │ callback
//!                      ┌─────▼──────┐
//!                      │   Graph    │  worker thread: pool -> output,
//!                      │  (worker)  │                 queue -> input
//!                      └─────┬──────┘
//!                            │ Graph::build
//!                      ┌─────▼──────┐
//!                      │ Component  │  facade exposing chosen inner ports
//!                      └────────────┘
//! ```
//!
//! ## Examples
//!
//! ### Connecting two components by hand
//!
//! ```no_run
//! use mmal::{Component, Connection, ConnectionFlags};
//!
//! # fn main() -> Result<(), mmal::Error> {
//! let decoder = Component::create("decoder")?;
//! let renderer = Component::create("renderer")?;
//!
//! let connection = Connection::create(
//!     &decoder.output(0).ok_or(mmal::Error::InvalidArg)?,
//!     &renderer.input(0).ok_or(mmal::Error::InvalidArg)?,
//!     ConnectionFlags::empty(),
//! )?;
//! connection.set_callback(|connection| {
//!     tracing::debug!("{} has buffers to move", connection.name());
//! });
//! connection.enable()?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Letting a graph move the buffers
//!
//! ```no_run
//! use mmal::{Component, ConnectionFlags, Graph};
//!
//! # fn main() -> Result<(), mmal::Error> {
//! let graph = Graph::new();
//! let source = Component::create("source")?;
//! let sink = Component::create("sink")?;
//!
//! graph.add_component(&source)?;
//! graph.add_component(&sink)?;
//! graph.new_connection(
//!     &source.output(0).ok_or(mmal::Error::InvalidArg)?,
//!     &sink.input(0).ok_or(mmal::Error::InvalidArg)?,
//!     ConnectionFlags::empty(),
//! )?;
//! graph.enable(None)?;
//! // ... buffers flow on the worker thread ...
//! graph.disable()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! - [`Component`], [`Port`], [`Connection`], [`Graph`] and [`Wrapper`] are
//!   cheap cloneable handles and are `Send + Sync`
//! - Port callbacks run on whichever thread returns the buffer, often a
//!   component's own thread; they must not block on that component
//! - A port's send lock is held while its implementation's `send` and `flush`
//!   hooks run, so those hooks must not call back into `send` on the same port

mod component;
mod connection;
mod error;
mod event;
mod graph;
mod parameter;
mod port;
mod sync;
mod wrapper;

pub mod buffer;
pub mod config;
pub mod format;

pub use buffer::{
    header::{BufferFields, BufferHeader},
    payload::Payload,
    pool::{Pool, PoolCallback},
    queue::Queue,
};
pub use component::{
    ActionFn, Component, ComponentBuilder, ComponentImpl, ControlPort,
    registry::{Constructor, register, unregister},
};
pub use connection::{Connection, ConnectionCallback, ConnectionFlags, ConnectionTimings};
pub use error::{Error, Result, SendError};
pub use event::{EventCode, EventPayload, FormatChangedEvent};
pub use format::{EsFormat, EsType, FourCc};
pub use graph::{Graph, GraphEventCallback, GraphHooks, Topology};
pub use parameter::{
    BufferRequirements, CoreStatistics, Parameter, ParameterId, StatsDirection,
};
pub use port::{
    BufferCallback, Capabilities, Port, PortImpl, PortType,
    state::{Activity, Connectivity, Flow, PortState},
};
pub use wrapper::{Wrapper, WrapperCallback, WrapperFlags};
