// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Events carried by buffer headers.
//!
//! A buffer header whose `cmd` is set is an event rather than media data.
//! Events are taken from the owning component's event pool with
//! [`crate::Port::event_get`] and delivered with [`crate::Port::event_send`].

use crate::{Error, EsFormat, FourCc};

/// Event command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCode {
    /// The stream format on a port changed; payload is a [`FormatChangedEvent`].
    FormatChanged,
    /// The component hit an asynchronous error; payload is an [`Error`].
    Error,
    /// End of stream reached.
    Eos,
    /// A parameter changed on the component.
    ParameterChanged,
    /// Implementation-defined event.
    Other(FourCc),
}

impl EventCode {
    /// The four-character code used in logs.
    pub fn fourcc(&self) -> FourCc {
        match self {
            EventCode::FormatChanged => FourCc::new(b"EFCH"),
            EventCode::Error => FourCc::new(b"ERRO"),
            EventCode::Eos => FourCc::new(b"EEOS"),
            EventCode::ParameterChanged => FourCc::new(b"EPCH"),
            EventCode::Other(code) => *code,
        }
    }
}

/// Payload of a [`EventCode::FormatChanged`] event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormatChangedEvent {
    /// Replacement format for the port.
    pub format: EsFormat,
    pub buffer_num_min: u32,
    pub buffer_size_min: u32,
    pub buffer_num_recommended: u32,
    pub buffer_size_recommended: u32,
}

/// Typed payload of an event buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    FormatChanged(FormatChangedEvent),
    Error(Error),
}
