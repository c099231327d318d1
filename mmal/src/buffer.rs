// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Buffer headers, queues and pools.
//!
//! This module provides the units that flow through ports and connections:
//!
//! - [`BufferHeader`](header::BufferHeader): a reference-counted descriptor for one unit of media
//!   data (or one event). Dropping the last reference hands it back to the
//!   pool it came from.
//! - [`Queue`](queue::Queue): a FIFO of buffer headers with optional blocking.
//! - [`Pool`](pool::Pool): a fixed set of headers plus the free queue they return to,
//!   with an optional release callback that may intercept returning headers.

pub mod header;
pub mod payload;
pub mod pool;
pub mod queue;

/// Buffer flag bits stored in [`header::BufferFields::flags`].
pub mod flags {
    /// End of stream.
    pub const EOS: u32 = 1 << 0;
    pub const FRAME_START: u32 = 1 << 1;
    pub const FRAME_END: u32 = 1 << 2;
    /// Complete frame in a single buffer.
    pub const FRAME: u32 = FRAME_START | FRAME_END;
    pub const KEYFRAME: u32 = 1 << 3;
    /// Data does not follow on from the previous buffer.
    pub const DISCONTINUITY: u32 = 1 << 4;
    /// Codec configuration data.
    pub const CONFIG: u32 = 1 << 5;
}
