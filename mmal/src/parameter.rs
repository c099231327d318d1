// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Port parameters.
//!
//! Parameters are exchanged through [`crate::Port::parameter_get`] and
//! [`crate::Port::parameter_set`]. The implementation sees them first; when it
//! declines with [`crate::Error::NotSupported`] the core handles the ones it
//! knows about (currently the per-port statistics).

use serde::{Deserialize, Serialize};

/// Identifiers of the parameters the runtime knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterId {
    CoreStatistics,
    ZeroCopy,
    BufferRequirements,
    Other(u32),
}

/// Direction of the buffer traffic a statistics record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StatsDirection {
    /// Buffers handed to the port with `send`.
    #[default]
    Rx,
    /// Buffers returned by the port through its callback.
    Tx,
}

/// Traffic statistics for one direction of a port.
///
/// Times are in µs from the runtime's time source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CoreStatistics {
    pub buffer_count: u32,
    pub first_buffer_time: i64,
    pub last_buffer_time: i64,
    pub max_delay: i64,
}

/// Buffer count and size negotiation values of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferRequirements {
    pub buffer_num: u32,
    pub buffer_num_min: u32,
    pub buffer_num_recommended: u32,
    pub buffer_size: u32,
    pub buffer_size_min: u32,
    pub buffer_size_recommended: u32,
    pub buffer_alignment_min: u32,
}

impl BufferRequirements {
    /// Raises the current values up to the minimums.
    pub fn clamp_to_minimums(&mut self) {
        self.buffer_num = self.buffer_num.max(self.buffer_num_min);
        self.buffer_size = self.buffer_size.max(self.buffer_size_min);
    }

    /// Whether the current values satisfy the minimums.
    pub fn satisfied(&self) -> bool {
        self.buffer_num >= self.buffer_num_min && self.buffer_size >= self.buffer_size_min
    }
}

/// A parameter request or value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameter {
    /// Per-port statistics. `stats` is filled in on get; `reset` clears them
    /// after reading.
    CoreStatistics {
        direction: StatsDirection,
        reset: bool,
        stats: CoreStatistics,
    },
    /// Whether buffers on the port use shared (zero-copy) memory.
    ZeroCopy(bool),
    /// Minimum and recommended buffer count, size and alignment.
    BufferRequirements(BufferRequirements),
    /// Implementation-defined parameter.
    Other { id: u32, data: Vec<u8> },
}

impl Parameter {
    /// Creates a statistics request.
    pub fn core_statistics(direction: StatsDirection, reset: bool) -> Self {
        Parameter::CoreStatistics {
            direction,
            reset,
            stats: CoreStatistics::default(),
        }
    }

    pub fn id(&self) -> ParameterId {
        match self {
            Parameter::CoreStatistics { .. } => ParameterId::CoreStatistics,
            Parameter::ZeroCopy(_) => ParameterId::ZeroCopy,
            Parameter::BufferRequirements(_) => ParameterId::BufferRequirements,
            Parameter::Other { id, .. } => ParameterId::Other(*id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_raises_only_values_below_minimum() {
        let mut requirements = BufferRequirements {
            buffer_num: 1,
            buffer_num_min: 3,
            buffer_size: 4096,
            buffer_size_min: 1024,
            ..Default::default()
        };
        assert!(!requirements.satisfied());
        requirements.clamp_to_minimums();
        assert_eq!(requirements.buffer_num, 3);
        assert_eq!(requirements.buffer_size, 4096);
        assert!(requirements.satisfied());
    }
}
