// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration and time sources.
//!
//! This module holds the tunables of the graph scheduler and of components,
//! together with the [`TimeSource`] abstraction used for port statistics and
//! for the worker's per-connection time budget.

use std::{
    sync::{Arc, LazyLock},
    time::Instant,
};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default number of slots for components, connections and each exposed-port list.
pub const GRAPH_SLOTS_MAX: usize = 16;

/// Default time a worker pass may spend draining a single connection, in µs.
pub const PROCESSING_TIME_MAX_US: i64 = 20_000;

/// Default number of event buffers owned by each component.
pub const EVENT_BUFFERS_NUM: usize = 8;

/// Tunables for a [`crate::Graph`].
///
/// # Examples
///
/// ```
/// use mmal::config::GraphConfig;
///
/// let config = GraphConfig::from_json(r#"{ "processing_budget_us": 5000 }"#).unwrap();
/// assert_eq!(config.processing_budget_us, 5000);
/// assert_eq!(config.max_slots, 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Capacity of the component, connection and exposed-port arrays.
    pub max_slots: usize,
    /// Wall-clock budget per connection per worker pass, in µs.
    pub processing_budget_us: i64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_slots: GRAPH_SLOTS_MAX,
            processing_budget_us: PROCESSING_TIME_MAX_US,
        }
    }
}

impl GraphConfig {
    /// Parses a configuration from JSON, filling missing fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArg`] if the JSON is malformed or the values are
    /// out of range (zero slots, negative budget).
    pub fn from_json(json: &str) -> Result<Self> {
        let config: GraphConfig = serde_json::from_str(json).map_err(|error| {
            tracing::error!("Invalid graph configuration: {}", error);
            Error::InvalidArg
        })?;
        if config.max_slots == 0 || config.processing_budget_us < 0 {
            return Err(Error::InvalidArg);
        }
        Ok(config)
    }
}

/// Tunables applied when a component is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentConfig {
    /// Number of event buffers in the component's event pool.
    pub event_buffers: usize,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            event_buffers: EVENT_BUFFERS_NUM,
        }
    }
}

/// A source of monotonic time in microseconds.
pub trait TimeSource: Send + Sync {
    /// Current time in µs. Only differences between values are meaningful.
    fn now_us(&self) -> i64;
}

/// [`TimeSource`] backed by [`Instant`], counting from process start.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

impl TimeSource for MonotonicClock {
    fn now_us(&self) -> i64 {
        i64::try_from(EPOCH.elapsed().as_micros()).unwrap_or(i64::MAX)
    }
}

/// Returns the process-wide default time source.
pub fn default_time_source() -> Arc<dyn TimeSource> {
    Arc::new(MonotonicClock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        assert_eq!(GraphConfig::from_json("{}").unwrap(), GraphConfig::default());
    }

    #[test]
    fn zero_slots_are_rejected() {
        assert_eq!(
            GraphConfig::from_json(r#"{ "max_slots": 0 }"#),
            Err(Error::InvalidArg)
        );
    }

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let clock = MonotonicClock;
        let first = clock.now_us();
        let second = clock.now_us();
        assert!(second >= first);
    }
}
