// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

use crate::{CoreStatistics, StatsDirection};

/// Receive and transmit statistics of one port, guarded by its stats lock.
#[derive(Debug, Default)]
pub(crate) struct PortStats {
    rx: CoreStatistics,
    tx: CoreStatistics,
}

impl PortStats {
    fn direction_mut(&mut self, direction: StatsDirection) -> &mut CoreStatistics {
        match direction {
            StatsDirection::Rx => &mut self.rx,
            StatsDirection::Tx => &mut self.tx,
        }
    }

    /// Accounts for one buffer seen at `now_us`.
    pub(crate) fn record(&mut self, direction: StatsDirection, now_us: i64) {
        let stats = self.direction_mut(direction);
        if stats.buffer_count == 0 {
            stats.first_buffer_time = now_us;
        } else {
            stats.max_delay = stats.max_delay.max(now_us - stats.last_buffer_time);
        }
        stats.last_buffer_time = now_us;
        stats.buffer_count = stats.buffer_count.wrapping_add(1);
    }

    /// Returns the statistics for `direction`, clearing them if `reset`.
    pub(crate) fn read(&mut self, direction: StatsDirection, reset: bool) -> CoreStatistics {
        let stats = self.direction_mut(direction);
        let snapshot = *stats;
        if reset {
            *stats = CoreStatistics::default();
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_delay_tracks_the_largest_gap() {
        let mut stats = PortStats::default();
        for now in [100, 150, 400, 420] {
            stats.record(StatsDirection::Rx, now);
        }
        let rx = stats.read(StatsDirection::Rx, true);
        assert_eq!(rx.buffer_count, 4);
        assert_eq!(rx.first_buffer_time, 100);
        assert_eq!(rx.last_buffer_time, 420);
        assert_eq!(rx.max_delay, 250);

        assert_eq!(stats.read(StatsDirection::Rx, false), CoreStatistics::default());
        assert_eq!(stats.read(StatsDirection::Tx, false).buffer_count, 0);
    }
}
