// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;
use std::time::{Duration, Instant};

/// Default time pending data may sit unchanged before it is forcibly emitted.
pub const DEFAULT_FORCE_FLUSH_PERIOD_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FlusherConfig {
    /// Period after which an unterminated trailing record is emitted anyway.
    /// Zero disables forced flushing.
    #[serde(default = "default_force_flush_period_ms")]
    pub force_flush_period_ms: u64,
}

fn default_force_flush_period_ms() -> u64 {
    DEFAULT_FORCE_FLUSH_PERIOD_MS
}

impl Default for FlusherConfig {
    fn default() -> Self {
        Self {
            force_flush_period_ms: DEFAULT_FORCE_FLUSH_PERIOD_MS,
        }
    }
}

impl FlusherConfig {
    pub fn build(&self) -> Flusher {
        Flusher::new(Duration::from_millis(self.force_flush_period_ms))
    }
}

/// Tracks how long pending, unsplit data has been sitting unchanged.
#[derive(Debug, Clone)]
pub struct Flusher {
    force_period: Duration,
    /// Last time the pending data length changed (including flushes)
    last_data_change: Instant,
    /// Length of pending data at the last change; zero after a flush
    previous_data_length: usize,
}

impl Flusher {
    pub fn new(force_period: Duration) -> Self {
        Self {
            force_period,
            last_data_change: Instant::now(),
            previous_data_length: 0,
        }
    }

    /// Record the current pending data length. The timer only restarts when
    /// the length changes.
    pub fn update_data_change_time(&mut self, length: usize) {
        if length > 0 && length == self.previous_data_length {
            return;
        }
        self.previous_data_length = length;
        self.last_data_change = Instant::now();
    }

    pub fn flushed(&mut self) {
        self.update_data_change_time(0);
    }

    pub fn should_flush(&self) -> bool {
        !self.force_period.is_zero()
            && self.previous_data_length > 0
            && self.last_data_change.elapsed() > self.force_period
    }
}
