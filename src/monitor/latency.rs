//! Rolling latency aggregates.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// avg/p95 over the retained window; max and count over the lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub avg_us: f64,
    pub p95_us: f64,
    pub max_us: f64,
}

/// Bounded ring of the most recent samples.
#[derive(Debug, Clone)]
pub struct LatencyStats {
    window: VecDeque<Duration>,
    capacity: usize,
    count: u64,
    max: Duration,
}

impl LatencyStats {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            count: 0,
            max: Duration::ZERO,
        }
    }

    pub fn record(&mut self, sample: Duration) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(sample);
        self.count += 1;
        self.max = self.max.max(sample);
    }

    pub fn summary(&self) -> LatencySummary {
        if self.window.is_empty() {
            return LatencySummary::default();
        }
        let mut micros: Vec<f64> = self
            .window
            .iter()
            .map(|d| d.as_secs_f64() * 1e6)
            .collect();
        micros.sort_by(f64::total_cmp);

        let avg_us = micros.iter().sum::<f64>() / micros.len() as f64;
        // Nearest-rank percentile
        let rank = ((0.95 * micros.len() as f64).ceil() as usize).clamp(1, micros.len());
        LatencySummary {
            count: self.count,
            avg_us,
            p95_us: micros[rank - 1],
            max_us: self.max.as_secs_f64() * 1e6,
        }
    }
}
