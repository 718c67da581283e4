//! Frame rate diagnostics.

use std::collections::VecDeque;

const WINDOW_SECS: f64 = 1.0;
const SMOOTHING: f64 = 0.2;

/// Rolling one-second tick counter with an exponentially smoothed rate.
///
/// Samples are seconds on a monotonic clock. Non-finite samples and samples
/// earlier than the previous one are dropped.
#[derive(Debug, Default, Clone)]
pub struct FpsCounter {
    ticks: VecDeque<f64>,
    smoothed: Option<f64>,
    rejected: u64,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one tick at `now_secs`. Returns false if the sample was ignored.
    pub fn record(&mut self, now_secs: f64) -> bool {
        let in_order = self.ticks.back().map_or(true, |last| now_secs >= *last);
        let valid = now_secs.is_finite() && in_order;
        if !valid {
            self.rejected += 1;
            return false;
        }

        self.ticks.push_back(now_secs);
        while let Some(first) = self.ticks.front() {
            if now_secs - first > WINDOW_SECS {
                self.ticks.pop_front();
            } else {
                break;
            }
        }

        let raw = self.raw_fps();
        self.smoothed = Some(match self.smoothed {
            Some(prev) => prev + SMOOTHING * (raw - prev),
            None => raw,
        });
        true
    }

    /// Ticks within the last second.
    pub fn raw_fps(&self) -> f64 {
        self.ticks.len() as f64
    }

    pub fn fps(&self) -> f64 {
        self.smoothed.unwrap_or(0.0)
    }

    pub fn rejected_samples(&self) -> u64 {
        self.rejected
    }

    pub fn reset(&mut self) {
        self.ticks.clear();
        self.smoothed = None;
    }
}
