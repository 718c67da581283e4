//! Clock and pacing utilities.
//!
//! The compositor feeds shader time from a [`Stopwatch`] started when it is
//! created; render loops pace their ticks with a [`RateController`].

use std::time::{Duration, Instant};

/// Monotonic stopwatch anchored at creation time.
#[derive(Debug, Clone)]
pub struct Stopwatch {
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339).
    epoch_wall: String,
}

impl Stopwatch {
    /// Start a stopwatch anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Seconds elapsed since start.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Wall-clock time at start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::start()
    }
}

/// Fixed-rate tick gate, used for frame pacing.
#[derive(Debug)]
pub struct RateController {
    target_interval_ns: u64,
    last_tick_ns: Option<u64>,
}

impl RateController {
    /// Create a controller targeting the given Hz rate.
    pub fn new(target_hz: u32) -> Self {
        Self {
            target_interval_ns: 1_000_000_000 / target_hz.max(1) as u64,
            last_tick_ns: None,
        }
    }

    /// Returns true and records the tick if a full interval has elapsed.
    /// The first call always returns true.
    ///
    /// Ticks are scheduled on the interval grid, so a late tick does not
    /// push every later tick back.
    pub fn should_tick(&mut self, current_ns: u64) -> bool {
        match self.last_tick_ns {
            None => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            Some(last) if current_ns >= last + self.target_interval_ns => {
                let behind = (current_ns - last) / self.target_interval_ns;
                self.last_tick_ns = Some(last + behind * self.target_interval_ns);
                true
            }
            _ => false,
        }
    }

    /// Target interval.
    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.target_interval_ns)
    }

    pub fn reset(&mut self) {
        self.last_tick_ns = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopwatch_elapsed() {
        let watch = Stopwatch::start();
        assert!(watch.elapsed_secs() < 1.0);
        assert!(!watch.epoch_wall().is_empty());
    }

    #[test]
    fn test_rate_controller() {
        let mut ctrl = RateController::new(60);
        assert!(ctrl.should_tick(0)); // first tick always fires
        assert!(!ctrl.should_tick(1_000_000)); // 1ms later, too soon
        assert!(ctrl.should_tick(17_000_000)); // ~17ms later (60Hz ~ 16.67ms)
    }

    #[test]
    fn test_rate_controller_stays_on_grid() {
        let mut ctrl = RateController::new(10);
        assert!(ctrl.should_tick(0));
        // Late by 50ms: next tick is still due at 200ms, not 250ms.
        assert!(ctrl.should_tick(150_000_000));
        assert!(!ctrl.should_tick(190_000_000));
        assert!(ctrl.should_tick(200_000_000));
    }

    #[test]
    fn test_rate_controller_zero_hz_clamped() {
        let ctrl = RateController::new(0);
        assert_eq!(ctrl.interval(), Duration::from_secs(1));
    }
}
