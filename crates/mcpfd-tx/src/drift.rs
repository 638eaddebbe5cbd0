//! Rate limiting of tracking-drift reports.
//!
//! A single disagreement between the ownership table and the controller is
//! logged and tolerated. A burst of them inside one window usually means the
//! bus is corrupting transfers, so it is escalated once as an alarm.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{error, warn};

#[derive(Debug)]
pub struct DriftMonitor {
    threshold: usize,
    window: Duration,
    recent: VecDeque<Instant>,
}

impl DriftMonitor {
    /// `threshold` of 0 disables alarms.
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self {
            threshold,
            window,
            recent: VecDeque::with_capacity(threshold),
        }
    }

    /// Record one drift occurrence at `now`; returns true if it raised an alarm.
    pub fn record(&mut self, now: Instant, reason: &'static str) -> bool {
        warn!(reason, "transmit tracking drift");
        if self.threshold == 0 {
            return false;
        }

        while let Some(oldest) = self.recent.front() {
            if now.saturating_duration_since(*oldest) > self.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        self.recent.push_back(now);

        if self.recent.len() < self.threshold {
            return false;
        }
        error!(
            occurrences = self.recent.len(),
            window_ms = self.window.as_millis() as u64,
            "drift alarm: transmit tracking repeatedly disagrees with the controller"
        );
        self.recent.clear();
        true
    }

    /// Occurrences currently inside the window.
    pub fn pending(&self) -> usize {
        self.recent.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alarm_after_threshold_within_window() {
        let mut monitor = DriftMonitor::new(3, Duration::from_secs(1));
        let start = Instant::now();

        assert!(!monitor.record(start, "test"));
        assert!(!monitor.record(start + Duration::from_millis(10), "test"));
        assert!(monitor.record(start + Duration::from_millis(20), "test"));
        assert_eq!(monitor.pending(), 0);
    }

    #[test]
    fn old_occurrences_fall_out_of_window() {
        let mut monitor = DriftMonitor::new(2, Duration::from_millis(100));
        let start = Instant::now();

        assert!(!monitor.record(start, "test"));
        assert!(!monitor.record(start + Duration::from_millis(500), "test"));
        assert_eq!(monitor.pending(), 1);
    }

    #[test]
    fn zero_threshold_never_alarms() {
        let mut monitor = DriftMonitor::new(0, Duration::from_secs(1));
        let now = Instant::now();
        for _ in 0..10 {
            assert!(!monitor.record(now, "test"));
        }
        assert_eq!(monitor.pending(), 0);
    }
}
