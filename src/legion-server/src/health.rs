//! Failure-threshold policy for legions.

/// What a recorded failure did to a legion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    /// Failure counted; the legion keeps its current status.
    Degraded { failures: u32 },
    /// Threshold reached; the legion was forced dormant and its counter reset.
    Tripped,
}

/// Counts consecutive operational failures and decides when to trip.
///
/// There is no cooldown: after a trip the counter starts again from zero.
#[derive(Debug, Clone, Copy)]
pub struct HealthMonitor {
    threshold: u32,
}

impl HealthMonitor {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Apply one failure to `failure_count`, resetting it when the legion trips.
    pub fn observe(&self, failure_count: &mut u32) -> HealthVerdict {
        *failure_count = failure_count.saturating_add(1);
        if *failure_count >= self.threshold {
            *failure_count = 0;
            HealthVerdict::Tripped
        } else {
            HealthVerdict::Degraded {
                failures: *failure_count,
            }
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trips_at_threshold_and_restarts_from_zero() {
        let monitor = HealthMonitor::new(3);
        let mut count = 0;
        assert_eq!(monitor.observe(&mut count), HealthVerdict::Degraded { failures: 1 });
        assert_eq!(monitor.observe(&mut count), HealthVerdict::Degraded { failures: 2 });
        assert_eq!(monitor.observe(&mut count), HealthVerdict::Tripped);
        assert_eq!(count, 0);
        assert_eq!(monitor.observe(&mut count), HealthVerdict::Degraded { failures: 1 });
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let monitor = HealthMonitor::new(0);
        let mut count = 0;
        assert_eq!(monitor.threshold(), 1);
        assert_eq!(monitor.observe(&mut count), HealthVerdict::Tripped);
    }
}
