use std::time::Duration;
use vmin_common::duration_secs;

use crate::vmin_config::WatchdogSection;

/// Derives the watchdog heartbeat gap from a measured workload run.
///
/// The gap is `multiplier x measured`, floored so a very short workload
/// never leaves the watchdog with a gap it cannot reliably meet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeoutCalibrator {
    pub multiplier: f64,
    pub floor: Duration,
}

impl TimeoutCalibrator {
    pub fn new(multiplier: f64, floor: Duration) -> Self {
        Self { multiplier, floor }
    }

    pub fn from_settings(settings: &WatchdogSection) -> Self {
        Self::new(
            settings.timeout_multiplier,
            duration_secs(settings.min_timeout_secs.max(0.0)),
        )
    }

    pub fn calibrate(&self, measured: Duration) -> Duration {
        duration_secs(measured.as_secs_f64() * self.multiplier.max(1.0)).max(self.floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibrated_gap_is_five_times_measured() {
        let cal = TimeoutCalibrator::new(5.0, Duration::from_secs(30));
        assert_eq!(cal.calibrate(Duration::from_secs(20)), Duration::from_secs(100));
    }

    #[test]
    fn test_short_runs_are_floored() {
        let cal = TimeoutCalibrator::new(5.0, Duration::from_secs(30));
        assert_eq!(cal.calibrate(Duration::from_secs(2)), Duration::from_secs(30));
        assert_eq!(cal.calibrate(Duration::ZERO), Duration::from_secs(30));
    }

    #[test]
    fn test_from_settings_uses_watchdog_section() {
        let cal = TimeoutCalibrator::from_settings(&WatchdogSection::default());
        assert_eq!(cal.multiplier, 5.0);
        assert_eq!(cal.floor, Duration::from_secs(30));
    }

    #[test]
    fn test_infinite_multiplier_saturates() {
        let cal = TimeoutCalibrator::new(f64::INFINITY, Duration::from_secs(30));
        assert_eq!(cal.calibrate(Duration::from_secs(20)), Duration::MAX);
    }
}
