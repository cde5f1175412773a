use std::time::Duration;

/// Timer periods and policy thresholds for the tracking coordinator.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Period of the location-sync cycle (GPS + battery read, upload callback).
    pub sync_interval: Duration,

    /// Period of the countdown publisher tick. One second in production;
    /// anything else only makes sense in tests.
    pub countdown_tick: Duration,

    /// Period of the offline recovery-data refresh (active only while offline).
    pub offline_data_interval: Duration,

    /// Period of the permission-revocation poll.
    pub permission_check_interval: Duration,

    /// Period of the independent battery poll.
    pub battery_check_interval: Duration,

    /// Period of the offline-duration check.
    pub offline_check_interval: Duration,

    /// Continuous offline duration that forces an emergency check-out.
    pub offline_timeout: Duration,

    /// Battery charge fraction (0.0–1.0) at or below which tracking
    /// terminates with an automatic check-out.
    pub low_battery_threshold: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(5 * 60),
            countdown_tick: Duration::from_secs(1),
            offline_data_interval: Duration::from_secs(60),
            permission_check_interval: Duration::from_secs(30),
            battery_check_interval: Duration::from_secs(30),
            offline_check_interval: Duration::from_secs(60),
            offline_timeout: Duration::from_secs(60 * 60),
            low_battery_threshold: 0.05,
        }
    }
}

impl TrackerConfig {
    /// Second-scale intervals for local runs of the demo binary.
    pub fn debug_profile() -> Self {
        Self {
            sync_interval: Duration::from_secs(10),
            countdown_tick: Duration::from_secs(1),
            offline_data_interval: Duration::from_secs(3),
            permission_check_interval: Duration::from_secs(2),
            battery_check_interval: Duration::from_secs(2),
            offline_check_interval: Duration::from_secs(3),
            offline_timeout: Duration::from_secs(20),
            low_battery_threshold: 0.05,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.sync_interval, Duration::from_secs(300));
        assert_eq!(config.countdown_tick, Duration::from_secs(1));
        assert_eq!(config.offline_data_interval, Duration::from_secs(60));
        assert_eq!(config.permission_check_interval, Duration::from_secs(30));
        assert_eq!(config.battery_check_interval, Duration::from_secs(30));
        assert_eq!(config.offline_timeout, Duration::from_secs(3600));
        assert!((config.low_battery_threshold - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn debug_profile_is_second_scale() {
        let config = TrackerConfig::debug_profile();
        assert!(config.sync_interval <= Duration::from_secs(30));
        assert!(config.offline_timeout <= Duration::from_secs(60));
    }
}
