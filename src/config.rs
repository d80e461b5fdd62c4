use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};
use crate::filter::{KalmanFilter1D, DEFAULT_MEASUREMENT_NOISE, DEFAULT_PROCESS_NOISE};

/// Noise parameters for one scalar filter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// R: how far the true value may drift between samples
    pub process_noise: f64,
    /// Q: how noisy each observation is
    pub measurement_noise: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            process_noise: DEFAULT_PROCESS_NOISE,
            measurement_noise: DEFAULT_MEASUREMENT_NOISE,
        }
    }
}

impl FilterConfig {
    pub fn build(&self) -> TrackerResult<KalmanFilter1D> {
        KalmanFilter1D::new(self.process_noise, self.measurement_noise)
    }
}

/// Tracking session tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub speed_filter: FilterConfig,
    pub distance_filter: FilterConfig,
    /// Clock period; each tick adds one second of elapsed time
    pub tick_interval_ms: u64,
    /// Filtered speed at or above which a tick counts as moving time
    pub moving_speed_threshold_kmh: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            speed_filter: FilterConfig::default(),
            distance_filter: FilterConfig::default(),
            tick_interval_ms: 1000,
            moving_speed_threshold_kmh: 1.0,
        }
    }
}

impl TrackerConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> TrackerResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TrackerError::InvalidConfiguration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: TrackerConfig = serde_json::from_str(&raw).map_err(|e| {
            TrackerError::InvalidConfiguration(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TrackerResult<()> {
        self.speed_filter.build()?;
        self.distance_filter.build()?;
        if self.tick_interval_ms == 0 {
            return Err(TrackerError::InvalidConfiguration(
                "tick interval must be non-zero".to_string(),
            ));
        }
        if !(self.moving_speed_threshold_kmh.is_finite() && self.moving_speed_threshold_kmh >= 0.0) {
            return Err(TrackerError::InvalidConfiguration(format!(
                "moving speed threshold must be >= 0, got {}",
                self.moving_speed_threshold_kmh
            )));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrackerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: TrackerConfig =
            serde_json::from_str(r#"{"speed_filter":{"measurement_noise":0.5}}"#).unwrap();
        assert_eq!(config.speed_filter.measurement_noise, 0.5);
        assert_eq!(config.speed_filter.process_noise, DEFAULT_PROCESS_NOISE);
        assert_eq!(config.distance_filter, FilterConfig::default());
        assert_eq!(config.tick_interval_ms, 1000);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = TrackerConfig::default();
        config.distance_filter.process_noise = 0.0;
        assert!(matches!(config.validate(), Err(TrackerError::InvalidConfiguration(_))));

        let mut config = TrackerConfig::default();
        config.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.moving_speed_threshold_kmh = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = TrackerConfig::from_json_file("/nonexistent/run_tracker.json").unwrap_err();
        assert!(matches!(err, TrackerError::InvalidConfiguration(_)));
    }
}
