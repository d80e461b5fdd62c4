use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// WGS84 position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Finite and inside the ±90 / ±180 degree ranges
    pub fn validate(&self) -> Result<(), TrackerError> {
        let lat_ok = self.latitude.is_finite() && self.latitude.abs() <= 90.0;
        let lon_ok = self.longitude.is_finite() && self.longitude.abs() <= 180.0;
        if lat_ok && lon_ok {
            Ok(())
        } else {
            Err(TrackerError::MalformedFix {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }
}

/// One position report from the platform location provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    #[serde(flatten)]
    pub coordinate: Coordinate,
    /// Ground speed in m/s as reported; can be negative at rest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Course over ground in degrees, when the provider knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64, speed: Option<f64>, timestamp: DateTime<Utc>) -> Self {
        Self {
            coordinate: Coordinate::new(latitude, longitude),
            speed,
            heading: None,
            timestamp,
        }
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    /// Reported speed converted to km/h, clamped at zero.
    /// Missing or non-finite speed reads as 0.
    pub fn speed_kmh(&self) -> f64 {
        match self.speed {
            Some(speed) if speed.is_finite() => (speed * 3.6).max(0.0),
            _ => 0.0,
        }
    }
}
