use std::fmt;

/// Minutes and seconds needed to cover one kilometre
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pace {
    pub minutes: u64,
    pub seconds: u64,
}

impl Pace {
    /// Average pace over a distance. `None` when either input is zero or unusable.
    pub fn from_distance(distance_km: f64, elapsed_seconds: u64) -> Option<Self> {
        if !(distance_km.is_finite() && distance_km > 0.0) || elapsed_seconds == 0 {
            return None;
        }
        Self::from_seconds_per_km(elapsed_seconds as f64 / distance_km)
    }

    /// Instantaneous pace at a speed in km/h
    pub fn from_speed_kmh(speed_kmh: f64) -> Option<Self> {
        if !(speed_kmh.is_finite() && speed_kmh > 0.0) {
            return None;
        }
        Self::from_seconds_per_km(3600.0 / speed_kmh)
    }

    fn from_seconds_per_km(seconds_per_km: f64) -> Option<Self> {
        if !seconds_per_km.is_finite() {
            return None;
        }
        let mut minutes = (seconds_per_km / 60.0).floor() as u64;
        let mut seconds = (seconds_per_km % 60.0).round() as u64;
        // 59.5s and up rounds to a full minute
        if seconds == 60 {
            minutes += 1;
            seconds = 0;
        }
        Some(Self { minutes, seconds })
    }

    pub fn seconds_per_km(&self) -> u64 {
        self.minutes * 60 + self.seconds
    }
}

impl fmt::Display for Pace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}'{:02}\"", self.minutes, self.seconds)
    }
}

/// Average pace as `M'SS"`, or `0'00"` before any distance or time is recorded
pub fn pace(distance_km: f64, elapsed_seconds: u64) -> String {
    Pace::from_distance(distance_km, elapsed_seconds)
        .unwrap_or_default()
        .to_string()
}

/// Elapsed time as `MM:SS`; minutes keep counting past 59
pub fn format_elapsed(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
