use crate::error::{TrackerError, TrackerResult};

pub const DEFAULT_PROCESS_NOISE: f64 = 0.01;
pub const DEFAULT_MEASUREMENT_NOISE: f64 = 0.1;

/// Scalar Kalman filter with identity dynamics and no control input.
///
/// Smooths one noisy signal a sample at a time in O(1). The first observation
/// seeds the estimate unchanged; later observations are blended with the prior
/// by the gain `K = P' / (P' + Q)`.
#[derive(Debug, Clone)]
pub struct KalmanFilter1D {
    process_noise: f64,
    measurement_noise: f64,
    estimate: Option<f64>,
    error_covariance: f64,
}

impl KalmanFilter1D {
    /// `process_noise` is R, `measurement_noise` is Q. Both must be finite and positive.
    pub fn new(process_noise: f64, measurement_noise: f64) -> TrackerResult<Self> {
        if !(process_noise.is_finite() && process_noise > 0.0) {
            return Err(TrackerError::InvalidConfiguration(format!(
                "process noise must be positive, got {}",
                process_noise
            )));
        }
        if !(measurement_noise.is_finite() && measurement_noise > 0.0) {
            return Err(TrackerError::InvalidConfiguration(format!(
                "measurement noise must be positive, got {}",
                measurement_noise
            )));
        }

        Ok(Self {
            process_noise,
            measurement_noise,
            estimate: None,
            error_covariance: 0.0,
        })
    }

    pub fn filter(&mut self, observation: f64) -> f64 {
        match self.estimate {
            None => {
                self.estimate = Some(observation);
                self.error_covariance = self.measurement_noise;
                observation
            }
            Some(prior) => {
                let predicted_covariance = self.error_covariance + self.process_noise;
                let gain = predicted_covariance / (predicted_covariance + self.measurement_noise);
                let estimate = prior + gain * (observation - prior);
                self.estimate = Some(estimate);
                self.error_covariance = (1.0 - gain) * predicted_covariance;
                estimate
            }
        }
    }

    pub fn reset(&mut self) {
        self.estimate = None;
        self.error_covariance = 0.0;
    }

    pub fn estimate(&self) -> Option<f64> {
        self.estimate
    }

    pub fn is_initialized(&self) -> bool {
        self.estimate.is_some()
    }

    pub fn error_covariance(&self) -> Option<f64> {
        self.estimate.map(|_| self.error_covariance)
    }
}

impl Default for KalmanFilter1D {
    fn default() -> Self {
        Self {
            process_noise: DEFAULT_PROCESS_NOISE,
            measurement_noise: DEFAULT_MEASUREMENT_NOISE,
            estimate: None,
            error_covariance: 0.0,
        }
    }
}
