use thiserror::Error;

/// Run tracker error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Malformed fix: latitude {latitude}, longitude {longitude}")]
    MalformedFix { latitude: f64, longitude: f64 },

    #[error("Cannot {command} while {state}")]
    InvalidStateTransition {
        command: &'static str,
        state: &'static str,
    },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Run not found: {0}")]
    NotFound(String),
}

pub type TrackerResult<T> = Result<T, TrackerError>;

impl From<std::io::Error> for TrackerError {
    fn from(err: std::io::Error) -> Self {
        TrackerError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        TrackerError::StorageError(format!("JSON: {}", err))
    }
}
