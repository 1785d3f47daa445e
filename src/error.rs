// error.rs
use thiserror::Error;

/// Rejected configurations. `start` never creates a partial simulation when one of these is raised.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("grid must be at least 3 cells wide, got {0}")]
    GridTooSmall(usize),

    #[error("{lanes} horizontal lanes do not fit in a grid of size {size}")]
    TooManyHorizontalLanes { lanes: usize, size: usize },

    #[error("{lanes} vertical lanes do not fit in a grid of size {size}")]
    TooManyVerticalLanes { lanes: usize, size: usize },

    #[error("{name} must be a probability in [0, 1], got {value}")]
    InvalidProbability { name: &'static str, value: f64 },

    #[error("{name} must be a finite, non-negative rate, got {value}")]
    InvalidRate { name: &'static str, value: f64 },

    #[error("clock unit must be at least 1 ms")]
    ZeroClockUnit,
}

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("dispatch task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

pub type SimulationResult<T> = Result<T, SimulationError>;
