use thiserror::Error;

use crate::rotator::RotatorError;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker already running")]
    AlreadyRunning,
    #[error("tracker has stopped")]
    Stopped,
    #[error("tolerance must be within [0, 30) degrees, got {0}")]
    InvalidTolerance(f64),
    #[error("cadence must be non-zero")]
    InvalidCadence,
    #[error("failure threshold must be at least 1")]
    InvalidThreshold,
    #[error("lead must be at most one hour, got {0:?}")]
    InvalidLead(std::time::Duration),
    #[error("invalid target: ra {ra:?}, dec {dec:?}")]
    InvalidTarget { ra: Option<f64>, dec: Option<f64> },
    #[error("rotator error: {0}")]
    Rotator(#[from] RotatorError),
    #[error("tracker worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}
