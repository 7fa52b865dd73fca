use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RotatorError {
    #[error("position not representable: azimuth {azimuth}, elevation {elevation}")]
    Encoding { azimuth: f64, elevation: f64 },
    #[error("malformed frame: {0}")]
    Framing(String),
    #[error("decoded position out of range: azimuth {azimuth}, elevation {elevation}")]
    Decoding { azimuth: f64, elevation: f64 },
    #[error("no complete response within {0:?}")]
    Timeout(Duration),
    #[error("link error: {0}")]
    Link(#[from] std::io::Error),
    #[error("serial port error: {0}")]
    Open(#[from] serialport::Error),
    #[error("rotator link is closed")]
    Closed,
}

impl RotatorError {
    /// Errors worth a second poll: a dropped or garbled reply.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RotatorError::Timeout(_) | RotatorError::Framing(_) | RotatorError::Decoding { .. }
        )
    }
}
