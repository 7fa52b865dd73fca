use serde::{Deserialize, Serialize};

use crate::rotator::RotatorPosition;

/// ICRS right ascension and declination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Equatorial {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

impl Equatorial {
    pub fn new(ra_deg: f64, dec_deg: f64) -> Self {
        Self { ra_deg, dec_deg }
    }
}

/// Topocentric altitude and azimuth (north through east).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Horizontal {
    pub alt_deg: f64,
    pub az_deg: f64,
}

impl Horizontal {
    pub fn new(alt_deg: f64, az_deg: f64) -> Self {
        Self { alt_deg, az_deg }
    }
}

impl From<RotatorPosition> for Horizontal {
    fn from(pos: RotatorPosition) -> Self {
        Self::new(pos.elevation_deg, pos.azimuth_deg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Galactic {
    pub l_deg: f64,
    pub b_deg: f64,
}
