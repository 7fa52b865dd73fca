use serde::{Deserialize, Serialize};

/// A rotator pointing, as reported by (or sent to) the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotatorPosition {
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
}

impl RotatorPosition {
    pub fn new(azimuth_deg: f64, elevation_deg: f64) -> Self {
        Self {
            azimuth_deg,
            elevation_deg,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    GetPosition,
    MoveTo(RotatorPosition),
    Stop,
}

/// Mechanical travel accepted by the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub azimuth_min: f64,
    pub azimuth_max: f64,
    pub elevation_min: f64,
    pub elevation_max: f64,
}

impl Default for Limits {
    // Rot2Prog documented range.
    fn default() -> Self {
        Self {
            azimuth_min: -180.0,
            azimuth_max: 540.0,
            elevation_min: -21.0,
            elevation_max: 180.0,
        }
    }
}

impl Limits {
    pub fn contains(&self, pos: &RotatorPosition) -> bool {
        (self.azimuth_min..=self.azimuth_max).contains(&pos.azimuth_deg)
            && (self.elevation_min..=self.elevation_max).contains(&pos.elevation_deg)
    }
}
