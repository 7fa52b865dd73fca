use serde::{Deserialize, Deserializer};
use std::time::Duration;
use thiserror::Error;

use crate::astro::ObserverSite;
use crate::rotator::{protocol::DEFAULT_PULSES_PER_DEGREE, Limits, Rot2Prog};
use crate::tracker::TrackerSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid station coordinates: {0}")]
    Coordinates(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub station: Option<StationConfig>,
    #[serde(default)]
    pub rotator: RotatorConfig,
    #[serde(default)]
    pub tracker: TrackerSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationConfig {
    pub name: Option<String>,
    pub coordinates: String,
    #[serde(default)]
    pub altitude_m: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RotatorConfig {
    pub port: String,
    pub baud_rate: u32,
    #[serde(deserialize_with = "duration")]
    pub timeout: Duration,
    pub pulses_per_degree: u8,
    pub poll_retries: u32,
    pub limits: Limits,
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 600,
            timeout: Duration::from_secs(1),
            pulses_per_degree: DEFAULT_PULSES_PER_DEGREE,
            poll_retries: 1,
            limits: Limits::default(),
        }
    }
}

impl RotatorConfig {
    pub fn codec(&self) -> Rot2Prog {
        Rot2Prog::new(self.pulses_per_degree, self.limits)
    }
}

impl StationConfig {
    pub fn site(&self) -> Result<ObserverSite, ConfigError> {
        ObserverSite::from_coordinates(&self.coordinates, Some(self.altitude_m))
            .ok_or_else(|| ConfigError::Coordinates(self.coordinates.clone()))
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// The configured station, if any.
    pub fn site(&self) -> Result<Option<ObserverSite>, ConfigError> {
        self.station.as_ref().map(StationConfig::site).transpose()
    }
}

/// Reads a humantime duration such as `"30s"` or `"1m 30s"`.
pub fn duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom)
}
