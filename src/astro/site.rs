use serde::{Deserialize, Serialize};

const EARTH_ROTATION_RAD_S: f64 = 7.292_115e-5;

/// Geodetic position of the antenna.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObserverSite {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub height_m: f64,
}

impl Default for ObserverSite {
    fn default() -> Self {
        Self {
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            height_m: 0.0,
        }
    }
}

impl ObserverSite {
    pub fn new(latitude_deg: f64, longitude_deg: f64, height_m: f64) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
            height_m,
        }
    }

    /// Parses `"lat, lon"` in degrees.
    pub fn from_coordinates(coordinates: &str, height_m: Option<f64>) -> Option<Self> {
        let parts: Vec<_> = coordinates.split(',').map(|s| s.trim()).collect();
        if parts.len() < 2 {
            return None;
        }
        let lat: f64 = parts[0].parse().ok()?;
        let lon: f64 = parts[1].parse().ok()?;
        Self::checked(lat, lon, height_m.unwrap_or(0.0))
    }

    /// Builds a site, rejecting latitudes outside ±90 and longitudes outside
    /// -180..=360.
    pub fn checked(latitude_deg: f64, longitude_deg: f64, height_m: f64) -> Option<Self> {
        if !(-90.0..=90.0).contains(&latitude_deg)
            || !(-180.0..=360.0).contains(&longitude_deg)
            || !height_m.is_finite()
        {
            return None;
        }
        Some(Self::new(latitude_deg, longitude_deg, height_m))
    }

    pub fn lat_rad(&self) -> f64 {
        self.latitude_deg.to_radians()
    }

    pub fn lon_rad(&self) -> f64 {
        self.longitude_deg.to_radians()
    }

    pub fn position_ecef_km(&self) -> [f64; 3] {
        // WGS-84 constants
        let a = 6378.137;
        let e2 = 0.00669437999014;
        let lat = self.lat_rad();
        let lon = self.lon_rad();
        let sin_lat = lat.sin();
        let cos_lat = lat.cos();
        let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        let h_km = self.height_m / 1000.0;
        [
            (n + h_km) * cos_lat * lon.cos(),
            (n + h_km) * cos_lat * lon.sin(),
            (n * (1.0 - e2) + h_km) * sin_lat,
        ]
    }

    /// Speed of the site around the Earth's axis.
    pub fn rotation_speed_km_s(&self) -> f64 {
        let [x, y, _] = self.position_ecef_km();
        EARTH_ROTATION_RAD_S * x.hypot(y)
    }
}
