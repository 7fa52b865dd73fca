//! ICRS to apparent topocentric coordinates and back.
//!
//! Annual aberration is applied in the ICRS frame, followed by IAU 1976
//! precession, the leading terms of IAU 1980 nutation and diurnal aberration.
//! Refraction is not modelled.

use chrono::{DateTime, Utc};
use std::f64::consts::{PI, TAU};

use super::site::ObserverSite;
use super::types::{Equatorial, Galactic, Horizontal};

type Vec3 = [f64; 3];

const ARCSEC: f64 = PI / (180.0 * 3600.0);
const J2000_JD: f64 = 2_451_545.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const TT_MINUS_UTC_S: f64 = 69.184;
const ABERRATION_ARCSEC: f64 = 20.495_52;
const OBLIQUITY_J2000_DEG: f64 = 23.439_291_1;
const SPEED_OF_LIGHT_KM_S: f64 = 299_792.458;

const ICRS_TO_GALACTIC: [Vec3; 3] = [
    [-0.054_875_560_416_215_4, -0.873_437_090_234_885, -0.483_835_015_548_713_2],
    [0.494_109_427_875_583_7, -0.444_829_629_960_011_2, 0.746_982_244_497_218_9],
    [-0.867_666_149_019_004_7, -0.198_076_373_431_201_5, 0.455_983_776_175_066_9],
];

struct Nutation {
    dpsi: f64,
    mean_obliquity: f64,
    true_obliquity: f64,
}

pub fn to_horizontal(target: &Equatorial, site: &ObserverSite, time: DateTime<Utc>) -> Horizontal {
    let t = julian_centuries_tt(time);
    let nut = nutation(t);
    let last = apparent_sidereal_time(time, &nut) + site.lon_rad();

    let p = unit_vector(target.ra_deg.to_radians(), target.dec_deg.to_radians());
    let p = aberrate(p, earth_velocity(t));
    let p = nutate(precess(p, t), &nut);
    let p = aberrate(p, diurnal_velocity(site, last));
    let (ra, dec) = spherical(p);

    let (alt, az) = rotate_horizon(last - ra, dec, site.lat_rad());
    Horizontal::new(alt.to_degrees(), az.to_degrees())
}

pub fn to_equatorial(
    position: &Horizontal,
    site: &ObserverSite,
    time: DateTime<Utc>,
) -> Equatorial {
    let t = julian_centuries_tt(time);
    let nut = nutation(t);
    let last = apparent_sidereal_time(time, &nut) + site.lon_rad();

    // the horizon rotation is its own inverse: (alt, az) -> (dec, hour angle)
    let (dec, hour_angle) = rotate_horizon(
        position.az_deg.to_radians(),
        position.alt_deg.to_radians(),
        site.lat_rad(),
    );

    let p = unit_vector(last - hour_angle, dec);
    let p = unaberrate(p, diurnal_velocity(site, last));
    let p = unprecess(unnutate(p, &nut), t);
    let p = unaberrate(p, earth_velocity(t));
    let (ra, dec) = spherical(p);

    Equatorial::new(ra.to_degrees().rem_euclid(360.0), dec.to_degrees())
}

pub fn to_galactic(position: &Equatorial) -> Galactic {
    let p = unit_vector(position.ra_deg.to_radians(), position.dec_deg.to_radians());
    let g = ICRS_TO_GALACTIC.map(|row| dot(row, p));
    let (l, b) = spherical(g);
    Galactic {
        l_deg: l.to_degrees().rem_euclid(360.0),
        b_deg: b.to_degrees(),
    }
}

/// Great-circle distance between two pointings, in degrees.
pub fn separation_deg(a: &Horizontal, b: &Horizontal) -> f64 {
    let u = unit_vector(a.az_deg.to_radians(), a.alt_deg.to_radians());
    let v = unit_vector(b.az_deg.to_radians(), b.alt_deg.to_radians());
    let c = cross(u, v);
    let sin = (c[0] * c[0] + c[1] * c[1] + c[2] * c[2]).sqrt();
    sin.atan2(dot(u, v)).to_degrees()
}

fn julian_centuries_tt(time: DateTime<Utc>) -> f64 {
    let unix = time.timestamp() as f64 + f64::from(time.timestamp_subsec_nanos()) * 1e-9;
    let jd_tt = UNIX_EPOCH_JD + (unix + TT_MINUS_UTC_S) / 86_400.0;
    (jd_tt - J2000_JD) / 36_525.0
}

fn apparent_sidereal_time(time: DateTime<Utc>, nut: &Nutation) -> f64 {
    let gmst =
        sgp4::iau_epoch_to_sidereal_time(sgp4::julian_years_since_j2000(&time.naive_utc()));
    gmst + nut.dpsi * nut.true_obliquity.cos()
}

fn nutation(t: f64) -> Nutation {
    let omega = (125.044_52 - 1_934.136_261 * t).to_radians();
    let l_sun = (280.466_5 + 36_000.769_8 * t).to_radians();
    let l_moon = (218.316_5 + 481_267.881_3 * t).to_radians();

    let dpsi = (-17.20 * omega.sin() - 1.32 * (2.0 * l_sun).sin() - 0.23 * (2.0 * l_moon).sin()
        + 0.21 * (2.0 * omega).sin())
        * ARCSEC;
    let deps = (9.20 * omega.cos() + 0.57 * (2.0 * l_sun).cos() + 0.10 * (2.0 * l_moon).cos()
        - 0.09 * (2.0 * omega).cos())
        * ARCSEC;
    let mean_obliquity =
        (84_381.448 - 46.815_0 * t - 0.000_59 * t * t + 0.001_813 * t * t * t) * ARCSEC;

    Nutation {
        dpsi,
        mean_obliquity,
        true_obliquity: mean_obliquity + deps,
    }
}

fn precession_angles(t: f64) -> (f64, f64, f64) {
    let zeta = (2_306.218_1 * t + 0.301_88 * t * t + 0.017_998 * t * t * t) * ARCSEC;
    let z = (2_306.218_1 * t + 1.094_68 * t * t + 0.018_203 * t * t * t) * ARCSEC;
    let theta = (2_004.310_9 * t - 0.426_65 * t * t - 0.041_833 * t * t * t) * ARCSEC;
    (zeta, z, theta)
}

fn precess(p: Vec3, t: f64) -> Vec3 {
    let (zeta, z, theta) = precession_angles(t);
    rot_z(-z, rot_y(theta, rot_z(-zeta, p)))
}

fn unprecess(p: Vec3, t: f64) -> Vec3 {
    let (zeta, z, theta) = precession_angles(t);
    rot_z(zeta, rot_y(-theta, rot_z(z, p)))
}

fn nutate(p: Vec3, nut: &Nutation) -> Vec3 {
    rot_x(
        -nut.true_obliquity,
        rot_z(-nut.dpsi, rot_x(nut.mean_obliquity, p)),
    )
}

fn unnutate(p: Vec3, nut: &Nutation) -> Vec3 {
    rot_x(
        -nut.mean_obliquity,
        rot_z(nut.dpsi, rot_x(nut.true_obliquity, p)),
    )
}

/// Earth's heliocentric velocity in units of c, ICRS axes.
fn earth_velocity(t: f64) -> Vec3 {
    let l0 = 280.466_46 + 36_000.769_83 * t + 0.000_303_2 * t * t;
    let m = (357.529_11 + 35_999.050_29 * t - 0.000_153_7 * t * t).to_radians();
    let c = (1.914_602 - 0.004_817 * t - 0.000_014 * t * t) * m.sin()
        + (0.019_993 - 0.000_101 * t) * (2.0 * m).sin()
        + 0.000_289 * (3.0 * m).sin();
    let sun_lon = (l0 + c).to_radians();
    let e = 0.016_708_634 - 0.000_042_037 * t - 0.000_000_126_7 * t * t;
    let perihelion = (102.937_35 + 1.719_46 * t + 0.000_46 * t * t).to_radians();

    let k = ABERRATION_ARCSEC * ARCSEC;
    let eps = OBLIQUITY_J2000_DEG.to_radians();
    let along = sun_lon.cos() - e * perihelion.cos();
    [
        k * (sun_lon.sin() - e * perihelion.sin()),
        -k * along * eps.cos(),
        -k * along * eps.sin(),
    ]
}

/// Site velocity from Earth rotation in units of c, true equator of date.
fn diurnal_velocity(site: &ObserverSite, last: f64) -> Vec3 {
    let beta = site.rotation_speed_km_s() / SPEED_OF_LIGHT_KM_S;
    [-beta * last.sin(), beta * last.cos(), 0.0]
}

fn aberrate(p: Vec3, beta: Vec3) -> Vec3 {
    let d = dot(p, beta);
    normalize([
        p[0] + beta[0] - d * p[0],
        p[1] + beta[1] - d * p[1],
        p[2] + beta[2] - d * p[2],
    ])
}

fn unaberrate(p: Vec3, beta: Vec3) -> Vec3 {
    let d = dot(p, beta);
    normalize([
        p[0] - beta[0] + d * p[0],
        p[1] - beta[1] + d * p[1],
        p[2] - beta[2] + d * p[2],
    ])
}

/// Rotates between (hour angle, declination) and (azimuth, altitude) about
/// the east-west axis. Returns (altitude, azimuth) or (declination, hour
/// angle) respectively, the second angle in [0, 2π).
fn rotate_horizon(lon: f64, lat: f64, site_lat: f64) -> (f64, f64) {
    let (sin_l, cos_l) = lon.sin_cos();
    let (sin_b, cos_b) = lat.sin_cos();
    let (sin_p, cos_p) = site_lat.sin_cos();

    let b = (sin_p * sin_b + cos_p * cos_b * cos_l).clamp(-1.0, 1.0).asin();
    let l = (-cos_b * sin_l).atan2(sin_b * cos_p - cos_b * sin_p * cos_l);
    (b, l.rem_euclid(TAU))
}

fn unit_vector(lon: f64, lat: f64) -> Vec3 {
    let (sin_l, cos_l) = lon.sin_cos();
    let (sin_b, cos_b) = lat.sin_cos();
    [cos_b * cos_l, cos_b * sin_l, sin_b]
}

fn spherical(p: Vec3) -> (f64, f64) {
    let lon = p[1].atan2(p[0]);
    let lat = p[2].atan2(p[0].hypot(p[1]));
    (lon, lat)
}

fn normalize(p: Vec3) -> Vec3 {
    let n = dot(p, p).sqrt();
    [p[0] / n, p[1] / n, p[2] / n]
}

fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn rot_x(angle: f64, p: Vec3) -> Vec3 {
    let (s, c) = angle.sin_cos();
    [p[0], c * p[1] + s * p[2], -s * p[1] + c * p[2]]
}

fn rot_y(angle: f64, p: Vec3) -> Vec3 {
    let (s, c) = angle.sin_cos();
    [c * p[0] - s * p[2], p[1], s * p[0] + c * p[2]]
}

fn rot_z(angle: f64, p: Vec3) -> Vec3 {
    let (s, c) = angle.sin_cos();
    [c * p[0] + s * p[1], -s * p[0] + c * p[1], p[2]]
}
