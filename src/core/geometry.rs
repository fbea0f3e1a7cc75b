//! Sun/view geometry and radiometric helpers shared by all stages

use chrono::{DateTime, TimeZone, Utc};
use std::f64::consts::PI;

/// Sun and view angles of one pixel with the derived trigonometric terms
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub sza: f64,
    pub vza: f64,
    pub saa: f64,
    pub vaa: f64,
    pub mus: f64,
    pub muv: f64,
    pub sins: f64,
    pub sinv: f64,
    /// Relative azimuth in degrees, folded into [0, 180]
    pub delta_azimuth: f64,
    pub air_mass: f64,
}

impl Geometry {
    /// Build from angles in degrees
    pub fn new(sza: f64, vza: f64, saa: f64, vaa: f64) -> Self {
        let sza_rad = sza.to_radians();
        let vza_rad = vza.to_radians();
        let mus = sza_rad.cos();
        let muv = vza_rad.cos();
        Self {
            sza,
            vza,
            saa,
            vaa,
            mus,
            muv,
            sins: sza_rad.sin(),
            sinv: vza_rad.sin(),
            delta_azimuth: azimuth_difference(vaa, saa),
            air_mass: 1.0 / mus + 1.0 / muv,
        }
    }
}

/// Two-way air mass for sun and view zenith angles in degrees
pub fn air_mass(sza: f64, vza: f64) -> f64 {
    1.0 / sza.to_radians().cos() + 1.0 / vza.to_radians().cos()
}

/// Relative azimuth between view and sun azimuths, in [0, 180] degrees
pub fn azimuth_difference(vaa: f64, saa: f64) -> f64 {
    (vaa - saa).to_radians().cos().clamp(-1.0, 1.0).acos().to_degrees()
}

/// Reduce sea-level ECMWF pressure to the surface altitude (metres).
///
/// Only positive altitudes lower the pressure.
pub fn correct_ecmwf_pressure(pressure: f64, altitude: f64, scale_height: f64) -> f64 {
    pressure * (-altitude.max(0.0) / scale_height).exp()
}

/// Azimuth in degrees of a vector given by its eastward (`x`) and
/// northward (`y`) components
pub fn vector_azimuth(x: f64, y: f64) -> f64 {
    if y > 0.0 {
        (x / y).atan().to_degrees()
    } else if y < 0.0 {
        180.0 + (x / y).atan().to_degrees()
    } else if x >= 0.0 {
        90.0
    } else {
        270.0
    }
}

/// Convert TOA radiance to reflectance
pub fn radiance_to_reflectance(
    radiance: f64,
    mus: f64,
    solar_irradiance: f64,
    seasonal_factor: f64,
) -> f64 {
    radiance * PI / mus * seasonal_factor / solar_irradiance
}

/// Ratio of the squared sun-earth distance at acquisition time to the
/// reference squared distance of the calibration.
///
/// The acquisition time is the midpoint of `start` and `stop`.
pub fn seasonal_factor(
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    sun_earth_distance_square: f64,
) -> f64 {
    // Semi-major axis (m) and eccentricity of the earth orbit
    const SEMI_MAJOR_AXIS: f64 = 149_597_870.0 * 1000.0;
    const ECCENTRICITY: f64 = 0.017;
    // Perihelion 2000-01-03 05:00 UTC, in days since 2000-01-01
    const PERIHELION_2000: f64 = 3.0 + 5.0 / 24.0;
    const DAYS_PER_YEAR: f64 = 365.25;

    let days_since_2000 = 0.5 * (days_since_2000(start) + days_since_2000(stop));
    let theta = 2.0 * PI * ((days_since_2000 - PERIHELION_2000) / DAYS_PER_YEAR);
    let r = SEMI_MAJOR_AXIS * (1.0 - ECCENTRICITY * ECCENTRICITY) / (1.0 + ECCENTRICITY * theta.cos());
    r * r / sun_earth_distance_square
}

fn days_since_2000(t: DateTime<Utc>) -> f64 {
    let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).single();
    match epoch {
        Some(epoch) => (t - epoch).num_milliseconds() as f64 / 86_400_000.0,
        None => 0.0,
    }
}
