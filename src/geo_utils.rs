//! Geographic utilities: distances and the fixed-point coordinate encoding
//! used by the store.

use crate::GpsPoint;

/// Earth's radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Scale between degrees and stored integer coordinates (~0.11 m resolution).
pub const COORDINATE_SCALE: f64 = 1e6;

/// Haversine distance between two points in meters.
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let d_lat = (p2.latitude - p1.latitude).to_radians();
    let d_lon = (p2.longitude - p1.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + p1.latitude.to_radians().cos()
            * p2.latitude.to_radians().cos()
            * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Convert degrees to the stored E6 integer.
///
/// Rounds to the nearest step so that a value written and read back differs
/// by at most half a step.
pub fn to_e6(degrees: f64) -> i64 {
    (degrees * COORDINATE_SCALE).round() as i64
}

/// Convert a stored E6 integer back to degrees.
pub fn from_e6(value: i64) -> f64 {
    value as f64 / COORDINATE_SCALE
}
