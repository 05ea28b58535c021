//! Angular unit conversions between wire and client representations.
//!
//! The mount protocol carries every angle in radians. Client code uses the
//! conventional equatorial units: right ascension in hours (0-24) and
//! declination in degrees.

use std::f64::consts::PI;

/// Radians per hour of right ascension (24 h = 2π).
pub const RADIANS_PER_HOUR: f64 = PI / 12.0;

/// Radians per degree.
pub const RADIANS_PER_DEGREE: f64 = PI / 180.0;

/// Convert right ascension hours to radians.
pub fn hours_to_radians(hours: f64) -> f64 {
    hours * RADIANS_PER_HOUR
}

/// Convert radians to right ascension hours.
pub fn radians_to_hours(radians: f64) -> f64 {
    radians / RADIANS_PER_HOUR
}

/// Convert degrees to radians.
pub fn degrees_to_radians(degrees: f64) -> f64 {
    degrees * RADIANS_PER_DEGREE
}

/// Convert radians to degrees.
pub fn radians_to_degrees(radians: f64) -> f64 {
    radians / RADIANS_PER_DEGREE
}
