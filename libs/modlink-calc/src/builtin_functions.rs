//! Built-in functions and constants for transform expressions
//!
//! All functions are stateless and pure; they are registered into every
//! evaluation context by [`crate::CalcEngine`].

/// Named constants available to every expression.
///
/// Unit factors convert the common marine/industrial units into SI:
/// `x * knot` turns knots into m/s, `x + kelvin_offset` turns °C into K.
pub const CONSTANTS: &[(&str, f64)] = &[
    ("pi", std::f64::consts::PI),
    ("e", std::f64::consts::E),
    ("kelvin_offset", 273.15),
    ("knot", 1852.0 / 3600.0),
    ("nautical_mile", 1852.0),
    ("deg", std::f64::consts::PI / 180.0),
    ("hour", 3600.0),
];

/// Scale function: value * factor
pub fn scale(value: f64, factor: f64) -> f64 {
    value * factor
}

/// Clamp function: limit value to [min, max]
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

/// Absolute value
pub fn abs(value: f64) -> f64 {
    value.abs()
}

/// Minimum of two values
pub fn min(a: f64, b: f64) -> f64 {
    a.min(b)
}

/// Maximum of two values
pub fn max(a: f64, b: f64) -> f64 {
    a.max(b)
}

/// Round to specified decimal places
pub fn round(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

/// Sign function: returns -1, 0, or 1
pub fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Square root; negative input yields NaN and is rejected by the evaluator
pub fn sqrt(value: f64) -> f64 {
    value.sqrt()
}

/// Power: base ^ exponent
pub fn pow(base: f64, exponent: f64) -> f64 {
    base.powf(exponent)
}
