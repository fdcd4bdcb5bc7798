//! Color temperature conversions.
//!
//! Pure formulas used to derive the wire color value from the circadian
//! color temperature source: Kelvin to mireds for tunable-white lights,
//! Kelvin to RGB (piecewise-logarithmic approximation) for RGB lights, and
//! RGB to CIE xy (sRGB gamma + Wide RGB D65 matrix) for xy lights.

/// Valid Kelvin domain for the RGB approximation
const KELVIN_MIN: f64 = 1000.0;
const KELVIN_MAX: f64 = 40000.0;

/// Convert a color temperature in Kelvin to mireds, rounded.
pub fn kelvin_to_mired(kelvin: u32) -> u16 {
    let kelvin = kelvin.max(1);
    ((1_000_000 + kelvin / 2) / kelvin) as u16
}

/// Convert a color temperature in mireds to Kelvin, rounded.
pub fn mired_to_kelvin(mired: u16) -> u32 {
    let mired = u32::from(mired.max(1));
    (1_000_000 + mired / 2) / mired
}

/// Approximate an RGB color for a color temperature in Kelvin.
///
/// Input is clamped to the 1000-40000 K domain the approximation is
/// defined over.
pub fn color_temperature_to_rgb(kelvin: f64) -> (u8, u8, u8) {
    let temp = kelvin.clamp(KELVIN_MIN, KELVIN_MAX) / 100.0;

    let red = if temp <= 66.0 {
        255.0
    } else {
        329.698727446 * (temp - 60.0).powf(-0.1332047592)
    };

    let green = if temp <= 66.0 {
        99.4708025861 * temp.ln() - 161.1195681661
    } else {
        288.1221695283 * (temp - 60.0).powf(-0.0755148492)
    };

    let blue = if temp >= 66.0 {
        255.0
    } else if temp <= 19.0 {
        0.0
    } else {
        138.5177312231 * (temp - 10.0).ln() - 305.0447927307
    };

    (
        red.clamp(0.0, 255.0).round() as u8,
        green.clamp(0.0, 255.0).round() as u8,
        blue.clamp(0.0, 255.0).round() as u8,
    )
}

/// Convert an RGB color to CIE 1931 xy coordinates.
///
/// Applies sRGB gamma correction, then the Wide RGB D65 conversion matrix.
pub fn rgb_to_xy(red: u8, green: u8, blue: u8) -> (f64, f64) {
    let r = gamma_correct(f64::from(red) / 255.0);
    let g = gamma_correct(f64::from(green) / 255.0);
    let b = gamma_correct(f64::from(blue) / 255.0);

    let x = r * 0.664511 + g * 0.154324 + b * 0.162028;
    let y = r * 0.283881 + g * 0.668433 + b * 0.047685;
    let z = r * 0.000088 + g * 0.072310 + b * 0.986039;

    let sum = x + y + z;
    if sum == 0.0 {
        return (0.0, 0.0);
    }

    (x / sum, y / sum)
}

fn gamma_correct(channel: f64) -> f64 {
    if channel > 0.04045 {
        ((channel + 0.055) / 1.055).powf(2.4)
    } else {
        channel / 12.92
    }
}
