use image::Rgb;

const CHANNEL_MAX: f64 = 255.0;
const EPSILON: f64 = 1e-5;

/// Saturation (percent) a pixel must exceed to count as a marker color.
pub const MIN_MARKER_SATURATION: f64 = 30.0;
/// Open hue interval, in degrees, treated as marker blue.
pub const BLUE_HUE: (f64, f64) = (200.0, 260.0);
/// Hues below this or above `360 - RED_HUE_MARGIN` are marker red.
pub const RED_HUE_MARGIN: f64 = 20.0;

/// Saturation (percent) under which the hue map prints a blank.
const HUE_MAP_MIN_SATURATION: f64 = 40.0;

/// A color in hue/saturation/value form.
///
/// `hue` is in degrees `[0, 360)`, `saturation` and `value` in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsv {
    pub hue: f64,
    pub saturation: f64,
    pub value: f64,
}

fn epsilon_equals(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}

impl Hsv {
    pub fn from_rgb(pixel: Rgb<u8>) -> Self {
        let [r, g, b] = pixel.0.map(|c| f64::from(c) / CHANNEL_MAX);
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;

        let hue = if epsilon_equals(max, min) {
            0.0
        } else if max == r {
            (60.0 * ((g - b) / delta) + 360.0) % 360.0
        } else if max == g {
            (60.0 * ((b - r) / delta) + 120.0) % 360.0
        } else {
            (60.0 * ((r - g) / delta) + 240.0) % 360.0
        };

        let saturation = if epsilon_equals(max, 0.0) {
            0.0
        } else {
            delta / max * 100.0
        };

        Self {
            hue,
            saturation,
            value: max * 100.0,
        }
    }

    /// Saturated red (wrapping across 0 degrees) or saturated blue.
    pub fn is_marker_color(&self) -> bool {
        if self.saturation <= MIN_MARKER_SATURATION {
            return false;
        }
        let blue = self.hue > BLUE_HUE.0 && self.hue < BLUE_HUE.1;
        let red = self.hue < RED_HUE_MARGIN || self.hue > 360.0 - RED_HUE_MARGIN;
        blue || red
    }

    /// Append this pixel's cell of the diagnostic hue map: a blank for
    /// washed-out pixels, otherwise the hue scaled by 10/256.
    pub fn push_hue_glyph(&self, row: &mut String) {
        if self.saturation < HUE_MAP_MIN_SATURATION {
            row.push(' ');
        } else {
            let bucket = (self.hue * 10.0 / 256.0) as u32;
            row.push_str(&bucket.to_string());
        }
    }
}
