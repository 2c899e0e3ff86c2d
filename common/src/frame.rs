use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One captured camera frame: an RGB raster plus capture metadata.
///
/// A frame is never mutated after capture. Ownership moves from the camera's
/// delivery callback into the frame buffer, and from there to exactly one
/// consumer; dropping it releases the pixel memory.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    pub fn new(image: RgbImage, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            image,
            captured_at_ms,
            seq,
        }
    }

    /// Wrap an image captured right now.
    pub fn now(image: RgbImage, seq: u64) -> Self {
        Self::new(image, chrono::Utc::now().timestamp_millis(), seq)
    }

    /// Build a frame from packed `[R, G, B, R, G, B, ...]` bytes.
    pub fn from_rgb(
        width: u32,
        height: u32,
        data: Vec<u8>,
        captured_at_ms: i64,
        seq: u64,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        let got = data.len();
        let image = RgbImage::from_raw(width, height, data)
            .ok_or(FrameError::BadLength { got, expected })?;
        Ok(Self::new(image, captured_at_ms, seq))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Copy out the rectangle `[left, left + width) x [top, top + height)`.
    pub fn crop(&self, left: u32, top: u32, width: u32, height: u32) -> Result<RgbImage, FrameError> {
        let fits_x = left.checked_add(width).is_some_and(|r| r <= self.width());
        let fits_y = top.checked_add(height).is_some_and(|b| b <= self.height());
        if width == 0 || height == 0 || !fits_x || !fits_y {
            return Err(FrameError::CropOutOfBounds {
                left,
                top,
                width,
                height,
                frame_width: self.width(),
                frame_height: self.height(),
            });
        }
        Ok(imageops::crop_imm(&self.image, left, top, width, height).to_image())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("raw RGB buffer has {got} bytes, expected {expected}")]
    BadLength { got: usize, expected: usize },
    #[error(
        "crop {width}x{height} at ({left}, {top}) does not fit a {frame_width}x{frame_height} frame"
    )]
    CropOutOfBounds {
        left: u32,
        top: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    },
}

/// Where the game element was judged to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementPosition {
    Left,
    Right,
    #[default]
    None,
}

impl ElementPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementPosition::Left => "LEFT",
            ElementPosition::Right => "RIGHT",
            ElementPosition::None => "NONE",
        }
    }
}

impl fmt::Display for ElementPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementPosition {
    type Err = UnknownPosition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Ok(ElementPosition::Left),
            "right" => Ok(ElementPosition::Right),
            "none" => Ok(ElementPosition::None),
            _ => Err(UnknownPosition(s.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown element position {0:?}, expected left, right or none")]
pub struct UnknownPosition(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn from_rgb_checks_length() {
        let ok = Frame::from_rgb(2, 2, vec![0; 12], 0, 1).unwrap();
        assert_eq!((ok.width(), ok.height()), (2, 2));

        let err = Frame::from_rgb(2, 2, vec![0; 11], 0, 1).unwrap_err();
        assert!(matches!(err, FrameError::BadLength { got: 11, expected: 12 }));
    }

    #[test]
    fn crop_copies_the_requested_rectangle() {
        let image = RgbImage::from_fn(8, 6, |x, y| Rgb([x as u8, y as u8, 0]));
        let frame = Frame::new(image, 1708300000000, 3);

        let crop = frame.crop(2, 1, 4, 3).unwrap();
        assert_eq!(crop.dimensions(), (4, 3));
        assert_eq!(crop.get_pixel(0, 0), &Rgb([2, 1, 0]));
        assert_eq!(crop.get_pixel(3, 2), &Rgb([5, 3, 0]));
    }

    #[test]
    fn crop_rejects_out_of_bounds() {
        let frame = Frame::new(RgbImage::new(8, 6), 0, 0);
        assert!(frame.crop(4, 0, 5, 2).is_err());
        assert!(frame.crop(0, 5, 2, 2).is_err());
        assert!(frame.crop(0, 0, 0, 2).is_err());
        assert!(frame.crop(u32::MAX, 0, 2, 2).is_err());
    }

    #[test]
    fn position_display_and_parse() {
        assert_eq!(ElementPosition::default(), ElementPosition::None);
        assert_eq!(ElementPosition::Left.to_string(), "LEFT");
        assert_eq!("RIGHT".parse::<ElementPosition>().unwrap(), ElementPosition::Right);
        assert_eq!("none".parse::<ElementPosition>().unwrap(), ElementPosition::None);
        assert!("middle".parse::<ElementPosition>().is_err());
    }
}
