pub mod hsv;
pub mod tiebreak;

use element_detector_common::config::DetectorConfig;
use element_detector_common::frame::{ElementPosition, Frame, FrameError};
use image::RgbImage;
use tracing::{debug, trace, Level};

use hsv::Hsv;
pub use tiebreak::{FixedTieBreak, RandomTieBreak, TieBreak};

/// Marker-color pixel counts for the two halves of a crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MarkerCounts {
    pub left: u32,
    pub right: u32,
}

/// Outcome of classifying one frame. The crop is kept for diagnostics.
#[derive(Debug, Clone)]
pub struct Classification {
    pub position: ElementPosition,
    pub counts: MarkerCounts,
    pub crop: RgbImage,
}

/// Fixed crop rectangle and threshold applied to every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classifier {
    left: u32,
    right: u32,
    top: u32,
    height: u32,
    threshold: u32,
}

impl Classifier {
    /// Crop `[left, right) x [top, top + height)`, counted against `threshold`.
    pub fn new(left: u32, right: u32, top: u32, height: u32, threshold: u32) -> Self {
        Self {
            left,
            right,
            top,
            height,
            threshold,
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(
            config.left,
            config.right,
            config.crop_top,
            config.crop_height,
            config.threshold,
        )
    }

    /// Column, in crop coordinates, where the right half starts.
    ///
    /// This is the midpoint of the *frame* bounds, `(left + right) / 2`,
    /// compared against crop-relative columns. With a non-zero `left` the
    /// halves are therefore uneven.
    pub fn split_column(&self) -> u32 {
        (self.left + self.right) / 2
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn classify(
        &self,
        frame: &Frame,
        tie: &mut dyn TieBreak,
    ) -> Result<Classification, FrameError> {
        let width = self.right.saturating_sub(self.left);
        let crop = frame.crop(self.left, self.top, width, self.height)?;
        let counts = count_markers(&crop, self.split_column());
        let position = decide(counts, self.threshold, tie);
        debug!(
            seq = frame.seq,
            left_count = counts.left,
            right_count = counts.right,
            threshold = self.threshold,
            %position,
            "frame classified"
        );
        Ok(Classification {
            position,
            counts,
            crop,
        })
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::from_config(&DetectorConfig::default())
    }
}

/// Classify `frame` over columns `[left, right)` with the default band and
/// threshold.
pub fn classify(
    frame: &Frame,
    left: u32,
    right: u32,
    tie: &mut dyn TieBreak,
) -> Result<ElementPosition, FrameError> {
    let classifier = Classifier::from_config(&DetectorConfig::with_bounds(left, right));
    classifier.classify(frame, tie).map(|c| c.position)
}

/// Count marker-color pixels, splitting at crop column `split`.
pub fn count_markers(crop: &RgbImage, split: u32) -> MarkerCounts {
    let hue_map = tracing::enabled!(Level::TRACE);
    let mut counts = MarkerCounts::default();

    for (y, row) in crop.rows().enumerate() {
        let mut glyphs = String::new();
        for (x, pixel) in row.enumerate() {
            let hsv = Hsv::from_rgb(*pixel);
            if hue_map {
                hsv.push_hue_glyph(&mut glyphs);
            }
            if hsv.is_marker_color() {
                if (x as u32) < split {
                    counts.left += 1;
                } else {
                    counts.right += 1;
                }
            }
        }
        if hue_map {
            trace!(row = y, map = %glyphs, "hue map");
        }
    }
    counts
}

/// Turn marker counts into a position.
///
/// Many markers on one half means the element is on the *other* side: the
/// element covers its marker, so the uncovered half is the one that lights
/// up. Both halves lit means no element; neither lit falls to `tie`.
pub fn decide(counts: MarkerCounts, threshold: u32, tie: &mut dyn TieBreak) -> ElementPosition {
    let left_lit = counts.left > threshold;
    let right_lit = counts.right > threshold;
    match (left_lit, right_lit) {
        (true, true) => ElementPosition::None,
        (true, false) => ElementPosition::Right,
        (false, true) => ElementPosition::Left,
        (false, false) => tie.pick(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const RED: Rgb<u8> = Rgb([220, 20, 30]);
    const BLUE: Rgb<u8> = Rgb([20, 40, 220]);
    const FLOOR: Rgb<u8> = Rgb([90, 90, 90]);

    /// 640x480 grey frame with `left` red pixels painted into the left half of
    /// the default band and `right` blue pixels into the right half.
    fn frame_with_markers(left: u32, right: u32) -> Frame {
        let mut image = RgbImage::from_pixel(640, 480, FLOOR);
        paint(&mut image, 0, left, RED);
        paint(&mut image, 320, right, BLUE);
        Frame::new(image, 0, 1)
    }

    /// Paint `count` pixels row by row inside the 320-wide half starting at
    /// column `x0`, within rows 120..360.
    fn paint(image: &mut RgbImage, x0: u32, count: u32, color: Rgb<u8>) {
        for i in 0..count {
            let x = x0 + i % 320;
            let y = 120 + i / 320;
            image.put_pixel(x, y, color);
        }
    }

    fn decide_with(left: u32, right: u32) -> ElementPosition {
        decide(
            MarkerCounts { left, right },
            500,
            &mut FixedTieBreak(ElementPosition::Left),
        )
    }

    #[test]
    fn decision_table() {
        assert_eq!(decide_with(600, 600), ElementPosition::None);
        assert_eq!(decide_with(600, 100), ElementPosition::Right);
        assert_eq!(decide_with(100, 600), ElementPosition::Left);
        assert_eq!(decide_with(0, 0), ElementPosition::Left);
    }

    #[test]
    fn threshold_is_strict() {
        let mut right = FixedTieBreak(ElementPosition::Right);
        let at = MarkerCounts { left: 500, right: 500 };
        assert_eq!(decide(at, 500, &mut right), ElementPosition::Right);
        let over = MarkerCounts { left: 501, right: 500 };
        assert_eq!(decide(over, 500, &mut right), ElementPosition::Right);
        let over = MarkerCounts { left: 500, right: 501 };
        assert_eq!(decide(over, 500, &mut right), ElementPosition::Left);
    }

    #[test]
    fn at_threshold_tie_break_is_fair() {
        let mut coin = RandomTieBreak::seeded(42);
        let at = MarkerCounts { left: 500, right: 500 };
        let left = (0..2_000)
            .filter(|_| decide(at, 500, &mut coin) == ElementPosition::Left)
            .count();
        assert!((850..=1_150).contains(&left), "left picked {left} times");
    }

    #[test]
    fn counts_split_at_midpoint() {
        let frame = frame_with_markers(600, 100);
        let classifier = Classifier::default();
        let mut tie = FixedTieBreak(ElementPosition::None);
        let result = classifier.classify(&frame, &mut tie).unwrap();

        assert_eq!(result.counts, MarkerCounts { left: 600, right: 100 });
        assert_eq!(result.position, ElementPosition::Right);
        assert_eq!(result.crop.dimensions(), (640, 240));
    }

    #[test]
    fn classify_whole_frames() {
        let mut tie = FixedTieBreak(ElementPosition::None);
        let both = frame_with_markers(600, 600);
        assert_eq!(classify(&both, 0, 640, &mut tie).unwrap(), ElementPosition::None);
        let right_only = frame_with_markers(100, 600);
        assert_eq!(classify(&right_only, 0, 640, &mut tie).unwrap(), ElementPosition::Left);
    }

    #[test]
    fn pixels_outside_the_band_are_ignored() {
        let mut image = RgbImage::from_pixel(640, 480, FLOOR);
        for y in (0..120).chain(360..480) {
            for x in 0..640 {
                image.put_pixel(x, y, RED);
            }
        }
        let frame = Frame::new(image, 0, 1);
        let result = Classifier::default()
            .classify(&frame, &mut FixedTieBreak(ElementPosition::Left))
            .unwrap();
        assert_eq!(result.counts, MarkerCounts::default());
        assert_eq!(result.position, ElementPosition::Left);
    }

    #[test]
    fn split_uses_frame_midpoint_against_crop_columns() {
        // Bounds [200, 440): split = 320, but the crop is only 240 wide, so
        // every crop column counts towards the left half.
        let classifier = Classifier::new(200, 440, 120, 240, 500);
        assert_eq!(classifier.split_column(), 320);

        let image = RgbImage::from_pixel(640, 480, RED);
        let frame = Frame::new(image, 0, 1);
        let result = classifier
            .classify(&frame, &mut FixedTieBreak(ElementPosition::Left))
            .unwrap();
        assert_eq!(result.counts, MarkerCounts { left: 240 * 240, right: 0 });
        assert_eq!(result.position, ElementPosition::Right);
    }

    #[test]
    fn crop_larger_than_frame_is_an_error() {
        let frame = Frame::new(RgbImage::new(320, 240), 0, 1);
        let mut tie = FixedTieBreak(ElementPosition::Left);
        assert!(Classifier::default().classify(&frame, &mut tie).is_err());
    }
}
