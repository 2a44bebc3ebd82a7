//! Model-free stand-ins for the capture source, hand detector and gesture
//! classifier. They let the pipeline run end to end without a camera or
//! trained models: the synthetic camera draws a bright square "hand", the
//! detector finds bright pixels and the classifier reads the square's colour.

use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};
use ndarray::Array4;

use super::components::{CaptureSource, Detection, GestureClassifier, HandDetector};
use crate::types::{BBox, HandDetection, RawPrediction};

const BACKGROUND: Rgba<u8> = Rgba([24, 24, 28, 255]);
const PALM_COLOR: Rgba<u8> = Rgba([240, 240, 235, 255]);
const FIST_COLOR: Rgba<u8> = Rgba([250, 60, 60, 255]);
/// Luma above which a pixel counts as part of the hand.
const BRIGHTNESS_THRESHOLD: f32 = 100.0;

fn luma(r: f32, g: f32, b: f32) -> f32 {
    0.299 * r + 0.587 * g + 0.114 * b
}

/// Draws a hand square that cycles palm, fist, then nothing, each phase
/// lasting `phase` (two seconds by default).
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    hand_size: u32,
    phase: Duration,
    started: Instant,
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            hand_size: 80.min(width).min(height),
            phase: Duration::from_secs(2),
            started: Instant::now(),
        }
    }

    /// The frame shown `elapsed` after the camera started.
    pub fn frame_at(&self, elapsed: Duration) -> RgbaImage {
        let mut image = RgbaImage::from_pixel(self.width, self.height, BACKGROUND);
        let phase = (elapsed.as_nanos() / self.phase.as_nanos()) % 3;
        let color = match phase {
            0 => PALM_COLOR,
            1 => FIST_COLOR,
            _ => return image,
        };

        let sway = (elapsed.as_secs_f32() * 1.5).sin() * 30.0;
        let size = self.hand_size;
        let max_x = self.width.saturating_sub(size);
        let x0 = ((max_x as f32 / 2.0) + sway).clamp(0.0, max_x as f32) as u32;
        let y0 = self.height.saturating_sub(size) / 2;
        for y in y0..(y0 + size).min(self.height) {
            for x in x0..(x0 + size).min(self.width) {
                image.put_pixel(x, y, color);
            }
        }
        image
    }
}

impl CaptureSource for SyntheticCamera {
    fn get_frame(&mut self) -> anyhow::Result<Option<RgbaImage>> {
        Ok(Some(self.frame_at(self.started.elapsed())))
    }
}

/// Reports the bounding box of all bright pixels as a single hand.
#[derive(Debug, Clone)]
pub struct BrightnessDetector {
    min_pixels: usize,
}

impl Default for BrightnessDetector {
    fn default() -> Self {
        Self { min_pixels: 64 }
    }
}

impl BrightnessDetector {
    pub fn new(min_pixels: usize) -> Self {
        Self { min_pixels }
    }
}

impl HandDetector for BrightnessDetector {
    fn detect(&mut self, frame: &RgbaImage) -> anyhow::Result<Detection> {
        let mut count = 0usize;
        let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
        let (mut max_x, mut max_y) = (0u32, 0u32);
        for (x, y, px) in frame.enumerate_pixels() {
            let [r, g, b, _] = px.0;
            if luma(r as f32, g as f32, b as f32) > BRIGHTNESS_THRESHOLD {
                count += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }
        if count < self.min_pixels.max(1) {
            return Ok(Detection::none());
        }

        let width = max_x - min_x + 1;
        let height = max_y - min_y + 1;
        let bbox = BBox::new(
            i32::try_from(min_x)?,
            i32::try_from(min_y)?,
            i32::try_from(width)?,
            i32::try_from(height)?,
        );
        let fill = count as f32 / (width as f32 * height as f32);
        Ok(Detection {
            hands: vec![HandDetection::new(bbox, fill.clamp(0.0, 1.0))],
            annotated: None,
        })
    }
}

/// Labels a crop "palm" for a white hand and "fist" for a red one.
/// Confidence grows with the share of the crop the hand covers.
#[derive(Debug, Clone, Default)]
pub struct BrightnessClassifier;

impl GestureClassifier for BrightnessClassifier {
    fn predict(&mut self, input: &Array4<f32>) -> anyhow::Result<RawPrediction> {
        let data = input.as_standard_layout();
        let Some(values) = data.as_slice() else {
            return Ok(RawPrediction::none());
        };
        let mut total = 0usize;
        let mut bright = 0usize;
        let mut redness = 0.0f32;
        for px in values.chunks_exact(3) {
            total += 1;
            let (r, g, b) = (px[0], px[1], px[2]);
            if luma(r, g, b) * 255.0 > BRIGHTNESS_THRESHOLD {
                bright += 1;
                redness += r - (g + b) / 2.0;
            }
        }
        if bright == 0 {
            return Ok(RawPrediction::none());
        }

        let coverage = bright as f32 / total.max(1) as f32;
        let label = if redness / bright as f32 > 0.3 {
            "fist"
        } else {
            "palm"
        };
        let confidence = (0.6 + coverage).min(0.99);
        Ok(RawPrediction::new(label, confidence, confidence >= 0.7))
    }
}
