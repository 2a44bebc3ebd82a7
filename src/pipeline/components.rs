use image::RgbaImage;
use ndarray::Array4;

use crate::types::{HandDetection, RawPrediction};

/// Produces frames. `Ok(None)` means no frame is available right now.
pub trait CaptureSource: Send + 'static {
    fn get_frame(&mut self) -> anyhow::Result<Option<RgbaImage>>;
}

#[derive(Clone, Debug, Default)]
pub struct Detection {
    pub hands: Vec<HandDetection>,
    /// Frame with detector overlays drawn, when the detector produces one.
    pub annotated: Option<RgbaImage>,
}

impl Detection {
    pub fn none() -> Self {
        Self::default()
    }

    /// The highest-scoring hand.
    pub fn primary(&self) -> Option<&HandDetection> {
        self.hands
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

pub trait HandDetector: Send + 'static {
    fn detect(&mut self, frame: &RgbaImage) -> anyhow::Result<Detection>;
}

/// Classifies a `(1, size, size, 3)` tensor of RGB values in `[0, 1]`.
pub trait GestureClassifier: Send + 'static {
    fn predict(&mut self, input: &Array4<f32>) -> anyhow::Result<RawPrediction>;
}

impl<T: CaptureSource + ?Sized> CaptureSource for Box<T> {
    fn get_frame(&mut self) -> anyhow::Result<Option<RgbaImage>> {
        (**self).get_frame()
    }
}

impl<T: HandDetector + ?Sized> HandDetector for Box<T> {
    fn detect(&mut self, frame: &RgbaImage) -> anyhow::Result<Detection> {
        (**self).detect(frame)
    }
}

impl<T: GestureClassifier + ?Sized> GestureClassifier for Box<T> {
    fn predict(&mut self, input: &Array4<f32>) -> anyhow::Result<RawPrediction> {
        (**self).predict(input)
    }
}
