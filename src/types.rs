use std::time::{Duration, Instant};

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::{actions::ActionOutcome, smoothing::SmoothedGesture, state_machine::MachineState};

/// Label emitted when recent predictions do not agree.
pub const UNCERTAIN: &str = "uncertain";
/// Label used when no hand or no gesture is present.
pub const NO_GESTURE: &str = "none";

/// Whether a label names a real gesture rather than a placeholder.
pub fn is_gesture_label(label: &str) -> bool {
    !label.is_empty() && label != UNCERTAIN && label != NO_GESTURE
}

/// Axis-aligned pixel rectangle `(x, y, width, height)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BBox {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn area(&self) -> i64 {
        i64::from(self.width.max(0)) * i64::from(self.height.max(0))
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// True when the box lies entirely inside a `frame_width` x `frame_height` image.
    pub fn fits_within(&self, frame_width: u32, frame_height: u32) -> bool {
        self.x >= 0
            && self.y >= 0
            && i64::from(self.right()) <= i64::from(frame_width)
            && i64::from(self.bottom()) <= i64::from(frame_height)
    }
}

/// Raw per-frame output of the gesture classifier.
#[derive(Clone, Debug, PartialEq)]
pub struct RawPrediction {
    pub label: String,
    pub confidence: f32,
    pub is_confident: bool,
}

impl RawPrediction {
    pub fn new(label: impl Into<String>, confidence: f32, is_confident: bool) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            is_confident,
        }
    }

    /// Prediction used for frames where no hand was classified.
    pub fn none() -> Self {
        Self::new(NO_GESTURE, 0.0, false)
    }
}

/// A debounced gesture observation handed to the state machine.
#[derive(Clone, Debug, PartialEq)]
pub struct GestureEvent {
    pub gesture: String,
    pub confidence: f32,
    pub timestamp: Instant,
    pub is_stable: bool,
    pub duration: Duration,
}

impl GestureEvent {
    pub fn new(
        gesture: impl Into<String>,
        confidence: f32,
        timestamp: Instant,
        is_stable: bool,
    ) -> Self {
        Self {
            gesture: gesture.into(),
            confidence: confidence.clamp(0.0, 1.0),
            timestamp,
            is_stable,
            duration: Duration::ZERO,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// One hand reported by the external detector.
#[derive(Clone, Debug, PartialEq)]
pub struct HandDetection {
    pub bbox: BBox,
    /// Crop the detector itself suggests for classification, if any.
    pub region_of_interest: Option<BBox>,
    pub score: f32,
}

impl HandDetection {
    pub fn new(bbox: BBox, score: f32) -> Self {
        Self {
            bbox,
            region_of_interest: None,
            score,
        }
    }
}

/// A captured frame travelling through the pipeline. Each stage attaches its
/// output and hands the frame on; fields are never cleared downstream.
#[derive(Clone, Debug)]
pub struct PipelineFrame {
    pub frame_id: u64,
    pub timestamp: Instant,
    pub raw_frame: RgbaImage,
    pub processed_frame: Option<RgbaImage>,
    pub hand_info: Option<Vec<HandDetection>>,
    pub roi: Option<BBox>,
    pub prediction: Option<RawPrediction>,
    pub gesture: Option<SmoothedGesture>,
    pub state: Option<MachineState>,
    pub action_result: Option<ActionOutcome>,
}

impl PipelineFrame {
    pub fn new(frame_id: u64, timestamp: Instant, raw_frame: RgbaImage) -> Self {
        Self {
            frame_id,
            timestamp,
            raw_frame,
            processed_frame: None,
            hand_info: None,
            roi: None,
            prediction: None,
            gesture: None,
            state: None,
            action_result: None,
        }
    }

    pub fn display_text(&self) -> String {
        match &self.gesture {
            Some(gesture) => format!(
                "{} ({:.0}%){}",
                gesture.gesture,
                gesture.confidence * 100.0,
                if gesture.is_stable { " stable" } else { "" }
            ),
            None => "no hand".to_string(),
        }
    }
}
