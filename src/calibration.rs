use std::collections::VecDeque;

use serde::Serialize;

use crate::{config::CalibrationConfig, types::BBox};

const MIN_DISTANCE_CM: f32 = 20.0;
const MAX_DISTANCE_CM: f32 = 150.0;
/// Distance at which padding is applied unscaled.
const PADDING_NEUTRAL_CM: f32 = 80.0;
/// Distance spread (cm) treated as fully unstable.
const DISTANCE_STABILITY_SPAN_CM: f32 = 20.0;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CalibrationStats {
    pub avg_distance_cm: f32,
    pub distance_stability: f32,
    pub avg_roi_size: f32,
    pub roi_stability: f32,
    pub sample_count: usize,
}

/// Estimates hand distance from bounding-box size and derives a smoothed,
/// padded capture region that always lies inside the frame.
#[derive(Debug)]
pub struct AdaptiveRoiCalibrator {
    config: CalibrationConfig,
    roi_history: VecDeque<BBox>,
    distance_history: VecDeque<f32>,
}

impl Default for AdaptiveRoiCalibrator {
    fn default() -> Self {
        Self::new(CalibrationConfig::default())
    }
}

impl AdaptiveRoiCalibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        let capacity = config.history_size.max(1);
        Self {
            config,
            roi_history: VecDeque::with_capacity(capacity),
            distance_history: VecDeque::with_capacity(capacity),
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: CalibrationConfig) {
        self.config = config;
        let capacity = self.capacity();
        truncate_front(&mut self.roi_history, capacity);
        truncate_front(&mut self.distance_history, capacity);
    }

    /// Distance in centimetres; larger hands are closer.
    pub fn estimate_distance(&self, bbox: &BBox) -> f32 {
        let hand_size = bbox.width.max(bbox.height);
        if hand_size <= 0 {
            return self.config.reference_distance;
        }
        let distance =
            self.config.reference_hand_width * self.config.reference_distance / hand_size as f32;
        distance.clamp(MIN_DISTANCE_CM, MAX_DISTANCE_CM)
    }

    /// Returns the capture region for `bbox` in a `frame_width` x `frame_height`
    /// frame and records it as a calibration sample.
    pub fn get_adaptive_roi(&mut self, bbox: &BBox, frame_width: u32, frame_height: u32) -> BBox {
        let frame_w = dimension(frame_width);
        let frame_h = dimension(frame_height);

        if bbox.is_empty() {
            let base = self.config.base_roi_size;
            let roi = BBox::new(
                bbox.x - base.width / 2,
                bbox.y - base.height / 2,
                base.width,
                base.height,
            );
            return self.fit_to_frame(roi, frame_w, frame_h);
        }

        let capacity = self.capacity();
        let raw_distance = self.estimate_distance(bbox);
        let distance = match self.distance_history.back() {
            Some(&previous) => {
                let alpha = self.config.distance_smoothing;
                alpha * raw_distance + (1.0 - alpha) * previous
            }
            None => raw_distance,
        };
        push_bounded(&mut self.distance_history, raw_distance, capacity);

        let (pad_x, pad_y) = self.padding(bbox, distance);
        let padded = BBox::new(
            bbox.x - pad_x,
            bbox.y - pad_y,
            bbox.width + 2 * pad_x,
            bbox.height + 2 * pad_y,
        );

        let smoothed = match self.roi_history.back() {
            Some(previous) => {
                let alpha = self.config.roi_smoothing;
                let blend = |new: i32, old: i32| {
                    (alpha * new as f32 + (1.0 - alpha) * old as f32).round() as i32
                };
                BBox::new(
                    blend(padded.x, previous.x),
                    blend(padded.y, previous.y),
                    blend(padded.width, previous.width),
                    blend(padded.height, previous.height),
                )
            }
            None => padded,
        };

        let roi = self.fit_to_frame(smoothed, frame_w, frame_h);
        push_bounded(&mut self.roi_history, roi, capacity);
        log::trace!("adaptive roi {roi:?} for hand {bbox:?} at {distance:.1}cm");
        roi
    }

    pub fn calibration_stats(&self) -> Option<CalibrationStats> {
        if self.distance_history.is_empty() || self.roi_history.is_empty() {
            return None;
        }

        let (avg_distance, distance_std) = mean_std(self.distance_history.iter().copied());
        let (avg_roi_size, roi_std) =
            mean_std(self.roi_history.iter().map(|roi| roi.area() as f32));
        let roi_stability = if avg_roi_size > 0.0 {
            (1.0 - roi_std / avg_roi_size).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Some(CalibrationStats {
            avg_distance_cm: avg_distance,
            distance_stability: 1.0 - (distance_std / DISTANCE_STABILITY_SPAN_CM).min(1.0),
            avg_roi_size,
            roi_stability,
            sample_count: self.roi_history.len(),
        })
    }

    pub fn reset(&mut self) {
        self.roi_history.clear();
        self.distance_history.clear();
        log::info!("roi calibration reset");
    }

    fn capacity(&self) -> usize {
        self.config.history_size.max(1)
    }

    fn padding(&self, bbox: &BBox, distance: f32) -> (i32, i32) {
        let factor = (PADDING_NEUTRAL_CM / distance).clamp(0.5, 2.0);
        let base_x = (bbox.width as f32 * self.config.padding_factor) as i32;
        let base_y = (bbox.height as f32 * self.config.padding_factor) as i32;
        (
            (base_x as f32 * factor) as i32,
            (base_y as f32 * factor) as i32,
        )
    }

    /// Clamps size into the configured range (bounded by the frame itself),
    /// re-centres when the size changed, then shifts the box inside the frame.
    fn fit_to_frame(&self, roi: BBox, frame_w: i32, frame_h: i32) -> BBox {
        let (x, width) = fit_axis(
            roi.x,
            roi.width,
            self.config.min_roi_size.width,
            self.config.max_roi_size.width,
            frame_w,
        );
        let (y, height) = fit_axis(
            roi.y,
            roi.height,
            self.config.min_roi_size.height,
            self.config.max_roi_size.height,
            frame_h,
        );
        BBox::new(x, y, width, height)
    }
}

fn fit_axis(start: i32, size: i32, min_size: i32, max_size: i32, frame: i32) -> (i32, i32) {
    let lower = min_size.min(frame);
    let upper = max_size.min(frame).max(lower);
    let clamped = size.clamp(lower, upper);

    let mut start = start;
    if clamped != size {
        let center = start + size / 2;
        start = center - clamped / 2;
    }
    (start.clamp(0, (frame - clamped).max(0)), clamped)
}

fn dimension(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn push_bounded<T>(history: &mut VecDeque<T>, value: T, capacity: usize) {
    while history.len() >= capacity {
        history.pop_front();
    }
    history.push_back(value);
}

fn truncate_front<T>(history: &mut VecDeque<T>, capacity: usize) {
    while history.len() > capacity {
        history.pop_front();
    }
}

fn mean_std(values: impl Iterator<Item = f32> + Clone) -> (f32, f32) {
    let count = values.clone().count().max(1) as f32;
    let mean = values.clone().sum::<f32>() / count;
    let variance = values.map(|v| (v - mean).powi(2)).sum::<f32>() / count;
    (mean, variance.sqrt())
}
