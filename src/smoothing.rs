use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use serde::Serialize;

use crate::{
    config::SmoothingConfig,
    types::{NO_GESTURE, RawPrediction, UNCERTAIN, is_gesture_label},
};

/// Output of one filter step.
#[derive(Clone, Debug, PartialEq)]
pub struct SmoothedGesture {
    /// Debounced label handed downstream.
    pub gesture: String,
    pub confidence: f32,
    pub is_stable: bool,
    pub raw_gesture: String,
    /// Label from the consecutive-agreement check, before debouncing.
    pub confirmed_gesture: String,
    pub consecutive_count: usize,
    pub debounce_remaining: Duration,
    pub window_len: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FilterStats {
    pub window_len: usize,
    pub current_gesture: Option<String>,
    /// Seconds since the current gesture was accepted.
    pub gesture_duration: f32,
    /// Seconds since the last accepted change, if any.
    pub time_since_last: Option<f32>,
    pub debounce_active: bool,
}

#[derive(Clone, Debug)]
struct Sample {
    label: String,
    is_confident: bool,
}

/// Turns per-frame predictions into a debounced gesture signal. A label is
/// only confirmed once the last `consecutive_frames` predictions are all
/// confident and identical.
#[derive(Debug)]
pub struct ConfirmationFilter {
    config: SmoothingConfig,
    window: VecDeque<Sample>,
    current_gesture: Option<String>,
    last_change: Option<Instant>,
}

impl Default for ConfirmationFilter {
    fn default() -> Self {
        Self::new(SmoothingConfig::default())
    }
}

impl ConfirmationFilter {
    pub fn new(config: SmoothingConfig) -> Self {
        let mut filter = Self {
            config,
            window: VecDeque::new(),
            current_gesture: None,
            last_change: None,
        };
        filter.window.reserve(filter.capacity());
        filter
    }

    pub fn config(&self) -> &SmoothingConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SmoothingConfig) {
        self.config = config;
        let capacity = self.capacity();
        while self.window.len() > capacity {
            self.window.pop_front();
        }
    }

    pub fn process(&mut self, prediction: &RawPrediction) -> SmoothedGesture {
        self.process_at(prediction, Instant::now())
    }

    pub fn process_at(&mut self, prediction: &RawPrediction, now: Instant) -> SmoothedGesture {
        if self.window.len() >= self.capacity() {
            self.window.pop_front();
        }
        self.window.push_back(Sample {
            label: prediction.label.clone(),
            is_confident: prediction.is_confident,
        });

        let confirmed = self.confirmed_label().to_string();
        let gesture = self.debounce(&confirmed, now);
        let is_stable = is_gesture_label(&gesture)
            && self.consecutive_count(&gesture) >= self.config.consecutive_frames;

        SmoothedGesture {
            is_stable,
            confidence: prediction.confidence,
            raw_gesture: prediction.label.clone(),
            confirmed_gesture: confirmed,
            consecutive_count: self.consecutive_count(&prediction.label),
            debounce_remaining: self.debounce_remaining(now),
            window_len: self.window.len(),
            gesture,
        }
    }

    /// How long the currently accepted gesture has been held.
    pub fn held_for(&self, now: Instant) -> Duration {
        self.last_change
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }

    pub fn current_gesture(&self) -> Option<&str> {
        self.current_gesture.as_deref()
    }

    pub fn stats(&self) -> FilterStats {
        self.stats_at(Instant::now())
    }

    pub fn stats_at(&self, now: Instant) -> FilterStats {
        let since_last = self
            .last_change
            .map(|change| now.saturating_duration_since(change));
        FilterStats {
            window_len: self.window.len(),
            current_gesture: self.current_gesture.clone(),
            gesture_duration: self.held_for(now).as_secs_f32(),
            time_since_last: since_last.map(|d| d.as_secs_f32()),
            debounce_active: since_last.is_some_and(|d| d < self.config.debounce_duration()),
        }
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.current_gesture = None;
        self.last_change = None;
        log::debug!("confirmation filter reset");
    }

    fn capacity(&self) -> usize {
        self.config
            .window_size
            .max(self.config.consecutive_frames)
            .max(1)
    }

    fn confirmed_label(&self) -> &str {
        let needed = self.config.consecutive_frames.max(1);
        if self.window.len() < needed {
            return UNCERTAIN;
        }

        let mut recent = self.window.iter().rev().take(needed);
        let Some(first) = recent.next() else {
            return UNCERTAIN;
        };
        if !first.is_confident || !is_gesture_label(&first.label) {
            return UNCERTAIN;
        }
        if recent.all(|sample| sample.is_confident && sample.label == first.label) {
            &first.label
        } else {
            UNCERTAIN
        }
    }

    fn consecutive_count(&self, label: &str) -> usize {
        self.window
            .iter()
            .rev()
            .take_while(|sample| sample.is_confident && sample.label == label)
            .count()
    }

    fn debounce(&mut self, candidate: &str, now: Instant) -> String {
        if self.current_gesture.as_deref() == Some(candidate) {
            return candidate.to_string();
        }

        if self.debounce_remaining(now) > Duration::ZERO {
            return self
                .current_gesture
                .clone()
                .unwrap_or_else(|| NO_GESTURE.to_string());
        }

        if is_gesture_label(candidate) {
            log::debug!("new gesture accepted: {candidate}");
            self.current_gesture = Some(candidate.to_string());
            self.last_change = Some(now);
        }
        candidate.to_string()
    }

    fn debounce_remaining(&self, now: Instant) -> Duration {
        match self.last_change {
            Some(change) => self
                .config
                .debounce_duration()
                .saturating_sub(now.saturating_duration_since(change)),
            None => Duration::ZERO,
        }
    }
}
