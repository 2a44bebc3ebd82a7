use std::time::{Duration, Instant};

use rayon::ThreadPool;

use super::{
    components::{GestureClassifier, HandDetector},
    metrics::LatencyWindow,
    preprocess::{clip_roi, prepare_roi},
};
use crate::{
    actions::ActionDispatcher,
    calibration::{AdaptiveRoiCalibrator, CalibrationStats},
    config::{AppConfig, CalibrationConfig},
    smoothing::{ConfirmationFilter, FilterStats},
    state_machine::{IntentStateMachine, MachineStats},
    types::{GestureEvent, PipelineFrame, RawPrediction},
};

/// Detection, ROI selection and classification for one frame.
pub struct InferenceStage {
    detector: Box<dyn HandDetector>,
    classifier: Box<dyn GestureClassifier>,
    calibrator: AdaptiveRoiCalibrator,
    input_size: u32,
    latency: LatencyWindow,
}

impl InferenceStage {
    pub fn new(
        detector: Box<dyn HandDetector>,
        classifier: Box<dyn GestureClassifier>,
        config: &AppConfig,
    ) -> Self {
        Self {
            detector,
            classifier,
            calibrator: AdaptiveRoiCalibrator::new(config.calibration.clone()),
            input_size: config.pipeline.classifier_input_size,
            latency: LatencyWindow::default(),
        }
    }

    pub fn reconfigure(&mut self, calibration: CalibrationConfig, input_size: u32) {
        self.calibrator.set_config(calibration);
        self.input_size = input_size;
    }

    pub fn calibration_stats(&self) -> Option<CalibrationStats> {
        self.calibrator.calibration_stats()
    }

    pub fn reset_calibration(&mut self) {
        self.calibrator.reset();
    }

    /// Average inference time over the recent window.
    pub fn average_ms(&self) -> f32 {
        self.latency.average_ms()
    }

    /// Attaches hands, ROI and prediction to `frame`. A frame without a hand
    /// keeps `prediction` empty; the decision stage reads that as "none".
    pub fn run(&mut self, frame: &mut PipelineFrame, pool: &ThreadPool) -> anyhow::Result<()> {
        let started = Instant::now();
        let detection = self.detector.detect(&frame.raw_frame)?;
        let primary = detection.primary().cloned();
        frame.processed_frame = detection.annotated;
        frame.hand_info = Some(detection.hands);

        if let Some(hand) = primary {
            let (frame_w, frame_h) = frame.raw_frame.dimensions();
            let roi = if self.calibrator.config().enabled {
                Some(self.calibrator.get_adaptive_roi(&hand.bbox, frame_w, frame_h))
            } else {
                let suggested = hand.region_of_interest.unwrap_or(hand.bbox);
                clip_roi(&suggested, frame_w, frame_h)
            };

            if let Some(roi) = roi {
                let size = self.input_size;
                let raw = &frame.raw_frame;
                let input = pool.install(|| prepare_roi(raw, &roi, size))?;
                frame.prediction = Some(self.classifier.predict(&input)?);
            }
            frame.roi = roi;
        }

        self.latency.push(started.elapsed());
        Ok(())
    }
}

/// Filter, state machine and action dispatch for one frame.
pub struct DecisionStage {
    filter: ConfirmationFilter,
    machine: IntentStateMachine,
    dispatcher: Box<dyn ActionDispatcher>,
    latency: LatencyWindow,
}

impl DecisionStage {
    pub fn new(
        machine: IntentStateMachine,
        dispatcher: Box<dyn ActionDispatcher>,
        config: &AppConfig,
    ) -> Self {
        Self {
            filter: ConfirmationFilter::new(config.smoothing.clone()),
            machine,
            dispatcher,
            latency: LatencyWindow::default(),
        }
    }

    /// Runs `frame` through the filter and the state machine and attaches
    /// the smoothed gesture, state and action outcome.
    pub fn run(&mut self, frame: &mut PipelineFrame) {
        let prediction = frame.prediction.clone().unwrap_or_else(RawPrediction::none);
        let smoothed = self.filter.process_at(&prediction, frame.timestamp);
        let event = GestureEvent::new(
            smoothed.gesture.clone(),
            smoothed.confidence,
            frame.timestamp,
            smoothed.is_stable,
        )
        .with_duration(self.filter.held_for(frame.timestamp));

        let step = self.machine.process(&event, self.dispatcher.as_mut());
        if let Some(transition) = step.transition {
            log::debug!(
                "frame {}: {:?} ({} {:.2})",
                frame.frame_id,
                transition,
                step.gesture,
                step.confidence
            );
        }

        frame.gesture = Some(smoothed);
        frame.state = Some(step.state);
        frame.action_result = step.action;
        self.latency.push(frame.timestamp.elapsed());
    }

    /// Average capture-to-decision latency over the recent window.
    pub fn average_ms(&self) -> f32 {
        self.latency.average_ms()
    }

    pub fn apply(&mut self, command: DecisionControl) {
        match command {
            DecisionControl::EmergencyDisable => self.machine.emergency_disable(),
            DecisionControl::ForceEnable => self.machine.force_enable(),
            DecisionControl::ResetFilter => self.filter.reset(),
            DecisionControl::ResetStats => self.machine.reset_stats(),
            DecisionControl::Reconfigure(config) => self.reconfigure(&config),
        }
    }

    pub fn reconfigure(&mut self, config: &AppConfig) {
        self.filter.set_config(config.smoothing.clone());
        self.machine.set_config(config.state_machine.clone());
        self.dispatcher.reconfigure(&config.actions);
    }

    pub fn snapshot(&self) -> DecisionSnapshot {
        DecisionSnapshot {
            machine: self.machine.stats(),
            filter: self.filter.stats(),
        }
    }

    pub fn machine(&self) -> &IntentStateMachine {
        &self.machine
    }
}

/// Commands applied by whichever unit owns the decision stage.
#[derive(Clone, Debug)]
pub enum DecisionControl {
    EmergencyDisable,
    ForceEnable,
    ResetFilter,
    ResetStats,
    Reconfigure(Box<AppConfig>),
}

#[derive(Clone, Debug)]
pub enum InferenceControl {
    Reconfigure(CalibrationConfig, u32),
    ResetCalibration,
}

impl InferenceStage {
    pub fn apply(&mut self, command: InferenceControl) {
        match command {
            InferenceControl::Reconfigure(calibration, size) => self.reconfigure(calibration, size),
            InferenceControl::ResetCalibration => self.reset_calibration(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct DecisionSnapshot {
    pub machine: MachineStats,
    pub filter: FilterStats,
}

/// Upper bound on how long a caller waits for a stats reply from a running unit.
pub const STATS_REPLY_TIMEOUT: Duration = Duration::from_millis(500);

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use image::{Rgba, RgbaImage};
    use ndarray::Array4;

    use super::*;
    use crate::{
        actions::{ActionOutcome, ActionRequest, CallbackTable},
        pipeline::components::Detection,
        state_machine::MachineState,
        types::{BBox, HandDetection},
    };

    struct FixedDetector(Option<BBox>);

    impl HandDetector for FixedDetector {
        fn detect(&mut self, _frame: &RgbaImage) -> anyhow::Result<Detection> {
            Ok(Detection {
                hands: self.0.iter().map(|bbox| HandDetection::new(*bbox, 0.9)).collect(),
                annotated: None,
            })
        }
    }

    struct FixedClassifier;

    impl GestureClassifier for FixedClassifier {
        fn predict(&mut self, input: &Array4<f32>) -> anyhow::Result<RawPrediction> {
            assert_eq!(input.shape()[1], 50);
            Ok(RawPrediction::new("palm", 0.95, true))
        }
    }

    fn pool() -> ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap()
    }

    fn frame(id: u64, timestamp: Instant) -> PipelineFrame {
        PipelineFrame::new(id, timestamp, RgbaImage::from_pixel(320, 240, Rgba([20, 20, 20, 255])))
    }

    #[test]
    fn inference_attaches_roi_and_prediction() {
        let config = AppConfig::default();
        let mut stage = InferenceStage::new(
            Box::new(FixedDetector(Some(BBox::new(100, 80, 80, 80)))),
            Box::new(FixedClassifier),
            &config,
        );
        let mut frame = frame(1, Instant::now());
        stage.run(&mut frame, &pool()).unwrap();

        let roi = frame.roi.unwrap();
        assert!(roi.fits_within(320, 240));
        assert_eq!(frame.hand_info.as_ref().map(Vec::len), Some(1));
        assert_eq!(frame.prediction.unwrap().label, "palm");
        assert_eq!(stage.calibration_stats().unwrap().sample_count, 1);
    }

    #[test]
    fn frame_without_hand_has_no_prediction() {
        let config = AppConfig::default();
        let mut stage =
            InferenceStage::new(Box::new(FixedDetector(None)), Box::new(FixedClassifier), &config);
        let mut frame = frame(1, Instant::now());
        stage.run(&mut frame, &pool()).unwrap();
        assert!(frame.roi.is_none());
        assert!(frame.prediction.is_none());
        assert_eq!(frame.hand_info.as_ref().map(Vec::len), Some(0));
    }

    #[test]
    fn decision_confirms_and_dispatches() {
        let mut config = AppConfig::default();
        config.state_machine.confirmation_time = 0.1;
        let mut callbacks = CallbackTable::new();
        callbacks.register("palm", |request: &ActionRequest| {
            Ok(ActionOutcome::executed("test", request.gesture.clone()))
        });
        let mut stage = DecisionStage::new(
            IntentStateMachine::new(config.state_machine.clone()),
            Box::new(callbacks),
            &config,
        );

        let start = Instant::now();
        let mut executed = false;
        for i in 0..12u64 {
            let mut frame = frame(i, start + Duration::from_millis(33 * i));
            frame.prediction = Some(RawPrediction::new("palm", 0.9, true));
            stage.run(&mut frame);
            executed |= frame.action_result.as_ref().is_some_and(|outcome| outcome.executed);
        }
        assert!(executed);
        assert_eq!(stage.machine().counters().confirmed_gestures, 1);

        stage.apply(DecisionControl::EmergencyDisable);
        assert_eq!(stage.machine().state(), MachineState::Disabled);
        stage.apply(DecisionControl::ForceEnable);
        assert_eq!(stage.machine().state(), MachineState::Idle);
    }
}
