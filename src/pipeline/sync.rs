use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use rayon::ThreadPool;

use super::{
    CaptureSource, GestureClassifier, HandDetector, MAX_TARGET_FPS, MIN_TARGET_FPS,
    build_worker_pool, frame_interval,
    metrics::{PerformanceMetrics, PipelineCounters, QueueSizes, ThroughputMeter},
    stages::{DecisionControl, DecisionSnapshot, DecisionStage, InferenceStage},
};
use crate::{
    actions::ActionDispatcher,
    calibration::CalibrationStats,
    config::AppConfig,
    error::{ConfigError, PipelineError},
    state_machine::IntentStateMachine,
    types::PipelineFrame,
};

/// Runs capture, inference and decision inline on the caller's thread, one
/// frame per `step`.
pub struct SyncEngine {
    config: AppConfig,
    capture: Box<dyn CaptureSource>,
    inference: InferenceStage,
    decision: DecisionStage,
    pool: ThreadPool,
    target_fps: f32,
    next_frame_id: u64,
    counters: PipelineCounters,
}

impl SyncEngine {
    pub fn new<C, H, G, D>(
        config: AppConfig,
        capture: C,
        detector: H,
        classifier: G,
        dispatcher: D,
        state_machine: IntentStateMachine,
    ) -> Result<Self, PipelineError>
    where
        C: CaptureSource,
        H: HandDetector,
        G: GestureClassifier,
        D: ActionDispatcher + 'static,
    {
        let pool = build_worker_pool(config.pipeline.max_workers)?;
        let inference = InferenceStage::new(Box::new(detector), Box::new(classifier), &config);
        let decision = DecisionStage::new(state_machine, Box::new(dispatcher), &config);
        Ok(Self {
            target_fps: (config.pipeline.target_fps as f32).clamp(MIN_TARGET_FPS, MAX_TARGET_FPS),
            config,
            capture: Box::new(capture),
            inference,
            decision,
            pool,
            next_frame_id: 0,
            counters: PipelineCounters::default(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Processes one frame. `None` when the source had no frame or a stage
    /// failed; failures are logged and the cycle is skipped.
    pub fn step(&mut self) -> Option<PipelineFrame> {
        let image = match self.capture.get_frame() {
            Ok(Some(image)) => image,
            Ok(None) => return None,
            Err(err) => {
                log::warn!("capture failed: {err:#}");
                return None;
            }
        };
        self.next_frame_id += 1;
        let mut frame = PipelineFrame::new(self.next_frame_id, Instant::now(), image);
        self.counters.frames_captured.fetch_add(1, Ordering::Relaxed);

        let result = self.inference.run(&mut frame, &self.pool);
        self.counters.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.counters.avg_inference_ms.store(self.inference.average_ms());
        if let Err(err) = result {
            log::warn!("inference failed for frame {}: {err:#}", frame.frame_id);
            return None;
        }

        self.decision.run(&mut frame);
        self.counters.avg_end_to_end_ms.store(self.decision.average_ms());
        Some(frame)
    }

    /// Steps at the target frame rate until `duration` elapses or `running`
    /// is cleared. `on_frame` sees every decided frame.
    pub fn run_for<F>(&mut self, duration: Duration, running: &AtomicBool, mut on_frame: F) -> u64
    where
        F: FnMut(&mut Self, PipelineFrame),
    {
        let started = Instant::now();
        let mut meter = ThroughputMeter::new(0, started);
        let mut last_tick = started;
        let mut decided = 0u64;

        while running.load(Ordering::Acquire) && started.elapsed() < duration {
            let cycle = Instant::now();
            if let Some(frame) = self.step() {
                decided += 1;
                on_frame(self, frame);
            }

            if last_tick.elapsed() >= Duration::from_secs(1) {
                last_tick = Instant::now();
                let processed = self.counters.frames_processed.load(Ordering::Relaxed);
                self.counters.fps_actual.store(meter.tick(processed, last_tick));
            }

            if let Some(rest) = frame_interval(self.target_fps).checked_sub(cycle.elapsed()) {
                thread::sleep(rest);
            }
        }
        decided
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        PerformanceMetrics::collect(&self.counters, true, self.target_fps, QueueSizes::default())
    }

    pub fn adjust_target_fps(&mut self, fps: f32) {
        let fps = if fps.is_nan() { MIN_TARGET_FPS } else { fps };
        self.target_fps = fps.clamp(MIN_TARGET_FPS, MAX_TARGET_FPS);
        log::info!("target fps set to {}", self.target_fps);
    }

    pub fn emergency_disable(&mut self) {
        self.decision.apply(DecisionControl::EmergencyDisable);
    }

    pub fn force_enable(&mut self) {
        self.decision.apply(DecisionControl::ForceEnable);
    }

    pub fn reset_stats(&mut self) {
        self.decision.apply(DecisionControl::ResetStats);
    }

    pub fn reset_filter(&mut self) {
        self.decision.apply(DecisionControl::ResetFilter);
    }

    pub fn reset_calibration(&mut self) {
        self.inference.reset_calibration();
    }

    pub fn reload_config(&mut self, config: AppConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.adjust_target_fps(config.pipeline.target_fps as f32);
        if config.pipeline.max_workers != self.config.pipeline.max_workers {
            match build_worker_pool(config.pipeline.max_workers) {
                Ok(pool) => self.pool = pool,
                Err(err) => log::warn!("keeping current worker pool: {err}"),
            }
        }
        self.inference
            .reconfigure(config.calibration.clone(), config.pipeline.classifier_input_size);
        self.decision.reconfigure(&config);
        self.config = config;
        log::info!("configuration reloaded");
        Ok(())
    }

    pub fn state_stats(&self) -> DecisionSnapshot {
        self.decision.snapshot()
    }

    pub fn calibration_stats(&self) -> Option<CalibrationStats> {
        self.inference.calibration_stats()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::VecDeque;

    use image::{Rgba, RgbaImage};
    use ndarray::Array4;

    use super::*;
    use crate::{
        actions::{ActionOutcome, ActionRequest, CallbackTable},
        pipeline::Detection,
        state_machine::MachineState,
        types::{BBox, HandDetection, RawPrediction},
    };

    /// Yields `frames` frames, then nothing.
    struct CountedCamera {
        frames: usize,
    }

    impl CaptureSource for CountedCamera {
        fn get_frame(&mut self) -> anyhow::Result<Option<RgbaImage>> {
            if self.frames == 0 {
                return Ok(None);
            }
            self.frames -= 1;
            Ok(Some(RgbaImage::from_pixel(120, 90, Rgba([10, 10, 10, 255]))))
        }
    }

    struct CenterHand;

    impl HandDetector for CenterHand {
        fn detect(&mut self, _frame: &RgbaImage) -> anyhow::Result<Detection> {
            Ok(Detection {
                hands: vec![HandDetection::new(BBox::new(30, 20, 50, 50), 0.8)],
                annotated: None,
            })
        }
    }

    /// Replays scripted labels, then "none".
    struct Scripted(VecDeque<&'static str>);

    impl GestureClassifier for Scripted {
        fn predict(&mut self, _input: &Array4<f32>) -> anyhow::Result<RawPrediction> {
            Ok(match self.0.pop_front() {
                Some(label) => RawPrediction::new(label, 0.9, true),
                None => RawPrediction::none(),
            })
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.pipeline.max_workers = 1;
        config.pipeline.target_fps = 60;
        config.pipeline.classifier_input_size = 16;
        config.smoothing.consecutive_frames = 3;
        config.smoothing.window_size = 5;
        config.state_machine.confirmation_time = 0.05;
        config
    }

    #[test]
    fn step_runs_every_stage_inline() {
        let mut engine = SyncEngine::new(
            config(),
            CountedCamera { frames: 1 },
            CenterHand,
            Scripted(VecDeque::from(["palm"])),
            CallbackTable::new(),
            IntentStateMachine::default(),
        )
        .unwrap();

        let frame = engine.step().unwrap();
        assert_eq!(frame.frame_id, 1);
        assert!(frame.roi.is_some());
        assert_eq!(frame.prediction.as_ref().unwrap().label, "palm");
        assert_eq!(frame.state, Some(MachineState::Idle));
        assert!(engine.step().is_none());
        assert_eq!(engine.performance_metrics().frames_processed, 1);
    }

    #[test]
    fn sustained_gesture_fires_its_action() {
        let mut table = CallbackTable::new();
        table.register("fist", |request: &ActionRequest| {
            Ok(ActionOutcome::executed("test", request.gesture.clone()))
        });
        let script = VecDeque::from(vec!["fist"; 30]);
        let mut engine = SyncEngine::new(
            config(),
            CountedCamera { frames: 40 },
            CenterHand,
            Scripted(script),
            table,
            IntentStateMachine::new(config().state_machine),
        )
        .unwrap();

        let running = AtomicBool::new(true);
        let mut executed = 0;
        let decided = engine.run_for(Duration::from_secs(2), &running, |_, frame| {
            if frame.action_result.as_ref().is_some_and(|outcome| outcome.executed) {
                executed += 1;
            }
        });

        assert_eq!(decided, 40);
        assert_eq!(executed, 1);
        assert_eq!(engine.state_stats().machine.counters.confirmed_gestures, 1);
        assert!(engine.calibration_stats().is_some());
    }

    #[test]
    fn reset_filter_empties_the_window() {
        let mut engine = SyncEngine::new(
            config(),
            CountedCamera { frames: 3 },
            CenterHand,
            Scripted(VecDeque::from(["palm", "palm", "palm"])),
            CallbackTable::new(),
            IntentStateMachine::default(),
        )
        .unwrap();
        while engine.step().is_some() {}
        assert_eq!(engine.state_stats().filter.window_len, 3);

        engine.reset_filter();
        let stats = engine.state_stats().filter;
        assert_eq!(stats.window_len, 0);
        assert!(stats.current_gesture.is_none());
    }

    #[test]
    fn cleared_flag_stops_the_loop() {
        let mut engine = SyncEngine::new(
            config(),
            CountedCamera { frames: 100 },
            CenterHand,
            Scripted(VecDeque::new()),
            CallbackTable::new(),
            IntentStateMachine::default(),
        )
        .unwrap();
        let running = AtomicBool::new(true);
        let decided = engine.run_for(Duration::from_secs(5), &running, |_, frame| {
            if frame.frame_id == 3 {
                running.store(false, Ordering::SeqCst);
            }
        });
        assert_eq!(decided, 3);
    }
}
