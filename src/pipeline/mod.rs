#[cfg(feature = "camera-nokhwa")]
pub mod camera;
pub mod components;
pub mod metrics;
pub mod placeholder;
pub mod preprocess;
pub mod stages;
pub mod sync;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{
    Receiver, RecvTimeoutError, Sender, TrySendError, bounded, select, tick, unbounded,
};
use rayon::{ThreadPool, ThreadPoolBuilder};

pub use components::{CaptureSource, Detection, GestureClassifier, HandDetector};
pub use metrics::{PerformanceMetrics, QueueSizes};
pub use stages::{
    DecisionControl, DecisionSnapshot, DecisionStage, InferenceControl, InferenceStage,
};
pub use sync::SyncEngine;

use self::{
    metrics::{AtomicF32, PipelineCounters, ThroughputMeter},
    stages::STATS_REPLY_TIMEOUT,
};
use crate::{
    actions::ActionDispatcher,
    calibration::CalibrationStats,
    config::AppConfig,
    error::{ConfigError, PipelineError},
    state_machine::IntentStateMachine,
    types::PipelineFrame,
};

/// How long a consuming unit waits on its input before rechecking the
/// running flag.
const IDLE_WAIT: Duration = Duration::from_millis(100);
/// Pause after the capture source returns no frame or an error.
const NO_FRAME_BACKOFF: Duration = Duration::from_millis(10);
const METRICS_INTERVAL: Duration = Duration::from_secs(1);
pub const MIN_TARGET_FPS: f32 = 1.0;
pub const MAX_TARGET_FPS: f32 = 60.0;

pub(crate) fn frame_interval(fps: f32) -> Duration {
    Duration::from_secs_f32(1.0 / fps.clamp(MIN_TARGET_FPS, MAX_TARGET_FPS))
}

pub(crate) fn build_worker_pool(max_workers: usize) -> Result<ThreadPool, PipelineError> {
    ThreadPoolBuilder::new()
        .num_threads(max_workers.max(1))
        .thread_name(|i| format!("gesture-worker-{i}"))
        .build()
        .map_err(|err| PipelineError::WorkerPool(err.to_string()))
}

#[derive(Debug)]
struct Shared {
    running: AtomicBool,
    target_fps: AtomicF32,
    counters: PipelineCounters,
}

/// What a unit hands back when it exits, so a stopped pipeline can start
/// again with the same components.
enum UnitOutput {
    Capture(Box<dyn CaptureSource>),
    Inference(InferenceStage),
    Decision(DecisionStage),
    Metrics,
}

struct Worker {
    name: &'static str,
    handle: JoinHandle<UnitOutput>,
    /// Disconnects when the unit's thread exits.
    done: Receiver<()>,
}

enum InferenceMessage {
    Control(InferenceControl),
    Pool(Arc<ThreadPool>),
    Stats(Sender<Option<CalibrationStats>>),
}

enum DecisionMessage {
    Control(DecisionControl),
    Stats(Sender<DecisionSnapshot>),
}

/// Handles that exist only while the units are running.
struct RunningUnits {
    workers: Vec<Worker>,
    capture_queue: Receiver<PipelineFrame>,
    inference_queue: Receiver<PipelineFrame>,
    ui_queue: Receiver<PipelineFrame>,
    inference_ctl: Sender<InferenceMessage>,
    decision_ctl: Sender<DecisionMessage>,
    /// Dropped on stop to wake every unit blocked on it.
    shutdown: Sender<()>,
}

/// Four-unit pipeline: capture, inference, decision and metrics, each on its
/// own thread and connected by bounded queues.
pub struct GesturePipeline {
    config: AppConfig,
    shared: Arc<Shared>,
    capture: Option<Box<dyn CaptureSource>>,
    inference: Option<InferenceStage>,
    decision: Option<DecisionStage>,
    units: Option<RunningUnits>,
}

impl GesturePipeline {
    pub fn new(config: AppConfig) -> Self {
        let target_fps = (config.pipeline.target_fps as f32).clamp(MIN_TARGET_FPS, MAX_TARGET_FPS);
        Self {
            config,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                target_fps: AtomicF32::new(target_fps),
                counters: PipelineCounters::default(),
            }),
            capture: None,
            inference: None,
            decision: None,
            units: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn inject_components<C, H, G, D>(
        &mut self,
        capture: C,
        detector: H,
        classifier: G,
        dispatcher: D,
        state_machine: IntentStateMachine,
    ) -> Result<(), PipelineError>
    where
        C: CaptureSource,
        H: HandDetector,
        G: GestureClassifier,
        D: ActionDispatcher + 'static,
    {
        if self.is_running() {
            return Err(PipelineError::AlreadyRunning);
        }
        self.capture = Some(Box::new(capture));
        self.inference = Some(InferenceStage::new(
            Box::new(detector),
            Box::new(classifier),
            &self.config,
        ));
        self.decision = Some(DecisionStage::new(
            state_machine,
            Box::new(dispatcher),
            &self.config,
        ));
        log::info!("pipeline components injected");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.units.is_some()
    }

    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.is_running() {
            log::warn!("pipeline already running");
            return Ok(());
        }
        if self.capture.is_none() {
            return Err(PipelineError::MissingComponent("capture source"));
        }
        if self.inference.is_none() {
            return Err(PipelineError::MissingComponent("detector and classifier"));
        }
        if self.decision.is_none() {
            return Err(PipelineError::MissingComponent("state machine and action dispatcher"));
        }

        let pool = Arc::new(build_worker_pool(self.config.pipeline.max_workers)?);
        let (Some(capture), Some(inference), Some(decision)) =
            (self.capture.take(), self.inference.take(), self.decision.take())
        else {
            return Err(PipelineError::MissingComponent("pipeline stage"));
        };

        let capacity = self.config.pipeline.max_queue_size.max(1);
        let (capture_tx, capture_rx) = bounded(capacity);
        let (inference_tx, inference_rx) = bounded(capacity);
        let (ui_tx, ui_rx) = bounded(capacity);
        let (inference_ctl, inference_ctl_rx) = unbounded();
        let (decision_ctl, decision_ctl_rx) = unbounded();
        let (shutdown, shutdown_rx) = bounded::<()>(0);

        self.shared.counters.reset();
        self.shared.running.store(true, Ordering::SeqCst);

        let mut workers = Vec::with_capacity(4);
        let spawned = (|| {
            let shared = self.shared.clone();
            let shutdown = shutdown_rx.clone();
            workers.push(spawn_unit("gesture-capture", move || {
                capture_unit(capture, &shared, &capture_tx, &shutdown)
            })?);

            let shared = self.shared.clone();
            let (input, shutdown) = (capture_rx.clone(), shutdown_rx.clone());
            workers.push(spawn_unit("gesture-inference", move || {
                let queues = UnitQueues {
                    input: &input,
                    control: &inference_ctl_rx,
                    shutdown: &shutdown,
                };
                inference_unit(inference, pool, &shared, queues, &inference_tx)
            })?);

            let shared = self.shared.clone();
            let (input, shutdown) = (inference_rx.clone(), shutdown_rx.clone());
            let ui_evict = ui_rx.clone();
            workers.push(spawn_unit("gesture-decision", move || {
                let queues = UnitQueues {
                    input: &input,
                    control: &decision_ctl_rx,
                    shutdown: &shutdown,
                };
                decision_unit(decision, &shared, queues, &ui_tx, &ui_evict)
            })?);

            let shared = self.shared.clone();
            let shutdown = shutdown_rx.clone();
            workers.push(spawn_unit("gesture-metrics", move || {
                metrics_unit(&shared, &shutdown)
            })?);
            Ok::<(), PipelineError>(())
        })();
        drop(shutdown_rx);

        let units = RunningUnits {
            workers,
            capture_queue: capture_rx,
            inference_queue: inference_rx,
            ui_queue: ui_rx,
            inference_ctl,
            decision_ctl,
            shutdown,
        };
        if let Err(err) = spawned {
            log::error!("failed to start pipeline: {err}");
            self.shutdown_units(units);
            return Err(err);
        }

        self.units = Some(units);
        log::info!(
            "pipeline started: queue={capacity} workers={} fps={}",
            self.config.pipeline.max_workers,
            self.shared.target_fps.load()
        );
        Ok(())
    }

    /// Stops every unit and waits up to the configured join timeout for
    /// each. Calling it on a stopped pipeline does nothing.
    pub fn stop(&mut self) {
        let Some(units) = self.units.take() else {
            return;
        };
        self.shutdown_units(units);
        log::info!("pipeline stopped");
    }

    fn shutdown_units(&mut self, units: RunningUnits) {
        self.shared.running.store(false, Ordering::SeqCst);
        let RunningUnits {
            workers, shutdown, ..
        } = units;
        drop(shutdown);

        let timeout = self.config.pipeline.join_timeout_duration();
        for worker in workers {
            if let Err(RecvTimeoutError::Timeout) = worker.done.recv_timeout(timeout) {
                log::warn!(
                    "{} did not stop within {timeout:?}; detaching it",
                    worker.name
                );
                continue;
            }
            match worker.handle.join() {
                Ok(UnitOutput::Capture(capture)) => self.capture = Some(capture),
                Ok(UnitOutput::Inference(stage)) => self.inference = Some(stage),
                Ok(UnitOutput::Decision(stage)) => self.decision = Some(stage),
                Ok(UnitOutput::Metrics) => {}
                Err(_) => log::error!("{} panicked", worker.name),
            }
        }
    }

    /// Most recent decided frame; older queued frames are discarded.
    pub fn latest_frame(&self) -> Option<PipelineFrame> {
        self.units.as_ref()?.ui_queue.try_iter().last()
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        let queue_sizes = self
            .units
            .as_ref()
            .map(|units| QueueSizes {
                capture: units.capture_queue.len(),
                inference: units.inference_queue.len(),
                ui: units.ui_queue.len(),
            })
            .unwrap_or_default();
        PerformanceMetrics::collect(
            &self.shared.counters,
            self.is_running(),
            self.shared.target_fps.load(),
            queue_sizes,
        )
    }

    /// Sets the capture rate, clamped to 1..=60 fps. Takes effect on the
    /// next capture cycle.
    pub fn adjust_target_fps(&self, fps: f32) {
        let fps = if fps.is_nan() { MIN_TARGET_FPS } else { fps };
        let clamped = fps.clamp(MIN_TARGET_FPS, MAX_TARGET_FPS);
        self.shared.target_fps.store(clamped);
        log::info!("target fps set to {clamped}");
    }

    pub fn target_fps(&self) -> f32 {
        self.shared.target_fps.load()
    }

    /// Discards every frame waiting in the pipeline queues.
    pub fn clear_queues(&self) {
        let Some(units) = self.units.as_ref() else {
            return;
        };
        let cleared = units.capture_queue.try_iter().count()
            + units.inference_queue.try_iter().count()
            + units.ui_queue.try_iter().count();
        log::info!("cleared {cleared} queued frames");
    }

    pub fn emergency_disable(&mut self) {
        self.send_decision(DecisionControl::EmergencyDisable);
    }

    pub fn force_enable(&mut self) {
        self.send_decision(DecisionControl::ForceEnable);
    }

    pub fn reset_stats(&mut self) {
        self.send_decision(DecisionControl::ResetStats);
    }

    /// Empties the confirmation window so the next gesture starts fresh.
    pub fn reset_filter(&mut self) {
        self.send_decision(DecisionControl::ResetFilter);
    }

    pub fn reset_calibration(&mut self) {
        self.send_inference(InferenceMessage::Control(InferenceControl::ResetCalibration));
    }

    /// Applies a new configuration to the running units. Queue capacity only
    /// changes on the next `start()`.
    pub fn reload_config(&mut self, config: AppConfig) -> Result<(), ConfigError> {
        config.validate()?;

        self.adjust_target_fps(config.pipeline.target_fps as f32);
        if config.pipeline.max_workers != self.config.pipeline.max_workers && self.is_running() {
            match build_worker_pool(config.pipeline.max_workers) {
                Ok(pool) => self.send_inference(InferenceMessage::Pool(Arc::new(pool))),
                Err(err) => log::warn!("keeping current worker pool: {err}"),
            }
        }
        if config.pipeline.max_queue_size != self.config.pipeline.max_queue_size {
            log::info!("queue size change applies on next start");
        }
        self.send_inference(InferenceMessage::Control(InferenceControl::Reconfigure(
            config.calibration.clone(),
            config.pipeline.classifier_input_size,
        )));
        self.send_decision(DecisionControl::Reconfigure(Box::new(config.clone())));
        self.config = config;
        log::info!("configuration reloaded");
        Ok(())
    }

    /// State machine and filter statistics. `None` if the decision unit
    /// does not answer in time or was never injected.
    pub fn state_stats(&self) -> Option<DecisionSnapshot> {
        match self.units.as_ref() {
            Some(units) => {
                let (reply, response) = bounded(1);
                units.decision_ctl.send(DecisionMessage::Stats(reply)).ok()?;
                response.recv_timeout(STATS_REPLY_TIMEOUT).ok()
            }
            None => self.decision.as_ref().map(DecisionStage::snapshot),
        }
    }

    pub fn calibration_stats(&self) -> Option<CalibrationStats> {
        match self.units.as_ref() {
            Some(units) => {
                let (reply, response) = bounded(1);
                units.inference_ctl.send(InferenceMessage::Stats(reply)).ok()?;
                response.recv_timeout(STATS_REPLY_TIMEOUT).ok().flatten()
            }
            None => self.inference.as_ref()?.calibration_stats(),
        }
    }

    fn send_decision(&mut self, command: DecisionControl) {
        match (self.units.as_ref(), self.decision.as_mut()) {
            (Some(units), _) => {
                if units.decision_ctl.send(DecisionMessage::Control(command)).is_err() {
                    log::warn!("decision unit is gone; command dropped");
                }
            }
            (None, Some(stage)) => stage.apply(command),
            (None, None) => log::warn!("no state machine injected; command dropped"),
        }
    }

    fn send_inference(&mut self, message: InferenceMessage) {
        match (self.units.as_ref(), self.inference.as_mut()) {
            (Some(units), _) => {
                if units.inference_ctl.send(message).is_err() {
                    log::warn!("inference unit is gone; command dropped");
                }
            }
            (None, Some(stage)) => match message {
                InferenceMessage::Control(command) => stage.apply(command),
                InferenceMessage::Pool(_) | InferenceMessage::Stats(_) => {}
            },
            (None, None) => {}
        }
    }
}

impl Drop for GesturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_unit<F>(name: &'static str, body: F) -> Result<Worker, PipelineError>
where
    F: FnOnce() -> UnitOutput + Send + 'static,
{
    let (done_tx, done) = bounded::<()>(0);
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let _done = done_tx;
            log::debug!("{name} started");
            let output = body();
            log::debug!("{name} exited");
            output
        })
        .map_err(|err| PipelineError::thread_spawn(name, err))?;
    Ok(Worker { name, handle, done })
}

/// Sleeps for `duration` or until shutdown. Returns `true` on shutdown.
fn wait_or_shutdown(shutdown: &Receiver<()>, duration: Duration) -> bool {
    !matches!(shutdown.recv_timeout(duration), Err(RecvTimeoutError::Timeout))
}

enum Wake<M> {
    Frame(PipelineFrame),
    Control(M),
    Idle,
    Shutdown,
}

/// Everything a consuming unit blocks on.
struct UnitQueues<'a, M> {
    input: &'a Receiver<PipelineFrame>,
    control: &'a Receiver<M>,
    shutdown: &'a Receiver<()>,
}

impl<M> UnitQueues<'_, M> {
    fn next(&self) -> Wake<M> {
        select! {
            recv(self.control) -> msg => msg.map_or(Wake::Shutdown, Wake::Control),
            recv(self.input) -> frame => frame.map_or(Wake::Shutdown, Wake::Frame),
            recv(self.shutdown) -> _ => Wake::Shutdown,
            default(IDLE_WAIT) => Wake::Idle,
        }
    }
}

fn capture_unit(
    mut source: Box<dyn CaptureSource>,
    shared: &Shared,
    output: &Sender<PipelineFrame>,
    shutdown: &Receiver<()>,
) -> UnitOutput {
    let counters = &shared.counters;
    let mut next_id = 0u64;

    while shared.running.load(Ordering::Acquire) {
        let started = Instant::now();
        match source.get_frame() {
            Ok(Some(image)) => {
                next_id += 1;
                let frame = PipelineFrame::new(next_id, Instant::now(), image);
                match output.try_send(frame) {
                    Ok(()) => {
                        counters.frames_captured.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(frame)) => {
                        counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                        log::trace!("capture queue full, dropped frame {}", frame.frame_id);
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            Ok(None) => {
                if wait_or_shutdown(shutdown, NO_FRAME_BACKOFF) {
                    break;
                }
                continue;
            }
            Err(err) => {
                log::warn!("capture failed: {err:#}");
                if wait_or_shutdown(shutdown, NO_FRAME_BACKOFF) {
                    break;
                }
                continue;
            }
        }

        let interval = frame_interval(shared.target_fps.load());
        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            if wait_or_shutdown(shutdown, rest) {
                break;
            }
        }
    }
    UnitOutput::Capture(source)
}

fn inference_unit(
    mut stage: InferenceStage,
    mut pool: Arc<ThreadPool>,
    shared: &Shared,
    queues: UnitQueues<'_, InferenceMessage>,
    output: &Sender<PipelineFrame>,
) -> UnitOutput {
    let counters = &shared.counters;

    while shared.running.load(Ordering::Acquire) {
        match queues.next() {
            Wake::Frame(mut frame) => {
                let result = stage.run(&mut frame, &pool);
                counters.frames_processed.fetch_add(1, Ordering::Relaxed);
                counters.avg_inference_ms.store(stage.average_ms());
                if let Err(err) = result {
                    log::warn!("inference failed for frame {}: {err:#}", frame.frame_id);
                    continue;
                }
                match output.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(frame)) => {
                        counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                        log::trace!("decision queue full, dropped frame {}", frame.frame_id);
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            Wake::Control(InferenceMessage::Control(command)) => stage.apply(command),
            Wake::Control(InferenceMessage::Pool(next)) => {
                pool = next;
                log::info!("worker pool resized to {}", pool.current_num_threads());
            }
            Wake::Control(InferenceMessage::Stats(reply)) => {
                let _ = reply.send(stage.calibration_stats());
            }
            Wake::Idle => {}
            Wake::Shutdown => break,
        }
    }
    UnitOutput::Inference(stage)
}

fn decision_unit(
    mut stage: DecisionStage,
    shared: &Shared,
    queues: UnitQueues<'_, DecisionMessage>,
    ui: &Sender<PipelineFrame>,
    ui_evict: &Receiver<PipelineFrame>,
) -> UnitOutput {
    while shared.running.load(Ordering::Acquire) {
        match queues.next() {
            Wake::Frame(mut frame) => {
                stage.run(&mut frame);
                shared.counters.avg_end_to_end_ms.store(stage.average_ms());
                publish_latest(frame, ui, ui_evict, &shared.counters);
            }
            Wake::Control(DecisionMessage::Control(command)) => stage.apply(command),
            Wake::Control(DecisionMessage::Stats(reply)) => {
                let _ = reply.send(stage.snapshot());
            }
            Wake::Idle => {}
            Wake::Shutdown => break,
        }
    }
    UnitOutput::Decision(stage)
}

/// Pushes `frame` to the UI queue, evicting the oldest entries when full.
fn publish_latest(
    mut frame: PipelineFrame,
    ui: &Sender<PipelineFrame>,
    ui_evict: &Receiver<PipelineFrame>,
    counters: &PipelineCounters,
) {
    loop {
        match ui.try_send(frame) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => return,
            Err(TrySendError::Full(rejected)) => {
                if ui_evict.try_recv().is_ok() {
                    counters.ui_frames_evicted.fetch_add(1, Ordering::Relaxed);
                }
                frame = rejected;
            }
        }
    }
}

fn metrics_unit(shared: &Shared, shutdown: &Receiver<()>) -> UnitOutput {
    let ticker = tick(METRICS_INTERVAL);
    let processed = || shared.counters.frames_processed.load(Ordering::Relaxed);
    let mut meter = ThroughputMeter::new(processed(), Instant::now());

    while shared.running.load(Ordering::Acquire) {
        select! {
            recv(ticker) -> at => {
                let fps = meter.tick(processed(), at.unwrap_or_else(|_| Instant::now()));
                shared.counters.fps_actual.store(fps);
                log::debug!("pipeline throughput {fps:.1} fps");
            }
            recv(shutdown) -> _ => {}
        }
    }
    UnitOutput::Metrics
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::{Arc, atomic::AtomicUsize};

    use image::{Rgba, RgbaImage};
    use ndarray::Array4;

    use super::*;
    use crate::{
        actions::{ActionOutcome, ActionRequest, CallbackTable},
        types::{BBox, HandDetection, RawPrediction},
    };

    struct StaticCamera;

    impl CaptureSource for StaticCamera {
        fn get_frame(&mut self) -> anyhow::Result<Option<RgbaImage>> {
            Ok(Some(RgbaImage::from_pixel(160, 120, Rgba([30, 30, 30, 255]))))
        }
    }

    /// Always reports one hand; optionally slow.
    struct SlowDetector(Duration);

    impl HandDetector for SlowDetector {
        fn detect(&mut self, _frame: &RgbaImage) -> anyhow::Result<Detection> {
            thread::sleep(self.0);
            Ok(Detection {
                hands: vec![HandDetection::new(BBox::new(40, 30, 60, 60), 0.9)],
                annotated: None,
            })
        }
    }

    struct PalmClassifier;

    impl GestureClassifier for PalmClassifier {
        fn predict(&mut self, _input: &Array4<f32>) -> anyhow::Result<RawPrediction> {
            Ok(RawPrediction::new("palm", 0.95, true))
        }
    }

    fn config(fps: u32, queue: usize) -> AppConfig {
        let mut config = AppConfig::default();
        config.pipeline.target_fps = fps;
        config.pipeline.max_queue_size = queue;
        config.pipeline.max_workers = 1;
        config.pipeline.classifier_input_size = 16;
        config.state_machine.confirmation_time = 0.1;
        config.smoothing.consecutive_frames = 3;
        config.smoothing.window_size = 5;
        config
    }

    fn pipeline(config: AppConfig, delay: Duration, table: CallbackTable) -> GesturePipeline {
        let machine = IntentStateMachine::new(config.state_machine.clone());
        let mut pipeline = GesturePipeline::new(config);
        pipeline
            .inject_components(StaticCamera, SlowDetector(delay), PalmClassifier, table, machine)
            .unwrap();
        pipeline
    }

    #[test]
    fn start_without_components_fails() {
        let mut pipeline = GesturePipeline::new(AppConfig::default());
        let err = pipeline.start().unwrap_err();
        assert!(matches!(err, PipelineError::MissingComponent(_)));
        assert!(!pipeline.is_running());
    }

    #[test]
    fn slow_inference_drops_frames_without_backlog() {
        let mut pipeline = pipeline(config(60, 2), Duration::from_millis(40), CallbackTable::new());
        pipeline.start().unwrap();
        thread::sleep(Duration::from_millis(800));
        let metrics = pipeline.performance_metrics();
        pipeline.stop();

        assert!(metrics.running);
        assert!(metrics.frames_dropped > 0, "{metrics:?}");
        assert!(metrics.frames_processed > 0, "{metrics:?}");
        // Captured frames are either processed, queued or in the detector.
        let backlog = metrics.frames_captured.saturating_sub(metrics.frames_processed);
        assert!(backlog <= 3, "{metrics:?}");
        assert!(metrics.queue_sizes.capture <= 2);
    }

    #[test]
    fn actions_fire_from_the_decision_unit() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let mut table = CallbackTable::new();
        table.register("palm", move |request: &ActionRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ActionOutcome::executed("test", request.gesture.clone()))
        });

        let mut pipeline = pipeline(config(30, 4), Duration::ZERO, table);
        pipeline.start().unwrap();
        thread::sleep(Duration::from_millis(900));

        let frame = pipeline.latest_frame().expect("decided frame");
        assert!(frame.frame_id > 0);
        assert!(frame.state.is_some());
        let stats = pipeline.state_stats().unwrap();
        pipeline.stop();

        assert!(fired.load(Ordering::SeqCst) >= 1);
        assert!(stats.machine.counters.confirmed_gestures >= 1);
    }

    #[test]
    fn stop_is_idempotent_and_restart_reuses_components() {
        let mut pipeline = pipeline(config(30, 4), Duration::ZERO, CallbackTable::new());
        pipeline.stop();

        pipeline.start().unwrap();
        pipeline.start().unwrap();
        thread::sleep(Duration::from_millis(200));
        pipeline.stop();
        pipeline.stop();
        assert!(!pipeline.is_running());
        assert!(!pipeline.performance_metrics().running);

        pipeline.start().unwrap();
        thread::sleep(Duration::from_millis(200));
        assert!(pipeline.performance_metrics().frames_captured > 0);
        assert!(pipeline.calibration_stats().is_some());
        pipeline.stop();
    }

    #[test]
    fn inject_while_running_is_rejected() {
        let mut pipeline = pipeline(config(30, 4), Duration::ZERO, CallbackTable::new());
        pipeline.start().unwrap();
        let machine = IntentStateMachine::default();
        let err = pipeline
            .inject_components(
                StaticCamera,
                SlowDetector(Duration::ZERO),
                PalmClassifier,
                CallbackTable::new(),
                machine,
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyRunning));
    }

    #[test]
    fn target_fps_is_clamped() {
        let pipeline = GesturePipeline::new(AppConfig::default());
        assert_eq!(pipeline.target_fps(), 30.0);
        pipeline.adjust_target_fps(240.0);
        assert_eq!(pipeline.target_fps(), MAX_TARGET_FPS);
        pipeline.adjust_target_fps(0.0);
        assert_eq!(pipeline.target_fps(), MIN_TARGET_FPS);
        pipeline.adjust_target_fps(f32::NAN);
        assert_eq!(pipeline.target_fps(), MIN_TARGET_FPS);
    }

    #[test]
    fn controls_apply_to_a_stopped_pipeline() {
        let mut pipeline = pipeline(config(30, 4), Duration::ZERO, CallbackTable::new());
        pipeline.emergency_disable();
        let stats = pipeline.state_stats().unwrap();
        assert_eq!(stats.machine.current_state, crate::state_machine::MachineState::Disabled);

        pipeline.force_enable();
        pipeline.reset_filter();
        assert_eq!(pipeline.state_stats().unwrap().filter.window_len, 0);
        let mut next = pipeline.config().clone();
        next.smoothing.consecutive_frames = 4;
        pipeline.reload_config(next).unwrap();
        assert_eq!(pipeline.config().smoothing.consecutive_frames, 4);

        let mut invalid = pipeline.config().clone();
        invalid.pipeline.max_queue_size = 0;
        assert!(pipeline.reload_config(invalid).is_err());
    }

    #[test]
    fn clear_queues_empties_the_pipeline() {
        let mut pipeline = pipeline(config(60, 4), Duration::from_millis(50), CallbackTable::new());
        pipeline.start().unwrap();
        thread::sleep(Duration::from_millis(300));
        pipeline.clear_queues();
        let sizes = pipeline.performance_metrics().queue_sizes;
        pipeline.stop();
        // The capture unit may refill one slot between the drain and the read.
        assert!(sizes.capture <= 1, "{sizes:?}");
        assert!(sizes.ui <= 1, "{sizes:?}");
    }
}
