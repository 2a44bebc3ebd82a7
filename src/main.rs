use std::{
    path::PathBuf,
    sync::{Arc, atomic::AtomicBool},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::Parser;
use gesture_intent::{
    AppConfig, ConfigFile, IntentStateMachine, PipelineFrame,
    actions::{ActionRegistry, input::LogBackend},
    config::secs,
    pipeline::{
        CaptureSource, GesturePipeline, SyncEngine,
        placeholder::{BrightnessClassifier, BrightnessDetector, SyntheticCamera},
    },
};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "gesture-intent", version, about = "Turn hand gestures into desktop actions")]
struct Cli {
    /// JSON config file; reloaded when it changes on disk.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run every stage on the main thread instead of the threaded pipeline.
    #[arg(long)]
    sync: bool,

    /// Override the configured capture rate.
    #[arg(long)]
    fps: Option<u32>,

    /// Seconds to run; 0 runs until killed.
    #[arg(long, default_value_t = 30.0)]
    duration: f64,

    /// Default log filter when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the effective configuration as JSON and exit.
    #[arg(long)]
    print_config: bool,

    /// Capture from this webcam instead of the synthetic source.
    #[cfg(feature = "camera-nokhwa")]
    #[arg(long)]
    camera: Option<u32>,

    #[cfg(feature = "camera-nokhwa")]
    #[arg(long)]
    list_cameras: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    #[cfg(feature = "camera-nokhwa")]
    if cli.list_cameras {
        for (index, name) in gesture_intent::pipeline::camera::available_cameras()? {
            println!("{index}: {name}");
        }
        return Ok(());
    }

    let mut config_file = cli
        .config
        .clone()
        .map(|path| ConfigFile::new(path).with_target_fps(cli.fps));
    let mut config = match config_file.as_mut() {
        Some(file) => file
            .load()
            .with_context(|| format!("failed to load {}", file.path().display()))?,
        None => AppConfig::default(),
    };
    if let Some(fps) = cli.fps {
        config.pipeline.target_fps = fps;
    }
    config.validate()?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let capture = build_capture(&cli)?;
    let registry = ActionRegistry::from_config(&config.actions, Arc::new(LogBackend::default()));
    let machine = IntentStateMachine::new(config.state_machine.clone());
    let run_for = if cli.duration > 0.0 {
        secs(cli.duration)
    } else {
        Duration::MAX
    };

    if cli.sync || !config.pipeline.enable_async {
        run_sync(config, capture, registry, machine, run_for, config_file)
    } else {
        run_async(config, capture, registry, machine, run_for, config_file)
    }
}

#[cfg_attr(not(feature = "camera-nokhwa"), allow(unused_variables))]
fn build_capture(cli: &Cli) -> Result<Box<dyn CaptureSource>> {
    #[cfg(feature = "camera-nokhwa")]
    if let Some(index) = cli.camera {
        let camera = gesture_intent::pipeline::camera::NokhwaCapture::open(index)
            .with_context(|| format!("failed to open camera {index}"))?;
        return Ok(Box::new(camera));
    }
    log::info!("using synthetic camera (palm, fist, then no hand; two seconds each)");
    Ok(Box::new(SyntheticCamera::default()))
}

fn describe(frame: &PipelineFrame) -> String {
    let state = frame.state.map_or("-", |state| state.label());
    format!("frame {}: {} [{state}]", frame.frame_id, frame.display_text())
}

fn poll_config(file: Option<&mut ConfigFile>) -> Option<AppConfig> {
    match file?.poll_changed() {
        Ok(changed) => changed,
        Err(err) => {
            log::warn!("ignoring config change: {err}");
            None
        }
    }
}

fn run_async(
    config: AppConfig,
    capture: Box<dyn CaptureSource>,
    registry: ActionRegistry,
    machine: IntentStateMachine,
    run_for: Duration,
    mut config_file: Option<ConfigFile>,
) -> Result<()> {
    let mut pipeline = GesturePipeline::new(config);
    pipeline.inject_components(
        capture,
        BrightnessDetector::default(),
        BrightnessClassifier,
        registry,
        machine,
    )?;
    pipeline.start()?;

    let started = Instant::now();
    let mut last_report = started;
    let mut latest = None;
    while started.elapsed() < run_for {
        thread::sleep(POLL_INTERVAL);
        if let Some(frame) = pipeline.latest_frame() {
            if frame.action_result.as_ref().is_some_and(|outcome| outcome.executed) {
                log::info!("{}", describe(&frame));
            }
            latest = Some(frame);
        }
        if last_report.elapsed() < REPORT_INTERVAL {
            continue;
        }
        last_report = Instant::now();

        if let Some(frame) = latest.as_ref() {
            log::info!("{}", describe(frame));
        }
        let metrics = pipeline.performance_metrics();
        log::info!("metrics {}", serde_json::to_string(&metrics)?);
        if let Some(next) = poll_config(config_file.as_mut()) {
            if let Err(err) = pipeline.reload_config(next) {
                log::warn!("rejected config change: {err}");
            }
        }
    }

    if let Some(stats) = pipeline.state_stats() {
        log::info!("final state {}", serde_json::to_string(&stats)?);
    }
    pipeline.stop();
    Ok(())
}

fn run_sync(
    config: AppConfig,
    capture: Box<dyn CaptureSource>,
    registry: ActionRegistry,
    machine: IntentStateMachine,
    run_for: Duration,
    mut config_file: Option<ConfigFile>,
) -> Result<()> {
    let mut engine = SyncEngine::new(
        config,
        capture,
        BrightnessDetector::default(),
        BrightnessClassifier,
        registry,
        machine,
    )?;

    let running = AtomicBool::new(true);
    let mut last_report = Instant::now();
    let decided = engine.run_for(run_for, &running, |engine, frame| {
        if frame.action_result.as_ref().is_some_and(|outcome| outcome.executed) {
            log::info!("{}", describe(&frame));
        }
        if last_report.elapsed() < REPORT_INTERVAL {
            return;
        }
        last_report = Instant::now();

        log::info!("{}", describe(&frame));
        match serde_json::to_string(&engine.performance_metrics()) {
            Ok(metrics) => log::info!("metrics {metrics}"),
            Err(err) => log::warn!("failed to encode metrics: {err}"),
        }
        if let Some(next) = poll_config(config_file.as_mut()) {
            if let Err(err) = engine.reload_config(next) {
                log::warn!("rejected config change: {err}");
            }
        }
    });

    log::info!(
        "processed {decided} frames; final state {}",
        serde_json::to_string(&engine.state_stats())?
    );
    Ok(())
}
