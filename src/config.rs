use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};

use crate::{actions::PluginKind, error::ConfigError};

/// Converts a seconds value from the config file into a `Duration`,
/// treating negative or non-finite values as zero.
pub fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::ZERO)
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub state_machine: StateMachineConfig,
    pub smoothing: SmoothingConfig,
    pub calibration: CalibrationConfig,
    pub pipeline: PipelineConfig,
    pub actions: ActionsConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMachineConfig {
    pub detection_threshold: f32,
    /// Seconds a detected gesture must be held before it is confirmed.
    pub confirmation_time: f64,
    pub cooldown_time: f64,
    /// Seconds past confirmation before the long-press variant fires.
    pub long_press_threshold: f64,
    /// Gesture that re-enables a disabled machine.
    pub reset_gesture: String,
    pub reset_confidence: f32,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            detection_threshold: 0.7,
            confirmation_time: 0.3,
            cooldown_time: 1.0,
            long_press_threshold: 2.0,
            reset_gesture: "palm".to_string(),
            reset_confidence: 0.9,
        }
    }
}

impl StateMachineConfig {
    pub fn confirmation_duration(&self) -> Duration {
        secs(self.confirmation_time)
    }

    pub fn cooldown_duration(&self) -> Duration {
        secs(self.cooldown_time)
    }

    pub fn long_press_duration(&self) -> Duration {
        secs(self.long_press_threshold)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub window_size: usize,
    pub consecutive_frames: usize,
    pub debounce_time: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            consecutive_frames: 7,
            debounce_time: 0.5,
        }
    }
}

impl SmoothingConfig {
    pub fn debounce_duration(&self) -> Duration {
        secs(self.debounce_time)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiSize {
    pub width: i32,
    pub height: i32,
}

impl RoiSize {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub enabled: bool,
    pub history_size: usize,
    pub padding_factor: f32,
    pub base_roi_size: RoiSize,
    pub min_roi_size: RoiSize,
    pub max_roi_size: RoiSize,
    /// Hand width in pixels observed at `reference_distance`.
    pub reference_hand_width: f32,
    /// Centimetres.
    pub reference_distance: f32,
    pub roi_smoothing: f32,
    pub distance_smoothing: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            history_size: 30,
            padding_factor: 0.3,
            base_roi_size: RoiSize::new(100, 100),
            min_roi_size: RoiSize::new(60, 60),
            max_roi_size: RoiSize::new(200, 200),
            reference_hand_width: 80.0,
            reference_distance: 60.0,
            roi_smoothing: 0.7,
            distance_smoothing: 0.8,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub enable_async: bool,
    pub max_queue_size: usize,
    pub max_workers: usize,
    pub target_fps: u32,
    /// Side length of the square tensor handed to the classifier.
    pub classifier_input_size: u32,
    /// Seconds `stop()` waits for each unit before detaching it.
    pub join_timeout: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_async: true,
            max_queue_size: 10,
            max_workers: 3,
            target_fps: 30,
            classifier_input_size: 50,
            join_timeout: 2.0,
        }
    }
}

impl PipelineConfig {
    pub fn join_timeout_duration(&self) -> Duration {
        secs(self.join_timeout)
    }
}

/// A gesture's entry in the action table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionBinding {
    #[serde(rename = "type", default)]
    pub kind: PluginKind,
    #[serde(default)]
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_press_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ActionBinding {
    pub fn new(kind: PluginKind, action: impl Into<String>) -> Self {
        Self {
            kind,
            action: action.into(),
            long_press_action: None,
            description: None,
        }
    }

    pub fn with_long_press(mut self, action: impl Into<String>) -> Self {
        self.long_press_action = Some(action.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    pub gesture_actions: BTreeMap<String, ActionBinding>,
    /// Per-plugin cooldown in seconds between repeats of one gesture/command pair.
    pub action_cooldown: f64,
    pub api_base_url: String,
    pub api_timeout: f64,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        let mut gesture_actions = BTreeMap::new();
        gesture_actions.insert(
            "palm".to_string(),
            ActionBinding::new(PluginKind::Keyboard, "space")
                .with_long_press("ctrl+right")
                .with_description("toggle playback"),
        );
        gesture_actions.insert(
            "fist".to_string(),
            ActionBinding::new(PluginKind::Mouse, "left_click")
                .with_description("click"),
        );

        Self {
            gesture_actions,
            action_cooldown: 1.0,
            api_base_url: "http://localhost:8080".to_string(),
            api_timeout: 5.0,
        }
    }
}

impl ActionsConfig {
    pub fn cooldown_duration(&self) -> Duration {
        secs(self.action_cooldown)
    }

    pub fn api_timeout_duration(&self) -> Duration {
        secs(self.api_timeout)
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
                path: PathBuf::new(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sm = &self.state_machine;
        check_unit("state_machine.detection_threshold", sm.detection_threshold)?;
        check_unit("state_machine.reset_confidence", sm.reset_confidence)?;
        check_positive("state_machine.confirmation_time", sm.confirmation_time)?;
        check_positive("state_machine.cooldown_time", sm.cooldown_time)?;
        check_positive("state_machine.long_press_threshold", sm.long_press_threshold)?;

        let smoothing = &self.smoothing;
        if smoothing.window_size == 0 {
            return Err(ConfigError::invalid("smoothing.window_size must be at least 1"));
        }
        if smoothing.consecutive_frames == 0 || smoothing.consecutive_frames > smoothing.window_size
        {
            return Err(ConfigError::invalid(format!(
                "smoothing.consecutive_frames must be in 1..={}, got {}",
                smoothing.window_size, smoothing.consecutive_frames
            )));
        }
        if !(smoothing.debounce_time.is_finite() && smoothing.debounce_time >= 0.0) {
            return Err(ConfigError::invalid(
                "smoothing.debounce_time must be a non-negative number of seconds",
            ));
        }

        let cal = &self.calibration;
        if cal.history_size == 0 {
            return Err(ConfigError::invalid("calibration.history_size must be at least 1"));
        }
        if !(cal.padding_factor.is_finite() && cal.padding_factor >= 0.0) {
            return Err(ConfigError::invalid("calibration.padding_factor must be >= 0"));
        }
        for (name, size) in [
            ("calibration.base_roi_size", cal.base_roi_size),
            ("calibration.min_roi_size", cal.min_roi_size),
            ("calibration.max_roi_size", cal.max_roi_size),
        ] {
            if size.width <= 0 || size.height <= 0 {
                return Err(ConfigError::invalid(format!("{name} must be positive")));
            }
        }
        if cal.min_roi_size.width > cal.max_roi_size.width
            || cal.min_roi_size.height > cal.max_roi_size.height
        {
            return Err(ConfigError::invalid(
                "calibration.min_roi_size exceeds calibration.max_roi_size",
            ));
        }
        check_positive(
            "calibration.reference_hand_width",
            f64::from(cal.reference_hand_width),
        )?;
        check_positive(
            "calibration.reference_distance",
            f64::from(cal.reference_distance),
        )?;
        check_smoothing("calibration.roi_smoothing", cal.roi_smoothing)?;
        check_smoothing("calibration.distance_smoothing", cal.distance_smoothing)?;

        let pipeline = &self.pipeline;
        if pipeline.max_queue_size == 0 {
            return Err(ConfigError::invalid("pipeline.max_queue_size must be at least 1"));
        }
        if pipeline.max_workers == 0 {
            return Err(ConfigError::invalid("pipeline.max_workers must be at least 1"));
        }
        if !(1..=60).contains(&pipeline.target_fps) {
            return Err(ConfigError::invalid(format!(
                "pipeline.target_fps must be in 1..=60, got {}",
                pipeline.target_fps
            )));
        }
        if pipeline.classifier_input_size == 0 {
            return Err(ConfigError::invalid(
                "pipeline.classifier_input_size must be at least 1",
            ));
        }
        check_positive("pipeline.join_timeout", pipeline.join_timeout)?;

        check_positive("actions.action_cooldown", self.actions.action_cooldown)?;
        check_positive("actions.api_timeout", self.actions.api_timeout)?;

        Ok(())
    }
}

fn check_unit(name: &str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

fn check_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(format!(
            "{name} must be positive, got {value}"
        )))
    }
}

fn check_smoothing(name: &str, value: f32) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(format!(
            "{name} must be within (0, 1], got {value}"
        )))
    }
}

/// A config file on disk that can be polled for changes.
#[derive(Debug)]
pub struct ConfigFile {
    path: PathBuf,
    last_modified: Option<SystemTime>,
    target_fps: Option<u32>,
}

impl ConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_modified: None,
            target_fps: None,
        }
    }

    /// Pins `pipeline.target_fps` on every load and reload.
    pub fn with_target_fps(mut self, fps: Option<u32>) -> Self {
        self.target_fps = fps;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the file and remembers its modification time.
    pub fn load(&mut self) -> Result<AppConfig, ConfigError> {
        let modified = self.modified()?;
        let config = self.read()?;
        self.last_modified = modified;
        Ok(config)
    }

    /// Returns a freshly validated config when the file changed since the
    /// last poll, `Ok(None)` otherwise. A rejected edit is reported once.
    pub fn poll_changed(&mut self) -> Result<Option<AppConfig>, ConfigError> {
        let modified = self.modified()?;
        if modified.is_some() && modified == self.last_modified {
            return Ok(None);
        }
        self.last_modified = modified;
        let config = self.read()?;
        log::info!("reloaded configuration from {}", self.path.display());
        Ok(Some(config))
    }

    fn read(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::load(&self.path)?;
        if let Some(fps) = self.target_fps {
            config.pipeline.target_fps = fps;
            config.validate()?;
        }
        Ok(config)
    }

    fn modified(&self) -> Result<Option<SystemTime>, ConfigError> {
        let metadata = fs::metadata(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(metadata.modified().ok())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "gesture-intent-{}-{}-{name}.json",
            std::process::id(),
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0)
        ))
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.smoothing.consecutive_frames, 7);
        assert_eq!(config.pipeline.max_queue_size, 10);
        assert_eq!(config.state_machine.reset_gesture, "palm");
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config = AppConfig::from_json(
            r#"{
                "state_machine": { "cooldown_time": 2.5 },
                "actions": {
                    "gesture_actions": {
                        "peace": {
                            "type": "media",
                            "action": "next_track",
                            "long_press_action": "volume_up"
                        }
                    }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.state_machine.cooldown_time, 2.5);
        assert_eq!(config.state_machine.detection_threshold, 0.7);
        assert_eq!(config.smoothing.window_size, 10);
        let binding = &config.actions.gesture_actions["peace"];
        assert_eq!(binding.kind, PluginKind::Media);
        assert_eq!(binding.long_press_action.as_deref(), Some("volume_up"));
        assert_eq!(config.actions.action_cooldown, 1.0);
    }

    #[test]
    fn rejects_consecutive_frames_larger_than_window() {
        let err = AppConfig::from_json(
            r#"{ "smoothing": { "window_size": 5, "consecutive_frames": 6 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = AppConfig::default();
        config.state_machine.detection_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pipeline.target_fps = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.calibration.min_roi_size = RoiSize::new(300, 300);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.calibration.roi_smoothing = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = AppConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let mut file = ConfigFile::new(temp_path("missing"));
        assert!(matches!(file.load(), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn poll_changed_only_reports_new_contents() {
        let path = temp_path("poll");
        fs::write(&path, r#"{ "pipeline": { "target_fps": 20 } }"#).unwrap();

        let mut file = ConfigFile::new(&path);
        let first = file.load().unwrap();
        assert_eq!(first.pipeline.target_fps, 20);
        assert!(file.poll_changed().unwrap().is_none());

        // Force a distinct modification time regardless of filesystem granularity.
        fs::write(&path, r#"{ "pipeline": { "target_fps": 45 } }"#).unwrap();
        let later = SystemTime::now() + Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        let reloaded = file.poll_changed().unwrap().expect("config changed");
        assert_eq!(reloaded.pipeline.target_fps, 45);
        assert!(file.poll_changed().unwrap().is_none());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn fps_override_survives_reload() {
        let path = temp_path("override");
        fs::write(&path, r#"{ "pipeline": { "target_fps": 20 } }"#).unwrap();
        let mut file = ConfigFile::new(&path).with_target_fps(Some(50));
        assert_eq!(file.load().unwrap().pipeline.target_fps, 50);

        let edited = r#"{ "pipeline": { "target_fps": 10, "max_queue_size": 3 } }"#;
        fs::write(&path, edited).unwrap();
        let later = SystemTime::now() + Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        let reloaded = file.poll_changed().unwrap().expect("config changed");
        assert_eq!(reloaded.pipeline.target_fps, 50);
        assert_eq!(reloaded.pipeline.max_queue_size, 3);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rejected_edit_is_reported_once() {
        let path = temp_path("rejected");
        fs::write(&path, r#"{ "pipeline": { "target_fps": 20 } }"#).unwrap();
        let mut file = ConfigFile::new(&path);
        file.load().unwrap();

        fs::write(&path, r#"{ "pipeline": { "max_queue_size": 0 } }"#).unwrap();
        let later = SystemTime::now() + Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert!(matches!(file.poll_changed(), Err(ConfigError::Invalid(_))));
        assert!(file.poll_changed().unwrap().is_none());

        let _ = fs::remove_file(&path);
    }
}
