pub mod actions;
pub mod calibration;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod smoothing;
pub mod state_machine;
pub mod types;

pub use calibration::{AdaptiveRoiCalibrator, CalibrationStats};
pub use config::{AppConfig, ConfigFile};
pub use error::{ConfigError, PipelineError};
pub use pipeline::{GesturePipeline, PerformanceMetrics, SyncEngine};
pub use smoothing::{ConfirmationFilter, SmoothedGesture};
pub use state_machine::{IntentStateMachine, MachineState};
pub use types::{BBox, GestureEvent, PipelineFrame, RawPrediction};
