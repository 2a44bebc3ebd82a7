use std::path::PathBuf;

use thiserror::Error;

/// Failures that stop the pipeline from starting.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("required component `{0}` was not injected")]
    MissingComponent(&'static str),
    #[error("pipeline is already running")]
    AlreadyRunning,
    #[error("failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),
}

impl PipelineError {
    pub fn thread_spawn(name: impl Into<String>, source: std::io::Error) -> Self {
        Self::ThreadSpawn {
            name: name.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}
