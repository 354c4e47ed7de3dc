//! Error types for the core module.

use std::path::PathBuf;

use thiserror::Error;

use tfscratch_engine::{EngineError, RetryError, WorkspaceName};
use tfscratch_runner::RunnerError;

use crate::validation::ValidationStage;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or applying a [`RunConfig`](crate::RunConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid value for {var}: {message}")]
    Env { var: String, message: String },

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Why the definitions could not be validated.
#[derive(Error, Debug)]
pub enum ValidationFailure {
    #[error("Definitions directory {0} does not exist")]
    MissingDefinitions(PathBuf),

    #[error("terraform {stage} failed: {source}")]
    Stage {
        stage: ValidationStage,
        #[source]
        source: RetryError,
    },
}

impl ValidationFailure {
    /// The engine's native output for the failing stage.
    pub fn engine_output(&self) -> Option<&str> {
        match self {
            Self::MissingDefinitions(_) => None,
            Self::Stage { source, .. } => source.last_error().output(),
        }
    }
}

/// Reasons a run does not pass. Cleanup problems are never among them.
#[derive(Error, Debug)]
pub enum RunFailure {
    #[error("Failed to activate scratch workspace {workspace}: {source}")]
    Setup {
        workspace: WorkspaceName,
        #[source]
        source: EngineError,
    },

    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Run exceeded its {0} second limit")]
    TimedOut(u64),
}

impl RunFailure {
    /// The engine's native output, when the engine reported the failure.
    pub fn engine_output(&self) -> Option<&str> {
        match self {
            Self::Setup { source, .. } => source.output(),
            Self::Validation(failure) => failure.engine_output(),
            Self::Cancelled | Self::TimedOut(_) => None,
        }
    }
}

/// Top-level harness error.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Run in scratch workspace {scratch} failed: {failure}")]
    RunFailed {
        ambient: WorkspaceName,
        scratch: WorkspaceName,
        #[source]
        failure: RunFailure,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;
