//! Error types for the engine module.

use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while driving the provisioning engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine ran and exited non-zero. `output` is its stdout+stderr verbatim.
    #[error("`{command}` exited with code {exit_code}:\n{output}")]
    CommandFailed {
        command: String,
        exit_code: i64,
        output: String,
    },

    #[error("Invalid workspace name {name:?}: {reason}")]
    InvalidWorkspaceName { name: String, reason: String },

    #[error("Invalid retry pattern: {0}")]
    InvalidRetryPattern(#[from] regex::Error),

    #[error("Engine not available: {0}")]
    Unavailable(String),

    #[error("Runner error: {0}")]
    Runner(#[from] tfscratch_runner::RunnerError),
}

impl EngineError {
    /// The engine's native output, when the engine itself reported the failure.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Outcome of a retried operation that never succeeded.
#[derive(Error, Debug)]
pub enum RetryError {
    #[error("{description} failed with a non-retryable error after {attempts} attempt(s): {source}")]
    Fatal {
        description: String,
        attempts: u32,
        #[source]
        source: EngineError,
    },

    #[error("{description} still failing after {attempts} attempt(s): {source}")]
    Exhausted {
        description: String,
        attempts: u32,
        #[source]
        source: EngineError,
    },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Fatal { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn last_error(&self) -> &EngineError {
        match self {
            Self::Fatal { source, .. } | Self::Exhausted { source, .. } => source,
        }
    }

    pub fn into_last_error(self) -> EngineError {
        match self {
            Self::Fatal { source, .. } | Self::Exhausted { source, .. } => source,
        }
    }
}
