//! Command runner trait and types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{CommandSpec, RunConfig};
use crate::error::RunnerResult;

/// Result of a command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Rendered command line
    pub command: String,
    /// Exit code of the process (-1 when killed by a signal)
    pub exit_code: i64,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Execution start time
    pub started_at: DateTime<Utc>,
    /// Execution end time
    pub finished_at: DateTime<Utc>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Check if execution was successful (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get combined output (stdout + stderr).
    pub fn combined_output(&self) -> String {
        if self.stdout.is_empty() {
            self.stderr.clone()
        } else if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Something that can execute a [`CommandSpec`].
///
/// A non-zero exit code is not an error at this layer; callers inspect
/// [`ExecutionResult::success`]. Errors are reserved for failures to run the
/// command at all (spawn failure, timeout).
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Check whether `program` can be executed by this runner.
    async fn is_available(&self, program: &str) -> RunnerResult<bool>;

    /// Execute a command to completion.
    async fn run(&self, spec: &CommandSpec, run_config: &RunConfig)
        -> RunnerResult<ExecutionResult>;

    /// Short human-readable description of the execution backend.
    fn describe(&self) -> String;
}
