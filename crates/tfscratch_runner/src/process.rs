//! Host process runner.
//!
//! Spawns the program directly on the host, captures stdout/stderr line by
//! line and enforces the per-invocation timeout.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{CommandSpec, RunConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, ExecutionResult};

/// Log output from a running command.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: chrono::DateTime<Utc>,
    pub stream: LogStream,
    pub message: String,
}

/// Log stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Log handler callback type.
pub type LogHandler = Arc<dyn Fn(LogLine) + Send + Sync>;

/// Host process runner options.
#[derive(Debug, Clone)]
pub struct ProcessRunnerOptions {
    /// CI mode (timestamped log lines)
    pub ci_mode: bool,
}

impl Default for ProcessRunnerOptions {
    fn default() -> Self {
        Self {
            ci_mode: std::env::var("CI").is_ok(),
        }
    }
}

impl ProcessRunnerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ci_mode(mut self) -> Self {
        self.ci_mode = true;
        self
    }
}

/// Runs commands as child processes of the current process.
///
/// Children are spawned with `kill_on_drop`, so dropping an in-flight
/// [`CommandRunner::run`] future terminates the engine process as well.
#[derive(Clone, Default)]
pub struct ProcessRunner {
    options: ProcessRunnerOptions,
    log_handler: Option<LogHandler>,
}

impl ProcessRunner {
    pub fn new(options: ProcessRunnerOptions) -> Self {
        Self {
            options,
            log_handler: None,
        }
    }

    /// Set a log handler for streaming logs.
    pub fn with_log_handler(mut self, handler: LogHandler) -> Self {
        self.log_handler = Some(handler);
        self
    }

    pub fn options(&self) -> &ProcessRunnerOptions {
        &self.options
    }

    fn sink(&self, run_config: &RunConfig) -> OutputSink {
        OutputSink {
            echo: run_config.stream_logs,
            ci_mode: self.options.ci_mode,
            handler: self.log_handler.clone(),
        }
    }

    async fn execute(
        &self,
        spec: &CommandSpec,
        run_config: &RunConfig,
    ) -> RunnerResult<ExecutionResult> {
        let command = spec.display();

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.workdir {
            cmd.current_dir(dir);
        }

        debug!("Executing: {}", command);

        let started_at = Utc::now();
        let mut child = cmd.spawn().map_err(|source| RunnerError::SpawnFailed {
            program: spec.program.clone(),
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::ExecutionFailed("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunnerError::ExecutionFailed("stderr was not captured".to_string()))?;

        let sink = self.sink(run_config);
        let stdout_task = tokio::spawn(collect_lines(stdout, LogStream::Stdout, sink.clone()));
        let stderr_task = tokio::spawn(collect_lines(stderr, LogStream::Stderr, sink));

        let status = if run_config.timeout_seconds > 0 {
            let limit = Duration::from_secs(run_config.timeout_seconds);
            match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(
                        "Killing `{}` after {} seconds",
                        command, run_config.timeout_seconds
                    );
                    let _ = child.kill().await;
                    stdout_task.abort();
                    stderr_task.abort();
                    return Err(RunnerError::Timeout(run_config.timeout_seconds));
                }
            }
        } else {
            child.wait().await?
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        let exit_code = status.code().map(i64::from).unwrap_or(-1);

        debug!(
            "`{}` exited with code {} after {}ms",
            command, exit_code, duration_ms
        );

        Ok(ExecutionResult {
            command,
            exit_code,
            stdout,
            stderr,
            started_at,
            finished_at,
            duration_ms,
        })
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn is_available(&self, program: &str) -> RunnerResult<bool> {
        let available = Command::new(program)
            .arg("version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);
        Ok(available)
    }

    async fn run(
        &self,
        spec: &CommandSpec,
        run_config: &RunConfig,
    ) -> RunnerResult<ExecutionResult> {
        self.execute(spec, run_config).await
    }

    fn describe(&self) -> String {
        "host".to_string()
    }
}

/// Where captured lines go besides the result buffer.
#[derive(Clone)]
struct OutputSink {
    echo: bool,
    ci_mode: bool,
    handler: Option<LogHandler>,
}

impl OutputSink {
    fn emit(&self, stream: LogStream, message: &str) {
        if !self.echo && self.handler.is_none() {
            return;
        }

        let line = LogLine {
            timestamp: Utc::now(),
            stream,
            message: message.to_string(),
        };

        if self.echo {
            if self.ci_mode {
                println!(
                    "[{}] [{}] {}",
                    line.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                    line.stream,
                    line.message
                );
            } else {
                match stream {
                    LogStream::Stdout => println!("{}", line.message),
                    LogStream::Stderr => eprintln!("{}", line.message),
                }
            }
        }

        if let Some(handler) = &self.handler {
            handler(line);
        }
    }
}

async fn collect_lines<R>(reader: R, stream: LogStream, sink: OutputSink) -> String
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut output = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        output.push_str(&line);
        output.push('\n');
        sink.emit(stream, &line);
    }
    output
}
