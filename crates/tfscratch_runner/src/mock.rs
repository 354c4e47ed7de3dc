//! Mock command runner for testing.
//!
//! Provides a configurable mock implementation of the CommandRunner trait
//! for use in unit tests without spawning processes.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::config::{CommandSpec, RunConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, ExecutionResult};

/// Predefined mock response for a command execution.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            duration_ms: 100,
        }
    }

    pub fn failure(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            duration_ms: 100,
        }
    }

    pub fn with_duration(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }
}

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub workdir: Option<PathBuf>,
}

/// Responses keyed by an argument prefix, consumed in order.
struct Rule {
    prefix: Vec<String>,
    responses: VecDeque<MockResponse>,
    sticky: Option<MockResponse>,
}

/// Mock command runner for testing.
///
/// Responses are matched against the command's arguments by prefix; the
/// first rule with a remaining response wins. Commands that match no rule
/// succeed with empty output.
#[derive(Clone, Default)]
pub struct MockRunner {
    available: Arc<RwLock<Option<bool>>>,
    rules: Arc<RwLock<Vec<Rule>>>,
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
    simulate_failure: Arc<RwLock<Option<String>>>,
}

impl MockRunner {
    /// Create a new mock runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether the runner is available.
    pub fn set_available(self, available: bool) -> Self {
        *self.available.write() = Some(available);
        self
    }

    /// Queue a one-shot response for commands whose args start with `prefix`.
    pub fn respond_once(self, prefix: &[&str], response: MockResponse) -> Self {
        {
            let mut rules = self.rules.write();
            let key: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
            match rules.iter_mut().find(|r| r.prefix == key) {
                Some(rule) => rule.responses.push_back(response),
                None => rules.push(Rule {
                    prefix: key,
                    responses: VecDeque::from([response]),
                    sticky: None,
                }),
            }
        }
        self
    }

    /// Respond to every command whose args start with `prefix` once the
    /// one-shot responses for that prefix are used up.
    pub fn respond_always(self, prefix: &[&str], response: MockResponse) -> Self {
        {
            let mut rules = self.rules.write();
            let key: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
            match rules.iter_mut().find(|r| r.prefix == key) {
                Some(rule) => rule.sticky = Some(response),
                None => rules.push(Rule {
                    prefix: key,
                    responses: VecDeque::new(),
                    sticky: Some(response),
                }),
            }
        }
        self
    }

    /// Fail every run with a runner-level error.
    pub fn simulate_failure(self, message: impl Into<String>) -> Self {
        *self.simulate_failure.write() = Some(message.into());
        self
    }

    /// Clear all captured calls.
    pub fn clear_calls(&self) {
        self.captured_calls.write().clear();
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    /// Get the argument lists of all captured calls, joined with spaces.
    pub fn command_lines(&self) -> Vec<String> {
        self.captured_calls
            .read()
            .iter()
            .map(|c| c.args.join(" "))
            .collect()
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.captured_calls.read().len()
    }

    /// Check if any command with the given argument prefix was run.
    pub fn was_called(&self, prefix: &[&str]) -> bool {
        self.captured_calls
            .read()
            .iter()
            .any(|c| starts_with(&c.args, prefix))
    }

    fn next_response(&self, args: &[String]) -> MockResponse {
        let mut rules = self.rules.write();
        for rule in rules.iter_mut() {
            let prefix: Vec<&str> = rule.prefix.iter().map(String::as_str).collect();
            if !starts_with(args, &prefix) {
                continue;
            }
            if let Some(response) = rule.responses.pop_front() {
                return response;
            }
            if let Some(response) = &rule.sticky {
                return response.clone();
            }
        }
        MockResponse::success("")
    }
}

fn starts_with(args: &[String], prefix: &[&str]) -> bool {
    args.len() >= prefix.len() && args.iter().zip(prefix).all(|(a, p)| a == p)
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn is_available(&self, _program: &str) -> RunnerResult<bool> {
        Ok(self.available.read().unwrap_or(true))
    }

    async fn run(
        &self,
        spec: &CommandSpec,
        _run_config: &RunConfig,
    ) -> RunnerResult<ExecutionResult> {
        self.captured_calls.write().push(CapturedCall {
            program: spec.program.clone(),
            args: spec.args.clone(),
            env: spec.env.clone(),
            workdir: spec.workdir.clone(),
        });

        if let Some(msg) = self.simulate_failure.read().clone() {
            return Err(RunnerError::ExecutionFailed(msg));
        }

        let response = self.next_response(&spec.args);
        let started_at = Utc::now();
        let finished_at = started_at + chrono::Duration::milliseconds(response.duration_ms as i64);

        Ok(ExecutionResult {
            command: spec.display(),
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            started_at,
            finished_at,
            duration_ms: response.duration_ms,
        })
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
