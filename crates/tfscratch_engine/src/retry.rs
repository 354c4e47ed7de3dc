//! Retry policy for engine invocations.
//!
//! Whether an error is worth retrying is decided by an injected
//! [`RetryClassifier`]; the policy itself only owns the attempt budget and
//! the backoff schedule.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult, RetryError};

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Fail,
}

/// Classifies engine errors as transient or fatal.
#[cfg_attr(test, mockall::automock)]
pub trait RetryClassifier: Send + Sync {
    fn classify(&self, error: &EngineError) -> RetryDecision;
}

/// Matches the engine's output against a table of regular expressions.
///
/// Runner timeouts are always retryable; errors without engine output
/// (spawn failures, invalid names) never are.
#[derive(Debug, Clone, Default)]
pub struct PatternClassifier {
    patterns: Vec<(Regex, String)>,
}

/// Engine-level transient failures, independent of any cloud provider.
const TRANSIENT_ERRORS: &[(&str, &str)] = &[
    (
        r"(?i)connection reset by peer",
        "Connection reset while talking to a remote API.",
    ),
    (
        r"(?i)TLS handshake timeout",
        "TLS handshake timed out while talking to a remote API.",
    ),
    (
        r"(?i)i/o timeout",
        "Network I/O timed out.",
    ),
    (
        r"(?i)registry service is unreachable",
        "Terraform registry could not be reached.",
    ),
    (
        r"(?i)could not query provider registry",
        "Failed to query the provider registry.",
    ),
    (
        r"(?i)Failed to install provider",
        "Provider download failed due to a transient network error.",
    ),
    (
        r"(?i)timeout while waiting for plugin to start",
        "Provider plugin did not start in time.",
    ),
    (
        r"(?i)(rate exceeded|too many requests|throttl)",
        "Remote API rate limit hit.",
    ),
    (
        r"(?i)Error acquiring the state lock",
        "Backend state is locked by another operation.",
    ),
];

impl PatternClassifier {
    /// Create a classifier with no patterns.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifier preloaded with engine-level transient failures.
    pub fn default_transient() -> Self {
        let patterns = TRANSIENT_ERRORS
            .iter()
            .filter_map(|(pattern, description)| {
                Regex::new(pattern)
                    .ok()
                    .map(|re| (re, description.to_string()))
            })
            .collect();
        Self { patterns }
    }

    /// Build a classifier from a pattern → description table.
    pub fn from_table(table: &BTreeMap<String, String>) -> EngineResult<Self> {
        table
            .iter()
            .try_fold(Self::new(), |classifier, (pattern, description)| {
                classifier.with_pattern(pattern, description)
            })
    }

    /// Add a retryable pattern.
    pub fn with_pattern(
        mut self,
        pattern: &str,
        description: impl Into<String>,
    ) -> EngineResult<Self> {
        self.patterns.push((Regex::new(pattern)?, description.into()));
        Ok(self)
    }

    /// Append every pattern of `other`.
    pub fn extend(mut self, other: PatternClassifier) -> Self {
        self.patterns.extend(other.patterns);
        self
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Description of the first pattern matching `output`.
    pub fn matching(&self, output: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(re, _)| re.is_match(output))
            .map(|(_, description)| description.as_str())
    }
}

impl RetryClassifier for PatternClassifier {
    fn classify(&self, error: &EngineError) -> RetryDecision {
        match error {
            EngineError::Runner(inner) if inner.is_timeout() => RetryDecision::Retry,
            EngineError::CommandFailed { output, .. } => match self.matching(output) {
                Some(_) => RetryDecision::Retry,
                None => RetryDecision::Fail,
            },
            _ => RetryDecision::Fail,
        }
    }
}

/// Bounded retries with fixed or exponential backoff.
#[derive(Clone)]
pub struct RetryPolicy {
    classifier: Arc<dyn RetryClassifier>,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub time_between_retries: Duration,
    /// Double the delay after every retry
    pub exponential_backoff: bool,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("time_between_retries", &self.time_between_retries)
            .field("exponential_backoff", &self.exponential_backoff)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Arc::new(PatternClassifier::default_transient()))
    }
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_TIME_BETWEEN_RETRIES: Duration = Duration::from_secs(5);

    pub fn new(classifier: Arc<dyn RetryClassifier>) -> Self {
        Self {
            classifier,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            time_between_retries: Self::DEFAULT_TIME_BETWEEN_RETRIES,
            exponential_backoff: false,
        }
    }

    /// A policy that runs every operation exactly once.
    pub fn none() -> Self {
        Self::new(Arc::new(PatternClassifier::new())).max_retries(0)
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn time_between_retries(mut self, delay: Duration) -> Self {
        self.time_between_retries = delay;
        self
    }

    pub fn exponential_backoff(mut self, enabled: bool) -> Self {
        self.exponential_backoff = enabled;
        self
    }

    pub fn classify(&self, error: &EngineError) -> RetryDecision {
        self.classifier.classify(error)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        if self.exponential_backoff {
            let factor = 2u32.saturating_pow(retry.saturating_sub(1));
            self.time_between_retries.saturating_mul(factor)
        } else {
            self.time_between_retries
        }
    }

    /// Run `op` until it succeeds, fails fatally, or the budget runs out.
    ///
    /// Returns the value and the number of attempts it took.
    pub async fn run<T, F, Fut>(&self, description: &str, mut op: F) -> Result<(T, u32), RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut attempt = 1;
        loop {
            let error = match op().await {
                Ok(value) => return Ok((value, attempt)),
                Err(error) => error,
            };

            if self.classify(&error) == RetryDecision::Fail {
                return Err(RetryError::Fatal {
                    description: description.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }

            if attempt > self.max_retries {
                return Err(RetryError::Exhausted {
                    description: description.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.delay_for(attempt);
            warn!(
                attempt,
                "{} hit a retryable error; retrying in {:?}: {}",
                description,
                delay,
                first_line(&error)
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
            info!(attempt, "Retrying {}", description);
        }
    }
}

fn first_line(error: &EngineError) -> String {
    let text = error.output().map(str::to_string).unwrap_or_else(|| error.to_string());
    text.lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or_default()
        .to_string()
}
