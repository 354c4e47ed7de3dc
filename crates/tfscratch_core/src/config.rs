//! Run configuration.
//!
//! A [`RunConfig`] can be built in code, read from YAML, or taken from
//! `TFSCRATCH_*` environment variables. It is immutable once a run starts.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tfscratch_engine::{PatternClassifier, RetryPolicy, TerraformDriver, TerraformOptions, WorkspaceName};
use tfscratch_runner::{
    CommandRunner, ContainerConfig, ContainerRunner, ContainerRuntime, ProcessRunner,
    ProcessRunnerOptions,
};

use crate::error::{ConfigError, ConfigResult};

pub const ENV_DIR: &str = "TFSCRATCH_DIR";
pub const ENV_PREFIX: &str = "TFSCRATCH_PREFIX";
pub const ENV_MAX_RETRIES: &str = "TFSCRATCH_MAX_RETRIES";
pub const ENV_RETRY_DELAY_SECS: &str = "TFSCRATCH_RETRY_DELAY_SECS";
pub const ENV_TERRAFORM_BIN: &str = "TFSCRATCH_TERRAFORM_BIN";
pub const ENV_CONTAINER_IMAGE: &str = "TFSCRATCH_CONTAINER_IMAGE";

/// Configuration of one sandbox run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Directory holding the Terraform definitions under test
    pub definitions_dir: PathBuf,
    /// Human-recognizable prefix of scratch workspace names
    #[serde(default = "default_prefix")]
    pub scratch_prefix: String,
    /// Restoration target when the ambient workspace cannot be discovered
    #[serde(default = "default_fallback")]
    pub fallback_workspace: String,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub engine: EngineSettings,
    /// Limit for a single engine invocation (0 = none)
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Limit for switch + init + plan together; cleanup is not counted
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
}

/// Retry budget and classification table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    /// Delay before each retry, in milliseconds
    pub time_between_retries_ms: u64,
    pub exponential_backoff: bool,
    /// Include the built-in transient error patterns
    pub default_patterns: bool,
    /// Extra regex → description entries
    pub retryable_errors: BTreeMap<String, String>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: RetryPolicy::DEFAULT_MAX_RETRIES,
            time_between_retries_ms: duration_ms(RetryPolicy::DEFAULT_TIME_BETWEEN_RETRIES),
            exponential_backoff: false,
            default_patterns: true,
            retryable_errors: BTreeMap::new(),
        }
    }
}

/// How Terraform is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub terraform_binary: String,
    pub vars: BTreeMap<String, String>,
    pub var_files: Vec<PathBuf>,
    pub backend_config: BTreeMap<String, String>,
    pub env: HashMap<String, String>,
    pub stream_logs: bool,
    /// Run Terraform inside a container instead of on the host
    pub container: Option<ContainerSettings>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            terraform_binary: "terraform".to_string(),
            vars: BTreeMap::new(),
            var_files: Vec::new(),
            backend_config: BTreeMap::new(),
            env: HashMap::new(),
            stream_logs: false,
            container: None,
        }
    }
}

/// Container image used when Terraform runs in a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    /// Preferred runtime; auto-detected when unset
    pub runtime: Option<ContainerRuntime>,
    pub image: String,
    pub tag: String,
    pub network: Option<String>,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            runtime: None,
            image: ContainerConfig::TERRAFORM_IMAGE.to_string(),
            tag: ContainerConfig::TERRAFORM_TAG.to_string(),
            network: None,
        }
    }
}

fn default_prefix() -> String {
    "tfscratch".to_string()
}

fn default_fallback() -> String {
    WorkspaceName::DEFAULT.to_string()
}

fn default_command_timeout() -> u64 {
    600
}

impl RunConfig {
    pub fn new(definitions_dir: impl AsRef<Path>) -> Self {
        Self {
            definitions_dir: definitions_dir.as_ref().to_path_buf(),
            scratch_prefix: default_prefix(),
            fallback_workspace: default_fallback(),
            retry: RetrySettings::default(),
            engine: EngineSettings::default(),
            command_timeout_secs: default_command_timeout(),
            run_timeout_secs: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.scratch_prefix = prefix.into();
        self
    }

    pub fn with_fallback_workspace(mut self, name: impl Into<String>) -> Self {
        self.fallback_workspace = name.into();
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.retry.max_retries = retries;
        self
    }

    pub fn with_time_between_retries(mut self, delay: Duration) -> Self {
        self.retry.time_between_retries_ms = duration_ms(delay);
        self
    }

    pub fn with_retryable_error(
        mut self,
        pattern: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.retry
            .retryable_errors
            .insert(pattern.into(), description.into());
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.engine.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_container(mut self, container: ContainerSettings) -> Self {
        self.engine.container = Some(container);
        self
    }

    pub fn with_command_timeout(mut self, seconds: u64) -> Self {
        self.command_timeout_secs = seconds;
        self
    }

    pub fn with_run_timeout(mut self, seconds: u64) -> Self {
        self.run_timeout_secs = Some(seconds);
        self
    }

    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML file. A relative `definitions_dir` is resolved against
    /// the file's directory.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&content)?;
        if config.definitions_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.definitions_dir = parent.join(&config.definitions_dir);
            }
        }
        Ok(config)
    }

    /// Build from `TFSCRATCH_*` environment variables. `TFSCRATCH_DIR` is required.
    pub fn from_env() -> ConfigResult<Self> {
        let dir = std::env::var(ENV_DIR).map_err(|_| ConfigError::Env {
            var: ENV_DIR.to_string(),
            message: "not set".to_string(),
        })?;

        let mut config = Self::new(dir);
        if let Ok(prefix) = std::env::var(ENV_PREFIX) {
            config.scratch_prefix = prefix;
        }
        if let Some(retries) = env_parse(ENV_MAX_RETRIES)? {
            config.retry.max_retries = retries;
        }
        if let Some(secs) = env_parse::<u64>(ENV_RETRY_DELAY_SECS)? {
            config.retry.time_between_retries_ms = secs.saturating_mul(1000);
        }
        if let Ok(binary) = std::env::var(ENV_TERRAFORM_BIN) {
            config.engine.terraform_binary = binary;
        }
        if let Ok(image) = std::env::var(ENV_CONTAINER_IMAGE) {
            let mut container = ContainerSettings::default();
            match image.rsplit_once(':') {
                Some((name, tag)) if !tag.contains('/') => {
                    container.image = name.to_string();
                    container.tag = tag.to_string();
                }
                _ => container.image = image,
            }
            config.engine.container = Some(container);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check names and patterns before any engine call is made.
    pub fn validate(&self) -> ConfigResult<()> {
        WorkspaceName::new(&self.scratch_prefix)
            .map_err(|e| ConfigError::Invalid(format!("scratch_prefix: {}", e)))?;
        self.fallback()?;
        PatternClassifier::from_table(&self.retry.retryable_errors)?;
        if self.engine.terraform_binary.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "engine.terraform_binary is empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn fallback(&self) -> ConfigResult<WorkspaceName> {
        WorkspaceName::new(&self.fallback_workspace)
            .map_err(|e| ConfigError::Invalid(format!("fallback_workspace: {}", e)))
    }

    pub fn retry_policy(&self) -> ConfigResult<RetryPolicy> {
        let mut classifier = PatternClassifier::from_table(&self.retry.retryable_errors)?;
        if self.retry.default_patterns {
            classifier = classifier.extend(PatternClassifier::default_transient());
        }
        Ok(RetryPolicy::new(Arc::new(classifier))
            .max_retries(self.retry.max_retries)
            .time_between_retries(Duration::from_millis(self.retry.time_between_retries_ms))
            .exponential_backoff(self.retry.exponential_backoff))
    }

    pub fn terraform_options(&self) -> TerraformOptions {
        let engine = &self.engine;
        let mut options = TerraformOptions::new(&self.definitions_dir)
            .binary(&engine.terraform_binary)
            .command_timeout(self.command_timeout_secs)
            .stream_logs(engine.stream_logs);
        options.vars = engine.vars.clone();
        options.var_files = engine.var_files.clone();
        options.backend_config = engine.backend_config.clone();
        options.env = engine.env.clone();
        options
    }

    /// Build the Terraform driver, on the host or in a container.
    pub fn terraform_driver(&self) -> ConfigResult<TerraformDriver> {
        let runner: Arc<dyn CommandRunner> = match &self.engine.container {
            Some(settings) => {
                let mut container = ContainerConfig::new(&settings.image).tag(&settings.tag);
                if let Some(network) = &settings.network {
                    container = container.network(network);
                }
                Arc::new(
                    ContainerRunner::new(
                        container,
                        settings.runtime,
                        ProcessRunnerOptions::default(),
                    )?
                    .with_name_prefix(&self.scratch_prefix),
                )
            }
            None => Arc::new(ProcessRunner::default()),
        };
        Ok(TerraformDriver::new(runner, self.terraform_options()))
    }
}

fn duration_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

fn env_parse<T>(var: &str) -> ConfigResult<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|e: T::Err| ConfigError::Env {
            var: var.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(None),
    }
}
