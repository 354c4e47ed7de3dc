//! Container-wrapped command execution supporting Docker and Podman.
//!
//! The command's program becomes the container entrypoint and its working
//! directory is bind-mounted into the container, so state written by the
//! engine (`.terraform/`, local backend files) survives between invocations.
//!
//! Every container gets a unique `--name`. Killing the `docker`/`podman`
//! client does not stop the container it started, so on timeout, or when the
//! run future is dropped, the container is killed by name.

use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{CommandSpec, ContainerConfig, RunConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::process::{LogHandler, ProcessRunner, ProcessRunnerOptions};
use crate::runner::{CommandRunner, ExecutionResult};

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    Docker,
    Podman,
}

impl ContainerRuntime {
    /// Get the CLI command name.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }

    /// Detect an available runtime, trying `preferred` first.
    pub fn detect(preferred: Option<ContainerRuntime>) -> RunnerResult<ContainerRuntime> {
        if let Some(preferred) = preferred {
            if preferred.is_available() {
                return Ok(preferred);
            }
            warn!(
                "Preferred runtime {} not available, trying alternatives",
                preferred
            );
        }

        [Self::Docker, Self::Podman]
            .into_iter()
            .find(|runtime| runtime.is_available())
            .ok_or_else(|| {
                RunnerError::RuntimeNotAvailable(
                    "Neither Docker nor Podman is available".to_string(),
                )
            })
    }

    fn is_available(&self) -> bool {
        Command::new(self.command())
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl std::fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command())
    }
}

static CONTAINER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Default prefix of container names.
pub const CONTAINER_NAME_PREFIX: &str = "tfscratch";

/// Runs each command in a fresh, auto-removed, named container.
pub struct ContainerRunner {
    runtime: ContainerRuntime,
    container: ContainerConfig,
    process: ProcessRunner,
    name_prefix: String,
}

impl ContainerRunner {
    /// Create a runner with automatic runtime detection.
    pub fn new(
        container: ContainerConfig,
        preferred: Option<ContainerRuntime>,
        options: ProcessRunnerOptions,
    ) -> RunnerResult<Self> {
        let runtime = ContainerRuntime::detect(preferred)?;
        info!("Using container runtime: {}", runtime);
        Ok(Self::with_runtime(runtime, container, options))
    }

    /// Create a runner with a specific runtime.
    pub fn with_runtime(
        runtime: ContainerRuntime,
        container: ContainerConfig,
        options: ProcessRunnerOptions,
    ) -> Self {
        Self {
            runtime,
            container,
            process: ProcessRunner::new(options),
            name_prefix: CONTAINER_NAME_PREFIX.to_string(),
        }
    }

    /// Prefix for container names, e.g. the scratch workspace name.
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Set a log handler for streaming logs.
    pub fn with_log_handler(mut self, handler: LogHandler) -> Self {
        self.process = self.process.with_log_handler(handler);
        self
    }

    pub fn runtime(&self) -> ContainerRuntime {
        self.runtime
    }

    /// A container name not used before by this process.
    pub fn next_container_name(&self) -> String {
        let seq = CONTAINER_SEQ.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", self.name_prefix, std::process::id(), seq)
    }

    /// The runtime invocation that stops the named container.
    pub fn kill_spec(&self, name: &str) -> CommandSpec {
        CommandSpec::new(self.runtime.command()).args(["kill", name])
    }

    /// Translate a host command into the runtime's `run` invocation for a
    /// container called `name`.
    pub fn wrap(&self, spec: &CommandSpec, name: &str) -> RunnerResult<CommandSpec> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-i".to_string(),
            "--name".to_string(),
            name.to_string(),
        ];

        if self.container.pull_missing {
            args.push("--pull=missing".to_string());
        } else {
            args.push("--pull=never".to_string());
        }

        if let Some(workdir) = &spec.workdir {
            let source = workdir.canonicalize().map_err(|e| {
                RunnerError::InvalidMount(format!("{}: {}", workdir.display(), e))
            })?;
            args.push("-v".to_string());
            args.push(format!(
                "{}:{}",
                source.to_string_lossy(),
                self.container.workdir_mount
            ));
            args.push("-w".to_string());
            args.push(self.container.workdir_mount.clone());
        }

        for mount in &self.container.mounts {
            args.push("-v".to_string());
            args.push(mount.to_volume_arg());
        }

        let mut env: Vec<_> = self
            .container
            .env
            .iter()
            .chain(spec.env.iter())
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        env.sort();
        for pair in env {
            args.push("-e".to_string());
            args.push(pair);
        }

        if let Some(user) = &self.container.user {
            args.push("-u".to_string());
            args.push(user.clone());
        }

        if let Some(network) = &self.container.network_mode {
            args.push("--network".to_string());
            args.push(network.clone());
        }

        args.push("--entrypoint".to_string());
        args.push(spec.program.clone());
        args.push(self.container.full_image());
        args.extend(spec.args.iter().cloned());

        Ok(CommandSpec::new(self.runtime.command()).args(args))
    }
}

#[async_trait]
impl CommandRunner for ContainerRunner {
    async fn is_available(&self, _program: &str) -> RunnerResult<bool> {
        Ok(self.runtime.is_available())
    }

    async fn run(
        &self,
        spec: &CommandSpec,
        run_config: &RunConfig,
    ) -> RunnerResult<ExecutionResult> {
        let name = self.next_container_name();
        let wrapped = self.wrap(spec, &name)?;
        debug!(
            "Running `{}` in {} as {}",
            spec.display(),
            self.container.full_image(),
            name
        );

        let mut reaper = ContainerReaper::new(self.kill_spec(&name));
        let result = self.process.run(&wrapped, run_config).await;
        if matches!(result, Err(RunnerError::Timeout(_))) {
            reaper.kill().await;
        }
        reaper.disarm();
        result
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.runtime, self.container.full_image())
    }
}

/// Kills a named container unless disarmed; kills it in the background
/// when dropped while armed.
struct ContainerReaper {
    kill: CommandSpec,
    armed: bool,
}

impl ContainerReaper {
    fn new(kill: CommandSpec) -> Self {
        Self { kill, armed: true }
    }

    async fn kill(&mut self) {
        run_kill(self.kill.clone()).await;
        self.armed = false;
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerReaper {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let kill = self.kill.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(run_kill(kill));
            }
            Err(_) => {
                let _ = Command::new(&kill.program)
                    .args(&kill.args)
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status();
            }
        }
    }
}

async fn run_kill(kill: CommandSpec) {
    warn!("Stopping container: {}", kill.display());
    let status = tokio::process::Command::new(&kill.program)
        .args(&kill.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(s) if s.success() => {}
        // the container may already have exited and been removed
        Ok(s) => debug!("`{}` exited with {}", kill.display(), s),
        Err(e) => warn!("Failed to run `{}`: {}", kill.display(), e),
    }
}
