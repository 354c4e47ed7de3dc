//! Command and container configuration types.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A single program invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program to execute (looked up on PATH)
    pub program: String,
    /// Arguments passed to the program
    pub args: Vec<String>,
    /// Working directory for the process
    pub workdir: Option<PathBuf>,
    /// Extra environment variables
    pub env: HashMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn workdir(mut self, dir: impl AsRef<Path>) -> Self {
        self.workdir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: &HashMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Render the command line for logs.
    pub fn display(&self) -> String {
        let mut cmd = self.program.clone();
        for arg in &self.args {
            if arg.contains(' ') {
                cmd.push_str(&format!(" '{}'", arg));
            } else {
                cmd.push(' ');
                cmd.push_str(arg);
            }
        }
        cmd
    }
}

/// Container mount configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Host path to mount
    pub source: PathBuf,
    /// Container path to mount to
    pub target: String,
    /// Whether the mount is read-only
    pub read_only: bool,
}

impl MountConfig {
    pub fn new(source: PathBuf, target: impl Into<String>) -> Self {
        Self {
            source,
            target: target.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Format as a `-v` argument.
    pub fn to_volume_arg(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source.to_string_lossy(), self.target)
        } else {
            format!("{}:{}", self.source.to_string_lossy(), self.target)
        }
    }
}

/// Image and container settings for running commands inside a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Image to use
    pub image: String,
    /// Image tag (default: latest)
    pub tag: String,
    /// Where the command's working directory is mounted inside the container
    pub workdir_mount: String,
    /// Extra volume mounts
    pub mounts: Vec<MountConfig>,
    /// Environment variables applied to every command
    pub env: HashMap<String, String>,
    /// User to run as (e.g., "1000:1000")
    pub user: Option<String>,
    /// Network mode
    pub network_mode: Option<String>,
    /// Whether to pull the image when it is missing locally
    pub pull_missing: bool,
}

impl ContainerConfig {
    pub const TERRAFORM_IMAGE: &'static str = "hashicorp/terraform";
    pub const TERRAFORM_TAG: &'static str = "1.6";

    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            tag: "latest".to_string(),
            workdir_mount: "/workspace".to_string(),
            mounts: Vec::new(),
            env: HashMap::new(),
            user: None,
            network_mode: None,
            pull_missing: true,
        }
    }

    /// Official Terraform image.
    pub fn terraform() -> Self {
        Self::new(Self::TERRAFORM_IMAGE).tag(Self::TERRAFORM_TAG)
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn workdir_mount(mut self, target: impl Into<String>) -> Self {
        self.workdir_mount = target.into();
        self
    }

    pub fn mount(mut self, mount: MountConfig) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network_mode = Some(network.into());
        self
    }

    pub fn pull_missing(mut self, enabled: bool) -> Self {
        self.pull_missing = enabled;
        self
    }

    /// Get the full image name with tag.
    pub fn full_image(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

/// Per-invocation execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Timeout in seconds (0 = no timeout)
    pub timeout_seconds: u64,
    /// Whether to echo output lines while the command runs
    pub stream_logs: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 600, // 10 minutes
            stream_logs: false,
        }
    }
}

impl RunConfig {
    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn stream_logs(mut self, enabled: bool) -> Self {
        self.stream_logs = enabled;
        self
    }
}
