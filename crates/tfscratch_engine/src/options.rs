//! Terraform invocation options and argument formatting.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// How to invoke Terraform for one definitions directory.
#[derive(Debug, Clone)]
pub struct TerraformOptions {
    /// Directory holding the `.tf` files under test
    pub definitions_dir: PathBuf,
    /// Terraform binary (or container entrypoint)
    pub binary: String,
    /// `-var` values passed to plan and destroy
    pub vars: BTreeMap<String, String>,
    /// `-var-file` paths passed to plan and destroy
    pub var_files: Vec<PathBuf>,
    /// `-backend-config` values passed to init
    pub backend_config: BTreeMap<String, String>,
    /// Extra environment for every invocation
    pub env: HashMap<String, String>,
    /// Per-invocation timeout in seconds (0 = none)
    pub command_timeout_secs: u64,
    /// Echo engine output while it runs
    pub stream_logs: bool,
}

impl TerraformOptions {
    pub fn new(definitions_dir: impl AsRef<Path>) -> Self {
        Self {
            definitions_dir: definitions_dir.as_ref().to_path_buf(),
            binary: "terraform".to_string(),
            vars: BTreeMap::new(),
            var_files: Vec::new(),
            backend_config: BTreeMap::new(),
            env: HashMap::new(),
            command_timeout_secs: 600,
            stream_logs: false,
        }
    }

    pub fn binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn var_file(mut self, path: impl AsRef<Path>) -> Self {
        self.var_files.push(path.as_ref().to_path_buf());
        self
    }

    pub fn backend_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.backend_config.insert(key.into(), value.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn command_timeout(mut self, seconds: u64) -> Self {
        self.command_timeout_secs = seconds;
        self
    }

    pub fn stream_logs(mut self, enabled: bool) -> Self {
        self.stream_logs = enabled;
        self
    }

    /// Environment applied to every invocation.
    pub fn environment(&self) -> HashMap<String, String> {
        let mut env = HashMap::from([
            ("TF_INPUT".to_string(), "0".to_string()),
            ("TF_IN_AUTOMATION".to_string(), "1".to_string()),
        ]);
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    pub fn init_args(&self) -> Vec<String> {
        let mut args = vec![
            "init".to_string(),
            "-input=false".to_string(),
            "-upgrade=false".to_string(),
        ];
        for (key, value) in &self.backend_config {
            args.push(format!("-backend-config={}={}", key, value));
        }
        args.push("-no-color".to_string());
        args
    }

    pub fn plan_args(&self) -> Vec<String> {
        let mut args = vec![
            "plan".to_string(),
            "-input=false".to_string(),
            "-lock=false".to_string(),
        ];
        self.push_var_args(&mut args);
        args.push("-no-color".to_string());
        args
    }

    pub fn destroy_args(&self) -> Vec<String> {
        let mut args = vec![
            "destroy".to_string(),
            "-auto-approve".to_string(),
            "-input=false".to_string(),
        ];
        self.push_var_args(&mut args);
        args.push("-no-color".to_string());
        args
    }

    fn push_var_args(&self, args: &mut Vec<String>) {
        for (key, value) in &self.vars {
            args.push("-var".to_string());
            args.push(format!("{}={}", key, value));
        }
        for file in &self.var_files {
            args.push("-var-file".to_string());
            args.push(file.to_string_lossy().into_owned());
        }
    }
}
