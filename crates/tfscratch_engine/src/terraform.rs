//! Terraform driver.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use tfscratch_runner::{CommandRunner, CommandSpec, ExecutionResult, RunConfig, RunnerError};

use crate::engine::ProvisioningEngine;
use crate::error::{EngineError, EngineResult};
use crate::options::TerraformOptions;
use crate::workspace::WorkspaceName;

/// Drives the Terraform CLI through a [`CommandRunner`].
pub struct TerraformDriver {
    runner: Arc<dyn CommandRunner>,
    options: TerraformOptions,
    // Held for the whole of each engine operation so that the selected
    // workspace cannot change between e.g. `workspace list` and `select`.
    selection: Mutex<()>,
}

impl TerraformDriver {
    /// Create a new Terraform driver.
    pub fn new(runner: Arc<dyn CommandRunner>, options: TerraformOptions) -> Self {
        Self {
            runner,
            options,
            selection: Mutex::new(()),
        }
    }

    pub fn options(&self) -> &TerraformOptions {
        &self.options
    }

    /// Check that the Terraform binary can be executed.
    pub async fn is_available(&self) -> EngineResult<bool> {
        Ok(self.runner.is_available(&self.options.binary).await?)
    }

    /// Names of all workspaces known to the backend.
    pub async fn list_workspaces(&self) -> EngineResult<Vec<String>> {
        let _guard = self.selection.lock().await;
        self.list_workspaces_locked().await
    }

    async fn list_workspaces_locked(&self) -> EngineResult<Vec<String>> {
        let result = self.run_checked(&["workspace", "list"]).await?;
        Ok(parse_workspace_list(&result.stdout))
    }

    fn spec<S: AsRef<str>>(&self, args: &[S]) -> CommandSpec {
        CommandSpec::new(&self.options.binary)
            .args(args.iter().map(|a| a.as_ref().to_string()))
            .workdir(&self.options.definitions_dir)
            .envs(&self.options.environment())
    }

    /// Run a command and return its result regardless of exit code.
    async fn run_command<S: AsRef<str>>(&self, args: &[S]) -> EngineResult<ExecutionResult> {
        let spec = self.spec(args);
        let run_config = RunConfig::default()
            .timeout(self.options.command_timeout_secs)
            .stream_logs(self.options.stream_logs);

        debug!("Executing {} via {}", spec.display(), self.runner.describe());

        match self.runner.run(&spec, &run_config).await {
            Ok(result) => Ok(result),
            Err(RunnerError::SpawnFailed { program, source })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                Err(EngineError::Unavailable(program))
            }
            Err(RunnerError::RuntimeNotAvailable(message)) => Err(EngineError::Unavailable(message)),
            Err(e) => Err(e.into()),
        }
    }

    /// Run a command and turn a non-zero exit into [`EngineError::CommandFailed`].
    async fn run_checked<S: AsRef<str>>(&self, args: &[S]) -> EngineResult<ExecutionResult> {
        let result = self.run_command(args).await?;
        if result.success() {
            Ok(result)
        } else {
            Err(EngineError::CommandFailed {
                command: result.command.clone(),
                exit_code: result.exit_code,
                output: result.combined_output(),
            })
        }
    }
}

/// Parse `terraform workspace list` output, dropping the `*` selection marker.
pub fn parse_workspace_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.trim().trim_start_matches('*').trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl ProvisioningEngine for TerraformDriver {
    fn definitions_dir(&self) -> &Path {
        &self.options.definitions_dir
    }

    async fn current_workspace(&self) -> EngineResult<String> {
        let _guard = self.selection.lock().await;
        let result = self.run_checked(&["workspace", "show"]).await?;
        Ok(result.stdout.trim().to_string())
    }

    async fn select_or_create_workspace(
        &self,
        name: &WorkspaceName,
    ) -> EngineResult<WorkspaceName> {
        let _guard = self.selection.lock().await;

        let existing = self.list_workspaces_locked().await?;
        if existing.iter().any(|w| w == name.as_str()) {
            info!("Selecting workspace {}", name);
            self.run_checked(&["workspace", "select", name.as_str()]).await?;
        } else {
            info!("Creating workspace {}", name);
            self.run_checked(&["workspace", "new", name.as_str()]).await?;
        }

        Ok(name.clone())
    }

    async fn delete_workspace(&self, name: &WorkspaceName) -> EngineResult<()> {
        let _guard = self.selection.lock().await;
        info!("Deleting workspace {}", name);
        self.run_checked(&["workspace", "delete", name.as_str()]).await?;
        Ok(())
    }

    async fn initialize(&self) -> EngineResult<()> {
        let _guard = self.selection.lock().await;
        info!("Running terraform init in {:?}", self.options.definitions_dir);
        self.run_checked(&self.options.init_args()).await?;
        Ok(())
    }

    async fn plan(&self) -> EngineResult<()> {
        let _guard = self.selection.lock().await;
        info!("Running terraform plan in {:?}", self.options.definitions_dir);
        self.run_checked(&self.options.plan_args()).await?;
        Ok(())
    }

    async fn destroy(&self) -> EngineResult<()> {
        let _guard = self.selection.lock().await;
        info!("Running terraform destroy in {:?}", self.options.definitions_dir);
        self.run_checked(&self.options.destroy_args()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfscratch_runner::{MockResponse, MockRunner};

    fn driver(mock: &MockRunner) -> TerraformDriver {
        TerraformDriver::new(Arc::new(mock.clone()), TerraformOptions::new("/infra"))
    }

    #[test]
    fn test_parse_workspace_list() {
        let output = "  default\n* staging\n  tfscratch-abc\n\n";
        assert_eq!(
            parse_workspace_list(output),
            vec!["default", "staging", "tfscratch-abc"]
        );
    }

    #[tokio::test]
    async fn test_current_workspace_is_trimmed() {
        let mock = MockRunner::new()
            .respond_once(&["workspace", "show"], MockResponse::success("staging\n"));

        assert_eq!(driver(&mock).current_workspace().await.unwrap(), "staging");
    }

    #[tokio::test]
    async fn test_select_existing_workspace() {
        let mock = MockRunner::new().respond_once(
            &["workspace", "list"],
            MockResponse::success("* default\n  staging\n"),
        );
        let name = WorkspaceName::new("staging").unwrap();

        let active = driver(&mock).select_or_create_workspace(&name).await.unwrap();

        assert_eq!(active, name);
        assert_eq!(
            mock.command_lines(),
            vec!["workspace list", "workspace select staging"]
        );
    }

    #[tokio::test]
    async fn test_create_missing_workspace() {
        let mock = MockRunner::new()
            .respond_once(&["workspace", "list"], MockResponse::success("* default\n"));
        let name = WorkspaceName::new("tfscratch-0123456789ab").unwrap();

        driver(&mock).select_or_create_workspace(&name).await.unwrap();

        assert!(mock.was_called(&["workspace", "new", "tfscratch-0123456789ab"]));
        assert!(!mock.was_called(&["workspace", "select"]));
    }

    #[tokio::test]
    async fn test_failure_carries_engine_output() {
        let stderr = "Error: Unsupported argument\n\n  on main.tf line 4";
        let mock = MockRunner::new().respond_once(&["init"], MockResponse::failure(1, stderr));

        let err = driver(&mock).initialize().await.unwrap_err();

        assert_eq!(err.output(), Some(stderr));
        match err {
            EngineError::CommandFailed { command, exit_code, .. } => {
                assert!(command.starts_with("terraform init"));
                assert_eq!(exit_code, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_commands_run_in_definitions_dir_with_automation_env() {
        let mock = MockRunner::new();
        driver(&mock).plan().await.unwrap();

        let call = &mock.get_calls()[0];
        assert_eq!(call.program, "terraform");
        assert_eq!(call.workdir.as_deref(), Some(Path::new("/infra")));
        assert_eq!(call.env.get("TF_IN_AUTOMATION"), Some(&"1".to_string()));
        assert_eq!(call.args[0], "plan");
    }

    #[tokio::test]
    async fn test_runner_error_is_wrapped() {
        let mock = MockRunner::new().simulate_failure("spawn failed");
        let err = driver(&mock).destroy().await.unwrap_err();

        assert!(matches!(err, EngineError::Runner(_)));
        assert!(err.output().is_none());
    }
}
