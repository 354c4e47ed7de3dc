//! Init + plan inside the active workspace.

use std::fmt;

use serde::Serialize;
use tracing::{error, info};

use tfscratch_engine::{ProvisioningEngine, RetryPolicy};

use crate::error::ValidationFailure;

/// Which engine operation a validation failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStage {
    Init,
    Plan,
}

impl fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Plan => write!(f, "plan"),
        }
    }
}

/// Attempts each stage needed to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub init_attempts: u32,
    pub plan_attempts: u32,
}

/// Initialize and plan the definitions, absorbing transient errors.
///
/// Only the fact that a plan could be computed matters; its content is
/// never looked at.
pub async fn run_validation(
    engine: &dyn ProvisioningEngine,
    retry: &RetryPolicy,
) -> Result<ValidationOutcome, ValidationFailure> {
    let dir = engine.definitions_dir();
    if !dir.is_dir() {
        error!("Definitions directory {:?} does not exist", dir);
        return Err(ValidationFailure::MissingDefinitions(dir.to_path_buf()));
    }

    let init_attempts = run_stage(ValidationStage::Init, retry, || engine.initialize()).await?;
    let plan_attempts = run_stage(ValidationStage::Plan, retry, || engine.plan()).await?;

    Ok(ValidationOutcome {
        init_attempts,
        plan_attempts,
    })
}

async fn run_stage<F, Fut>(
    stage: ValidationStage,
    retry: &RetryPolicy,
    op: F,
) -> Result<u32, ValidationFailure>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = tfscratch_engine::EngineResult<()>>,
{
    info!(stage = %stage, "Running terraform {}", stage);
    match retry.run(&format!("terraform {}", stage), op).await {
        Ok(((), attempts)) => {
            info!(stage = %stage, attempts, "terraform {} succeeded", stage);
            Ok(attempts)
        }
        Err(source) => {
            error!(
                stage = %stage,
                attempts = source.attempts(),
                "terraform {} failed:\n{}",
                stage,
                source
                    .last_error()
                    .output()
                    .map(str::to_string)
                    .unwrap_or_else(|| source.last_error().to_string())
            );
            Err(ValidationFailure::Stage { stage, source })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tfscratch_engine::{FakeEngine, FakeOp};

    fn policy() -> RetryPolicy {
        RetryPolicy::default().time_between_retries(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_init_then_plan() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FakeEngine::new(dir.path());

        let outcome = run_validation(&engine, &policy()).await.unwrap();

        assert_eq!(outcome, ValidationOutcome { init_attempts: 1, plan_attempts: 1 });
        assert_eq!(engine.ops(), vec![FakeOp::Initialize, FakeOp::Plan]);
    }

    #[tokio::test]
    async fn test_missing_directory_fails_before_engine() {
        let engine = FakeEngine::new("/definitely/not/here");

        let err = run_validation(&engine, &policy()).await.unwrap_err();

        assert!(matches!(err, ValidationFailure::MissingDefinitions(_)));
        assert!(engine.ops().is_empty());
    }

    #[tokio::test]
    async fn test_init_failure_skips_plan() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FakeEngine::new(dir.path())
            .fail_always(FakeOp::Initialize, "Error: Unreadable module directory");

        let err = run_validation(&engine, &policy()).await.unwrap_err();

        assert!(matches!(
            err,
            ValidationFailure::Stage { stage: ValidationStage::Init, .. }
        ));
        assert_eq!(err.engine_output(), Some("Error: Unreadable module directory"));
        assert!(!engine.ops().contains(&FakeOp::Plan));
    }
}
