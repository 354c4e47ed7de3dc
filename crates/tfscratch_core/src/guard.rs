//! Restoration of the ambient workspace.
//!
//! The guard is armed as soon as the scratch name is known and performs,
//! in order, destroy → switch back → delete scratch. Each step is attempted
//! whatever happened to the previous one; failures are recorded and logged
//! but never change the run's verdict.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use tfscratch_engine::{ProvisioningEngine, RetryPolicy, WorkspaceName};

/// The three cleanup steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStep {
    DestroyResources,
    RestoreAmbient,
    DeleteScratch,
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DestroyResources => write!(f, "destroy resources"),
            Self::RestoreAmbient => write!(f, "restore ambient workspace"),
            Self::DeleteScratch => write!(f, "delete scratch workspace"),
        }
    }
}

/// Result of one cleanup step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    /// Not attempted because doing so would have touched the wrong workspace.
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: CleanupStep,
    pub outcome: StepOutcome,
}

/// What the guard did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub steps: Vec<StepRecord>,
}

impl CleanupReport {
    fn record(&mut self, step: CleanupStep, outcome: StepOutcome) {
        match &outcome {
            StepOutcome::Succeeded => info!(step = %step, "Cleanup step succeeded: {}", step),
            StepOutcome::Skipped(reason) => {
                warn!(step = %step, "Cleanup step skipped: {} ({})", step, reason)
            }
            StepOutcome::Failed(message) => {
                error!(step = %step, "Cleanup step failed: {}: {}", step, message)
            }
        }
        self.steps.push(StepRecord { step, outcome });
    }

    /// True when no step failed.
    pub fn is_clean(&self) -> bool {
        !self
            .steps
            .iter()
            .any(|r| matches!(r.outcome, StepOutcome::Failed(_)))
    }

    pub fn outcome(&self, step: CleanupStep) -> Option<&StepOutcome> {
        self.steps.iter().find(|r| r.step == step).map(|r| &r.outcome)
    }

    pub fn failures(&self) -> Vec<&StepRecord> {
        self.steps
            .iter()
            .filter(|r| matches!(r.outcome, StepOutcome::Failed(_)))
            .collect()
    }
}

/// Scoped cleanup for one scratch workspace.
///
/// Call [`restore`](Self::restore) on every exit path. If the guard is
/// dropped without having completed a restore (the owning future was
/// dropped), the same steps are spawned onto the current Tokio runtime.
pub struct RestorationGuard {
    engine: Arc<dyn ProvisioningEngine>,
    ambient: WorkspaceName,
    scratch: WorkspaceName,
    retry: RetryPolicy,
    armed: bool,
}

impl RestorationGuard {
    pub fn arm(
        engine: Arc<dyn ProvisioningEngine>,
        ambient: WorkspaceName,
        scratch: WorkspaceName,
        retry: RetryPolicy,
    ) -> Self {
        info!(
            ambient = %ambient,
            scratch = %scratch,
            "Restoration armed: {} will be restored and {} removed", ambient, scratch
        );
        Self {
            engine,
            ambient,
            scratch,
            retry,
            armed: true,
        }
    }

    pub fn ambient(&self) -> &WorkspaceName {
        &self.ambient
    }

    pub fn scratch(&self) -> &WorkspaceName {
        &self.scratch
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Run the cleanup steps and disarm.
    pub async fn restore(mut self) -> CleanupReport {
        let report = restore_steps(&*self.engine, &self.ambient, &self.scratch, &self.retry).await;
        self.armed = false;
        report
    }
}

impl Drop for RestorationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    scratch = %self.scratch,
                    "Run ended without restoring; cleaning up {} in the background", self.scratch
                );
                let engine = self.engine.clone();
                let ambient = self.ambient.clone();
                let scratch = self.scratch.clone();
                let retry = self.retry.clone();
                handle.spawn(async move {
                    restore_steps(&*engine, &ambient, &scratch, &retry).await;
                });
            }
            Err(_) => error!(
                scratch = %self.scratch,
                ambient = %self.ambient,
                "No async runtime left to clean up; scratch workspace {} was leaked", self.scratch
            ),
        }
    }
}

async fn restore_steps(
    engine: &dyn ProvisioningEngine,
    ambient: &WorkspaceName,
    scratch: &WorkspaceName,
    retry: &RetryPolicy,
) -> CleanupReport {
    let mut report = CleanupReport::default();

    // destroy acts on whatever workspace is selected, so make sure it is ours
    let destroy = match engine.current_workspace().await {
        Ok(current) if current.trim() == scratch.as_str() => {
            match retry.run("terraform destroy", || engine.destroy()).await {
                Ok(_) => StepOutcome::Succeeded,
                Err(e) => StepOutcome::Failed(e.to_string()),
            }
        }
        Ok(current) => StepOutcome::Skipped(format!(
            "active workspace is {:?}, not {}",
            current.trim(),
            scratch
        )),
        Err(e) => StepOutcome::Skipped(format!("could not confirm active workspace: {}", e)),
    };
    report.record(CleanupStep::DestroyResources, destroy);

    let switch_back = match engine.select_or_create_workspace(ambient).await {
        Ok(active) => {
            info!(ambient = %active, "Switched back to workspace {}", active);
            StepOutcome::Succeeded
        }
        Err(e) => StepOutcome::Failed(e.to_string()),
    };
    report.record(CleanupStep::RestoreAmbient, switch_back);

    let delete = match engine.delete_workspace(scratch).await {
        Ok(()) => StepOutcome::Succeeded,
        Err(e) => StepOutcome::Failed(e.to_string()),
    };
    report.record(CleanupStep::DeleteScratch, delete);

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tfscratch_engine::{FakeEngine, FakeOp};

    fn names() -> (WorkspaceName, WorkspaceName) {
        (
            WorkspaceName::new("staging").unwrap(),
            WorkspaceName::new("tfscratch-feedfacecafe").unwrap(),
        )
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::default().time_between_retries(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let (ambient, scratch) = names();
        let engine = FakeEngine::new(".")
            .with_active_workspace("staging")
            .with_active_workspace(scratch.as_str())
            .with_resources(scratch.as_str(), 3);

        let guard = RestorationGuard::arm(
            Arc::new(engine.clone()),
            ambient.clone(),
            scratch.clone(),
            policy(),
        );
        let report = guard.restore().await;

        assert!(report.is_clean());
        assert_eq!(
            engine.ops(),
            vec![
                FakeOp::CurrentWorkspace,
                FakeOp::Destroy,
                FakeOp::SelectOrCreate,
                FakeOp::DeleteWorkspace
            ]
        );
        assert_eq!(engine.active_workspace(), "staging");
        assert!(!engine.has_workspace(scratch.as_str()));
    }

    #[tokio::test]
    async fn test_failed_destroy_does_not_stop_later_steps() {
        let (ambient, scratch) = names();
        let engine = FakeEngine::new(".")
            .with_active_workspace("staging")
            .with_active_workspace(scratch.as_str())
            .fail_always(FakeOp::Destroy, "Error: deleting VPC: DependencyViolation");

        let report = RestorationGuard::arm(Arc::new(engine.clone()), ambient, scratch, policy())
            .restore()
            .await;

        assert!(matches!(
            report.outcome(CleanupStep::DestroyResources),
            Some(StepOutcome::Failed(_))
        ));
        assert_eq!(report.outcome(CleanupStep::RestoreAmbient), Some(&StepOutcome::Succeeded));
        assert_eq!(report.outcome(CleanupStep::DeleteScratch), Some(&StepOutcome::Succeeded));
        assert_eq!(report.failures().len(), 1);
        assert_eq!(engine.active_workspace(), "staging");
    }

    #[tokio::test]
    async fn test_destroy_skipped_when_scratch_not_active() {
        let (ambient, scratch) = names();
        let engine = FakeEngine::new(".")
            .with_active_workspace("staging")
            .with_resources("staging", 7);

        let report = RestorationGuard::arm(Arc::new(engine.clone()), ambient, scratch, policy())
            .restore()
            .await;

        assert!(matches!(
            report.outcome(CleanupStep::DestroyResources),
            Some(StepOutcome::Skipped(_))
        ));
        assert_eq!(engine.resources_in("staging"), 7);
        assert!(!engine.ops().contains(&FakeOp::Destroy));
    }

    #[tokio::test]
    async fn test_dropped_guard_cleans_up_in_background() {
        let (ambient, scratch) = names();
        let engine = FakeEngine::new(".")
            .with_active_workspace("staging")
            .with_active_workspace(scratch.as_str());

        let guard = RestorationGuard::arm(Arc::new(engine.clone()), ambient, scratch.clone(), policy());
        assert!(guard.is_armed());
        drop(guard);

        for _ in 0..100 {
            if !engine.has_workspace(scratch.as_str()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(engine.active_workspace(), "staging");
        assert!(!engine.has_workspace(scratch.as_str()));
    }
}
