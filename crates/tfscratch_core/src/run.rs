//! The sandbox run controller.
//!
//! ```text
//! probe ambient → generate scratch → arm guard → switch(scratch) → init → plan
//!                                        └──────── restore on every exit ───────┘
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tracing::{error, info};

use tfscratch_engine::{ProvisioningEngine, RetryPolicy, WorkspaceName};

use crate::config::RunConfig;
use crate::error::{ConfigResult, HarnessError, HarnessResult, RunFailure};
use crate::guard::{CleanupReport, RestorationGuard};
use crate::identity::ScratchIdentity;
use crate::probe::probe_ambient_workspace;
use crate::switcher::switch_workspace;
use crate::validation::{run_validation, ValidationOutcome};

/// Everything observable about one run.
#[derive(Debug)]
pub struct RunReport {
    pub ambient: WorkspaceName,
    pub scratch: WorkspaceName,
    pub outcome: Result<ValidationOutcome, RunFailure>,
    pub cleanup: CleanupReport,
    pub duration: Duration,
}

impl RunReport {
    /// The verdict. Cleanup results do not take part in it.
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        self.outcome.as_ref().err()
    }

    /// The engine's native error output, if the run failed inside the engine.
    pub fn engine_output(&self) -> Option<&str> {
        self.failure().and_then(RunFailure::engine_output)
    }

    pub fn into_result(self) -> HarnessResult<RunReport> {
        match self.outcome {
            Ok(_) => Ok(self),
            Err(failure) => Err(HarnessError::RunFailed {
                ambient: self.ambient,
                scratch: self.scratch,
                failure,
            }),
        }
    }

    /// Panic with the failure and the engine's output unless the run passed.
    #[track_caller]
    pub fn assert_passed(&self) {
        if let Some(failure) = self.failure() {
            match self.engine_output() {
                Some(output) => panic!(
                    "sandbox run in {} failed: {}\n\n{}",
                    self.scratch, failure, output
                ),
                None => panic!("sandbox run in {} failed: {}", self.scratch, failure),
            }
        }
    }
}

/// One validation of one definitions directory in a throwaway workspace.
pub struct SandboxRun {
    engine: Arc<dyn ProvisioningEngine>,
    config: RunConfig,
    identity: ScratchIdentity,
    fallback: WorkspaceName,
    retry: RetryPolicy,
}

impl SandboxRun {
    pub fn new(engine: Arc<dyn ProvisioningEngine>, config: RunConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            identity: ScratchIdentity::new(&config.scratch_prefix)?,
            fallback: config.fallback()?,
            retry: config.retry_policy()?,
            engine,
            config,
        })
    }

    /// Replace the retry policy derived from the configuration.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run to completion.
    pub async fn execute(&self) -> RunReport {
        self.execute_until(std::future::pending::<()>()).await
    }

    /// Run until done or until `cancel` resolves, whichever comes first.
    ///
    /// Cleanup happens in both cases. A panic raised while switching or
    /// validating is resumed after cleanup.
    pub async fn execute_until<C>(&self, cancel: C) -> RunReport
    where
        C: Future<Output = ()>,
    {
        let started = Instant::now();

        let ambient = probe_ambient_workspace(&*self.engine, &self.fallback).await;
        let scratch = self.identity.generate(&[&ambient, &self.fallback]);
        info!(scratch = %scratch, "Temporary workspace: {}", scratch);

        let guard = RestorationGuard::arm(
            self.engine.clone(),
            ambient.clone(),
            scratch.clone(),
            self.retry.clone(),
        );

        let forward = AssertUnwindSafe(self.forward(&scratch)).catch_unwind();
        let deadline = async {
            match self.config.run_timeout_secs {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            result = forward => result,
            _ = cancel => {
                info!(scratch = %scratch, "Run cancelled");
                Ok(Err(RunFailure::Cancelled))
            }
            _ = deadline => {
                let secs = self.config.run_timeout_secs.unwrap_or_default();
                error!(scratch = %scratch, "Run exceeded {} seconds", secs);
                Ok(Err(RunFailure::TimedOut(secs)))
            }
        };

        let cleanup = guard.restore().await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(panic) => std::panic::resume_unwind(panic),
        };

        let report = RunReport {
            ambient,
            scratch,
            outcome,
            cleanup,
            duration: started.elapsed(),
        };

        match &report.outcome {
            Ok(_) => info!(
                scratch = %report.scratch,
                "PASS: definitions in {:?} initialize and plan cleanly ({:?})",
                self.config.definitions_dir,
                report.duration
            ),
            Err(failure) => error!(
                scratch = %report.scratch,
                "FAIL: {} ({:?})", failure, report.duration
            ),
        }
        if !report.cleanup.is_clean() {
            error!(
                scratch = %report.scratch,
                "Cleanup incomplete: {} step(s) failed",
                report.cleanup.failures().len()
            );
        }

        report
    }

    async fn forward(&self, scratch: &WorkspaceName) -> Result<ValidationOutcome, RunFailure> {
        switch_workspace(&*self.engine, scratch)
            .await
            .map_err(|source| RunFailure::Setup {
                workspace: scratch.clone(),
                source,
            })?;

        Ok(run_validation(&*self.engine, &self.retry).await?)
    }
}

/// Validate the definitions behind `engine` in a scratch workspace.
pub async fn run_sandbox(
    engine: Arc<dyn ProvisioningEngine>,
    config: RunConfig,
) -> HarnessResult<RunReport> {
    let run = SandboxRun::new(engine, config)?;
    run.execute().await.into_result()
}

/// Like [`run_sandbox`], using the Terraform driver described by `config`
/// and stopping early on Ctrl-C.
pub async fn run_terraform_sandbox(config: RunConfig) -> HarnessResult<RunReport> {
    let driver = config.terraform_driver()?;
    let run = SandboxRun::new(Arc::new(driver), config)?;
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    run.execute_until(ctrl_c).await.into_result()
}
