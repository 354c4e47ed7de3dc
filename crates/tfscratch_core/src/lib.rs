//! # tfscratch_core
//!
//! Disposable-workspace lifecycle for validating Terraform definitions.
//!
//! A run records the workspace that is active before it starts, switches to
//! a freshly named scratch workspace, checks that the definitions initialize
//! and plan, then always destroys what it created, switches back and deletes
//! the scratch workspace.
//!
//! # Architecture
//!
//! - **Probe**: finds the ambient workspace, falling back to `default`
//! - **Identity**: generates collision-resistant scratch names
//! - **Switcher**: idempotent select-or-create
//! - **Validation**: init then plan, with a pluggable retry policy
//! - **Guard**: ordered cleanup on every exit path
//! - **Run**: ties the above together and produces a [`RunReport`]
//!
//! # Example
//!
//! ```rust,ignore
//! use tfscratch_core::{logging, run_terraform_sandbox, RunConfig};
//!
//! #[tokio::test]
//! async fn network_module_plans() {
//!     logging::init_for_tests();
//!     let config = RunConfig::new("../modules/network")
//!         .with_var("region", "eu-west-1")
//!         .with_retryable_error(".*TLS handshake timeout.*", "TLS handshake timeout");
//!
//!     run_terraform_sandbox(config).await.unwrap().assert_passed();
//! }
//! ```

pub mod config;
pub mod error;
pub mod guard;
pub mod identity;
pub mod logging;
pub mod probe;
pub mod run;
pub mod switcher;
pub mod validation;

pub use config::{ContainerSettings, EngineSettings, RetrySettings, RunConfig};
pub use error::{
    ConfigError, ConfigResult, HarnessError, HarnessResult, RunFailure, ValidationFailure,
};
pub use guard::{CleanupReport, CleanupStep, RestorationGuard, StepOutcome, StepRecord};
pub use identity::ScratchIdentity;
pub use probe::probe_ambient_workspace;
pub use run::{run_sandbox, run_terraform_sandbox, RunReport, SandboxRun};
pub use switcher::switch_workspace;
pub use validation::{run_validation, ValidationOutcome, ValidationStage};

pub use tfscratch_engine::{ProvisioningEngine, RetryPolicy, WorkspaceName};
