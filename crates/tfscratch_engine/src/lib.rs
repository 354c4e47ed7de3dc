//! # tfscratch_engine
//!
//! The provisioning-engine side of tfscratch.
//!
//! This crate defines the capability contract the isolation lifecycle needs
//! from a provisioning engine ([`ProvisioningEngine`]), a Terraform
//! implementation of it driven through any
//! [`CommandRunner`](tfscratch_runner::CommandRunner), the pluggable
//! [`RetryPolicy`], and an in-memory [`FakeEngine`] for tests.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tfscratch_engine::{ProvisioningEngine, TerraformDriver, TerraformOptions, WorkspaceName};
//! use tfscratch_runner::ProcessRunner;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = TerraformDriver::new(
//!     Arc::new(ProcessRunner::default()),
//!     TerraformOptions::new("./infrastructure"),
//! );
//!
//! println!("current: {}", driver.current_workspace().await?);
//! driver.select_or_create_workspace(&WorkspaceName::new("review-42")?).await?;
//! driver.initialize().await?;
//! driver.plan().await?;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod fake;
pub mod options;
pub mod retry;
pub mod terraform;
pub mod workspace;

pub use engine::ProvisioningEngine;
pub use error::{EngineError, EngineResult, RetryError};
pub use fake::{FakeCall, FakeEngine, FakeOp, Scripted};
pub use options::TerraformOptions;
pub use retry::{PatternClassifier, RetryClassifier, RetryDecision, RetryPolicy};
pub use terraform::TerraformDriver;
pub use workspace::WorkspaceName;
