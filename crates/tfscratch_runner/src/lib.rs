//! # tfscratch_runner
//!
//! Command execution layer for tfscratch.
//!
//! Every provisioning-engine invocation goes through a [`CommandRunner`],
//! either directly on the host or wrapped in a Docker/Podman container.
//!
//! # Features
//!
//! - **Host processes**: [`ProcessRunner`] spawns the engine binary with captured output
//! - **Containers**: [`ContainerRunner`] runs the same command inside an image
//! - **Runtime Detection**: Auto-detect Docker vs Podman
//! - **CI Integration**: Timestamped log lines compatible with CI log viewers
//! - **Mock Runner**: For testing without spawning anything
//!
//! # Example
//!
//! ```rust,no_run
//! use tfscratch_runner::{CommandRunner, CommandSpec, ProcessRunner, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = ProcessRunner::default();
//!
//!     let spec = CommandSpec::new("terraform")
//!         .args(["workspace", "show"])
//!         .workdir("./infrastructure");
//!
//!     let result = runner.run(&spec, &RunConfig::default()).await?;
//!     println!("Active workspace: {}", result.stdout.trim());
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod container;
pub mod error;
pub mod mock;
pub mod process;
pub mod runner;

pub use config::{CommandSpec, ContainerConfig, MountConfig, RunConfig};
pub use container::{ContainerRunner, ContainerRuntime};
pub use error::{RunnerError, RunnerResult};
pub use mock::{CapturedCall, MockResponse, MockRunner};
pub use process::{LogHandler, LogLine, LogStream, ProcessRunner, ProcessRunnerOptions};
pub use runner::{CommandRunner, ExecutionResult};
