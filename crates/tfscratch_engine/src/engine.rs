//! The capability contract between the isolation lifecycle and a provisioning engine.

use std::path::Path;

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::workspace::WorkspaceName;

/// Operations the harness needs from a provisioning engine.
///
/// The engine's "currently selected workspace" is hidden global state owned
/// by the engine's backend. Implementations must serialize their own calls
/// against it; the switching operations return the workspace that is active
/// afterwards so callers track it as a value.
#[async_trait]
pub trait ProvisioningEngine: Send + Sync {
    /// Location of the infrastructure definitions under test.
    fn definitions_dir(&self) -> &Path;

    /// Raw name of the currently selected workspace. May be empty.
    async fn current_workspace(&self) -> EngineResult<String>;

    /// Select `name`, creating it first when it does not exist.
    async fn select_or_create_workspace(&self, name: &WorkspaceName)
        -> EngineResult<WorkspaceName>;

    /// Delete the named workspace. It must not be the active one.
    async fn delete_workspace(&self, name: &WorkspaceName) -> EngineResult<()>;

    /// Initialize the definitions (providers, modules, backend).
    async fn initialize(&self) -> EngineResult<()>;

    /// Compute a plan; the plan's content is not returned.
    async fn plan(&self) -> EngineResult<()>;

    /// Destroy everything tracked by the active workspace's state.
    async fn destroy(&self) -> EngineResult<()>;
}
