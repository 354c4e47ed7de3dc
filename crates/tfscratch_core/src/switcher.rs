//! Workspace switching.

use tracing::info;

use tfscratch_engine::{EngineResult, ProvisioningEngine, WorkspaceName};

/// Make `target` the active workspace, creating it if needed.
///
/// Returns the workspace the engine reports as active afterwards. Calling
/// this twice with the same target is the same as calling it once.
pub async fn switch_workspace(
    engine: &dyn ProvisioningEngine,
    target: &WorkspaceName,
) -> EngineResult<WorkspaceName> {
    let active = engine.select_or_create_workspace(target).await?;
    info!(workspace = %active, "Switched to workspace {}", active);
    Ok(active)
}
