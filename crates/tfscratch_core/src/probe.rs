//! Ambient workspace discovery.

use tracing::{info, warn};

use tfscratch_engine::{ProvisioningEngine, WorkspaceName};

/// Find the workspace that is active before the run touches anything.
///
/// Never fails: an engine error, an empty answer, or an unusable name all
/// resolve to `fallback`, which is always a valid restoration target.
pub async fn probe_ambient_workspace(
    engine: &dyn ProvisioningEngine,
    fallback: &WorkspaceName,
) -> WorkspaceName {
    let raw = match engine.current_workspace().await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(
                fallback = %fallback,
                "Could not query the current workspace, assuming the fallback: {}", e
            );
            return fallback.clone();
        }
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        warn!(fallback = %fallback, "Current workspace is empty, assuming the fallback");
        return fallback.clone();
    }

    match WorkspaceName::new(trimmed) {
        Ok(name) => {
            info!(ambient = %name, "Original workspace: {}", name);
            name
        }
        Err(e) => {
            warn!(fallback = %fallback, "Ignoring current workspace: {}", e);
            fallback.clone()
        }
    }
}
