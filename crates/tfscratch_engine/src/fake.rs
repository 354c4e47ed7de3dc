//! In-memory provisioning engine for tests.
//!
//! Models a backend with a set of workspaces, a hidden "selected workspace"
//! pointer and a resource count per workspace, and follows Terraform's rules
//! for the operations it fakes: the active workspace cannot be deleted, a
//! workspace with resources cannot be deleted, and `plan` needs `init`.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::engine::ProvisioningEngine;
use crate::error::{EngineError, EngineResult};
use crate::workspace::WorkspaceName;

/// Operations of the [`ProvisioningEngine`] contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    CurrentWorkspace,
    SelectOrCreate,
    DeleteWorkspace,
    Initialize,
    Plan,
    Destroy,
}

/// Scripted behaviour for one invocation of an operation.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Exit non-zero with this output.
    Fail(String),
    /// Never complete.
    Hang,
    /// Panic with this message.
    Panic(String),
}

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCall {
    pub op: FakeOp,
    /// Workspace argument, if the operation takes one
    pub target: Option<String>,
    /// Selected workspace when the call started
    pub active: String,
}

#[derive(Debug)]
struct Backend {
    workspaces: BTreeSet<String>,
    active: String,
    resources: HashMap<String, u32>,
    initialized: bool,
    show_override: Option<String>,
    once: HashMap<FakeOp, VecDeque<Scripted>>,
    always: HashMap<FakeOp, Scripted>,
    calls: Vec<FakeCall>,
}

/// In-memory [`ProvisioningEngine`].
///
/// Cloning shares the backend, so a test can keep a handle while the
/// harness owns another.
#[derive(Clone)]
pub struct FakeEngine {
    definitions_dir: PathBuf,
    backend: Arc<RwLock<Backend>>,
}

impl FakeEngine {
    /// A backend containing only the `default` workspace, which is selected.
    pub fn new(definitions_dir: impl AsRef<Path>) -> Self {
        Self {
            definitions_dir: definitions_dir.as_ref().to_path_buf(),
            backend: Arc::new(RwLock::new(Backend {
                workspaces: BTreeSet::from([WorkspaceName::DEFAULT.to_string()]),
                active: WorkspaceName::DEFAULT.to_string(),
                resources: HashMap::new(),
                initialized: false,
                show_override: None,
                once: HashMap::new(),
                always: HashMap::new(),
                calls: Vec::new(),
            })),
        }
    }

    /// Add a workspace and select it, as if a human had been working in it.
    pub fn with_active_workspace(self, name: &str) -> Self {
        {
            let mut backend = self.backend.write();
            backend.workspaces.insert(name.to_string());
            backend.active = name.to_string();
        }
        self
    }

    /// Make `current_workspace` report this text regardless of the real selection.
    pub fn with_current_workspace_output(self, output: &str) -> Self {
        self.backend.write().show_override = Some(output.to_string());
        self
    }

    /// Pretend `count` resources exist in the given workspace.
    pub fn with_resources(self, workspace: &str, count: u32) -> Self {
        self.backend
            .write()
            .resources
            .insert(workspace.to_string(), count);
        self
    }

    /// Script the next `times` invocations of `op`.
    pub fn script(self, op: FakeOp, behaviour: Scripted, times: usize) -> Self {
        {
            let mut backend = self.backend.write();
            let queue = backend.once.entry(op).or_default();
            queue.extend(std::iter::repeat(behaviour).take(times));
        }
        self
    }

    /// Fail the next `times` invocations of `op` with `output`.
    pub fn fail_next(self, op: FakeOp, output: &str, times: usize) -> Self {
        self.script(op, Scripted::Fail(output.to_string()), times)
    }

    /// Fail every invocation of `op` after any one-shot scripts are used up.
    pub fn fail_always(self, op: FakeOp, output: &str) -> Self {
        self.backend
            .write()
            .always
            .insert(op, Scripted::Fail(output.to_string()));
        self
    }

    /// Make every invocation of `op` hang.
    pub fn hang_always(self, op: FakeOp) -> Self {
        self.backend.write().always.insert(op, Scripted::Hang);
        self
    }

    pub fn active_workspace(&self) -> String {
        self.backend.read().active.clone()
    }

    pub fn workspaces(&self) -> Vec<String> {
        self.backend.read().workspaces.iter().cloned().collect()
    }

    pub fn has_workspace(&self, name: &str) -> bool {
        self.backend.read().workspaces.contains(name)
    }

    pub fn resources_in(&self, workspace: &str) -> u32 {
        self.backend
            .read()
            .resources
            .get(workspace)
            .copied()
            .unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.backend.read().calls.clone()
    }

    pub fn ops(&self) -> Vec<FakeOp> {
        self.backend.read().calls.iter().map(|c| c.op).collect()
    }

    /// Snapshot of workspace → resource count, for state comparisons.
    pub fn snapshot(&self) -> (String, BTreeMap<String, u32>) {
        let backend = self.backend.read();
        let resources = backend
            .workspaces
            .iter()
            .map(|w| (w.clone(), backend.resources.get(w).copied().unwrap_or(0)))
            .collect();
        (backend.active.clone(), resources)
    }

    /// Record the call and apply any scripted behaviour for it.
    async fn enter(&self, op: FakeOp, target: Option<&str>) -> EngineResult<()> {
        let scripted = {
            let mut backend = self.backend.write();
            let call = FakeCall {
                op,
                target: target.map(str::to_string),
                active: backend.active.clone(),
            };
            backend.calls.push(call);
            match backend.once.get_mut(&op).and_then(VecDeque::pop_front) {
                Some(s) => Some(s),
                None => backend.always.get(&op).cloned(),
            }
        };

        match scripted {
            None => Ok(()),
            Some(Scripted::Fail(output)) => Err(failure(op, target, output)),
            Some(Scripted::Hang) => std::future::pending().await,
            Some(Scripted::Panic(message)) => panic!("{}", message),
        }
    }
}

fn command_for(op: FakeOp, target: Option<&str>) -> String {
    let base = match op {
        FakeOp::CurrentWorkspace => "terraform workspace show",
        FakeOp::SelectOrCreate => "terraform workspace select",
        FakeOp::DeleteWorkspace => "terraform workspace delete",
        FakeOp::Initialize => "terraform init",
        FakeOp::Plan => "terraform plan",
        FakeOp::Destroy => "terraform destroy",
    };
    match target {
        Some(t) => format!("{} {}", base, t),
        None => base.to_string(),
    }
}

fn failure(op: FakeOp, target: Option<&str>, output: impl Into<String>) -> EngineError {
    EngineError::CommandFailed {
        command: command_for(op, target),
        exit_code: 1,
        output: output.into(),
    }
}

#[async_trait]
impl ProvisioningEngine for FakeEngine {
    fn definitions_dir(&self) -> &Path {
        &self.definitions_dir
    }

    async fn current_workspace(&self) -> EngineResult<String> {
        self.enter(FakeOp::CurrentWorkspace, None).await?;
        let backend = self.backend.read();
        Ok(backend
            .show_override
            .clone()
            .unwrap_or_else(|| backend.active.clone()))
    }

    async fn select_or_create_workspace(
        &self,
        name: &WorkspaceName,
    ) -> EngineResult<WorkspaceName> {
        self.enter(FakeOp::SelectOrCreate, Some(name.as_str())).await?;
        let mut backend = self.backend.write();
        backend.workspaces.insert(name.to_string());
        backend.active = name.to_string();
        Ok(name.clone())
    }

    async fn delete_workspace(&self, name: &WorkspaceName) -> EngineResult<()> {
        let op = FakeOp::DeleteWorkspace;
        self.enter(op, Some(name.as_str())).await?;
        let mut backend = self.backend.write();

        if !backend.workspaces.contains(name.as_str()) {
            return Err(failure(
                op,
                Some(name.as_str()),
                format!("Workspace \"{}\" doesn't exist.", name),
            ));
        }
        if backend.active == name.as_str() {
            return Err(failure(
                op,
                Some(name.as_str()),
                format!("Workspace \"{}\" is your active workspace.", name),
            ));
        }
        if name.is_default() {
            return Err(failure(op, Some(name.as_str()), "Can't delete default state"));
        }
        if backend.resources.get(name.as_str()).copied().unwrap_or(0) > 0 {
            return Err(failure(
                op,
                Some(name.as_str()),
                format!("Workspace \"{}\" is currently tracking resources.", name),
            ));
        }

        backend.workspaces.remove(name.as_str());
        backend.resources.remove(name.as_str());
        Ok(())
    }

    async fn initialize(&self) -> EngineResult<()> {
        self.enter(FakeOp::Initialize, None).await?;
        if !self.definitions_dir.is_dir() {
            return Err(failure(
                FakeOp::Initialize,
                None,
                format!(
                    "Error: Failed to read directory {}",
                    self.definitions_dir.display()
                ),
            ));
        }
        self.backend.write().initialized = true;
        Ok(())
    }

    async fn plan(&self) -> EngineResult<()> {
        self.enter(FakeOp::Plan, None).await?;
        if !self.backend.read().initialized {
            return Err(failure(
                FakeOp::Plan,
                None,
                "Error: Inconsistent dependency lock file\n\nRun \"terraform init\".",
            ));
        }
        Ok(())
    }

    async fn destroy(&self) -> EngineResult<()> {
        self.enter(FakeOp::Destroy, None).await?;
        let mut backend = self.backend.write();
        let active = backend.active.clone();
        backend.resources.remove(&active);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> WorkspaceName {
        WorkspaceName::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_select_or_create_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FakeEngine::new(dir.path());

        engine.select_or_create_workspace(&name("scratch")).await.unwrap();
        assert_eq!(engine.active_workspace(), "scratch");

        let err = engine.delete_workspace(&name("scratch")).await.unwrap_err();
        assert!(err.output().unwrap().contains("active workspace"));

        engine.select_or_create_workspace(&name("default")).await.unwrap();
        engine.delete_workspace(&name("scratch")).await.unwrap();
        assert!(!engine.has_workspace("scratch"));
    }

    #[tokio::test]
    async fn test_plan_requires_init() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FakeEngine::new(dir.path());

        assert!(engine.plan().await.is_err());
        engine.initialize().await.unwrap();
        engine.plan().await.unwrap();
    }

    #[tokio::test]
    async fn test_destroy_clears_active_resources_only() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FakeEngine::new(dir.path())
            .with_resources("default", 4)
            .with_active_workspace("scratch")
            .with_resources("scratch", 2);

        engine.destroy().await.unwrap();

        assert_eq!(engine.resources_in("scratch"), 0);
        assert_eq!(engine.resources_in("default"), 4);
    }

    #[tokio::test]
    async fn test_scripted_failures_then_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FakeEngine::new(dir.path()).fail_next(FakeOp::Initialize, "boom", 1);

        let err = engine.initialize().await.unwrap_err();
        assert_eq!(err.output(), Some("boom"));
        engine.initialize().await.unwrap();
        assert_eq!(engine.ops(), vec![FakeOp::Initialize, FakeOp::Initialize]);
    }

    #[tokio::test]
    async fn test_show_override() {
        let engine = FakeEngine::new("/infra").with_current_workspace_output("");
        assert_eq!(engine.current_workspace().await.unwrap(), "");
        assert_eq!(engine.active_workspace(), "default");
    }
}
