//! End-to-end lifecycle tests against the in-memory engine.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use mockall::predicate::always;
use tempfile::TempDir;

use tfscratch_core::{
    logging, run_sandbox, CleanupStep, HarnessError, RunConfig, RunFailure, SandboxRun,
    StepOutcome, ValidationFailure, ValidationStage,
};
use tfscratch_engine::{
    EngineError, FakeEngine, FakeOp, RetryClassifier, RetryDecision, RetryPolicy, Scripted,
};

mockall::mock! {
    Classifier {}
    impl RetryClassifier for Classifier {
        fn classify(&self, error: &EngineError) -> RetryDecision;
    }
}

fn definitions() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("main.tf"), "terraform {}\n").unwrap();
    dir
}

fn config(dir: &TempDir) -> RunConfig {
    RunConfig::new(dir.path()).with_time_between_retries(Duration::ZERO)
}

fn staging(dir: &TempDir) -> FakeEngine {
    FakeEngine::new(dir.path()).with_active_workspace("staging")
}

fn run(engine: &FakeEngine, config: RunConfig) -> SandboxRun {
    SandboxRun::new(Arc::new(engine.clone()), config).unwrap()
}

/// Operations of the last `n` calls.
fn tail(engine: &FakeEngine, n: usize) -> Vec<FakeOp> {
    let ops = engine.ops();
    ops[ops.len().saturating_sub(n)..].to_vec()
}

const CLEANUP_SEQUENCE: [FakeOp; 4] = [
    FakeOp::CurrentWorkspace,
    FakeOp::Destroy,
    FakeOp::SelectOrCreate,
    FakeOp::DeleteWorkspace,
];

#[tokio::test]
async fn test_valid_definitions_pass_and_restore() {
    logging::init_for_tests();
    let dir = definitions();
    let engine = staging(&dir);

    let report = run(&engine, config(&dir)).execute().await;

    report.assert_passed();
    assert_eq!(report.ambient, "staging");
    assert!(report.scratch.as_str().starts_with("tfscratch-"));
    assert!(report.cleanup.is_clean());
    assert_eq!(engine.active_workspace(), "staging");
    assert!(!engine.has_workspace(report.scratch.as_str()));
    assert_eq!(
        engine.ops(),
        vec![
            FakeOp::CurrentWorkspace,
            FakeOp::SelectOrCreate,
            FakeOp::Initialize,
            FakeOp::Plan,
            FakeOp::CurrentWorkspace,
            FakeOp::Destroy,
            FakeOp::SelectOrCreate,
            FakeOp::DeleteWorkspace,
        ]
    );
}

#[tokio::test]
async fn test_validation_happens_in_scratch_workspace() {
    let dir = definitions();
    let engine = staging(&dir);

    let report = run(&engine, config(&dir)).execute().await;

    let scratch = report.scratch.to_string();
    for call in engine.calls() {
        if matches!(call.op, FakeOp::Initialize | FakeOp::Plan | FakeOp::Destroy) {
            assert_eq!(call.active, scratch, "{:?} ran outside the scratch workspace", call.op);
        }
    }
}

#[tokio::test]
async fn test_syntax_error_fails_with_engine_text() {
    let dir = definitions();
    let output = "Error: Argument or block definition required\n\n  on main.tf line 1:";
    let engine = staging(&dir).fail_always(FakeOp::Initialize, output);

    let report = run(&engine, config(&dir)).execute().await;

    assert!(!report.passed());
    match report.failure() {
        Some(RunFailure::Validation(ValidationFailure::Stage { stage, source })) => {
            assert_eq!(*stage, ValidationStage::Init);
            assert_eq!(source.attempts(), 1);
        }
        other => panic!("unexpected failure: {:?}", other),
    }
    assert_eq!(report.engine_output(), Some(output));
    assert!(!engine.ops().contains(&FakeOp::Plan));
    assert_eq!(engine.active_workspace(), "staging");
    assert!(!engine.has_workspace(report.scratch.as_str()));
}

#[tokio::test]
async fn test_transient_plan_error_is_retried() {
    let dir = definitions();
    let engine = staging(&dir).fail_next(
        FakeOp::Plan,
        "Error: Failed to query available provider packages: TLS handshake timeout",
        1,
    );

    let report = run(&engine, config(&dir)).execute().await;

    report.assert_passed();
    let outcome = report.outcome.as_ref().unwrap();
    assert_eq!(outcome.init_attempts, 1);
    assert_eq!(outcome.plan_attempts, 2);
}

#[tokio::test]
async fn test_retry_budget_is_bounded() {
    let dir = definitions();
    let engine = staging(&dir).fail_always(FakeOp::Plan, "Error: connection reset by peer");

    let report = run(&engine, config(&dir).with_max_retries(2)).execute().await;

    assert!(!report.passed());
    let plans = engine.ops().iter().filter(|op| **op == FakeOp::Plan).count();
    assert_eq!(plans, 3);
    assert_eq!(engine.active_workspace(), "staging");
}

#[tokio::test]
async fn test_empty_ambient_restores_default() {
    let dir = definitions();
    let engine = FakeEngine::new(dir.path()).with_current_workspace_output("");

    let report = run(&engine, config(&dir)).execute().await;

    assert!(report.ambient.is_default());
    let switch_back = engine
        .calls()
        .into_iter()
        .filter(|c| c.op == FakeOp::SelectOrCreate)
        .last()
        .unwrap();
    assert_eq!(switch_back.target.as_deref(), Some("default"));
    assert_eq!(engine.active_workspace(), "default");
}

#[tokio::test]
async fn test_ambient_with_punctuation_is_restored() {
    for ambient in ["team@prod", "feature+x", "env~1", "ops:eu=1"] {
        let dir = definitions();
        let engine = FakeEngine::new(dir.path()).with_active_workspace(ambient);

        let report = run(&engine, config(&dir)).execute().await;

        report.assert_passed();
        assert_eq!(report.ambient, ambient);
        assert_eq!(engine.active_workspace(), ambient);
        assert!(!engine.has_workspace(report.scratch.as_str()));
    }
}

#[tokio::test]
async fn test_ambient_restored_on_pass_and_fail() {
    for fails in [false, true] {
        let dir = definitions();
        let mut engine = staging(&dir);
        if fails {
            engine = engine.fail_always(FakeOp::Plan, "Error: Unsupported argument");
        }

        let report = run(&engine, config(&dir)).execute().await;

        assert_eq!(report.passed(), !fails);
        assert_eq!(engine.active_workspace(), report.ambient.as_str());
        assert_eq!(engine.workspaces(), vec!["default", "staging"]);
    }
}

#[tokio::test]
async fn test_cleanup_runs_in_order_after_plan_failure() {
    let dir = definitions();
    let engine = staging(&dir).fail_always(FakeOp::Plan, "Error: Reference to undeclared resource");

    let report = run(&engine, config(&dir)).execute().await;

    assert!(!report.passed());
    assert_eq!(tail(&engine, 4), CLEANUP_SEQUENCE);
}

#[tokio::test]
async fn test_missing_definitions_still_cleans_up() {
    let dir = definitions();
    let missing = dir.path().join("nope");
    let engine = FakeEngine::new(&missing).with_active_workspace("staging");

    let report = run(&engine, config(&dir).with_prefix("ci")).execute().await;

    assert!(matches!(
        report.failure(),
        Some(RunFailure::Validation(ValidationFailure::MissingDefinitions(_)))
    ));
    assert!(report.scratch.as_str().starts_with("ci-"));
    assert!(!engine.ops().contains(&FakeOp::Initialize));
    assert_eq!(tail(&engine, 4), CLEANUP_SEQUENCE);
    assert_eq!(engine.active_workspace(), "staging");
}

#[tokio::test]
async fn test_setup_failure_skips_destroy() {
    let dir = definitions();
    let engine = staging(&dir)
        .with_resources("staging", 12)
        .fail_next(FakeOp::SelectOrCreate, "Error: failed to lock state", 1);

    let report = run(&engine, config(&dir)).execute().await;

    assert!(matches!(report.failure(), Some(RunFailure::Setup { .. })));
    assert_eq!(report.engine_output(), Some("Error: failed to lock state"));
    assert!(matches!(
        report.cleanup.outcome(CleanupStep::DestroyResources),
        Some(StepOutcome::Skipped(_))
    ));
    assert_eq!(engine.resources_in("staging"), 12);
    assert_eq!(engine.active_workspace(), "staging");
}

#[tokio::test]
async fn test_cleanup_failure_does_not_change_verdict() {
    let dir = definitions();
    let engine = staging(&dir).fail_always(FakeOp::Destroy, "Error: deleting bucket: BucketNotEmpty");

    let report = run(&engine, config(&dir).with_max_retries(0)).execute().await;

    report.assert_passed();
    assert!(!report.cleanup.is_clean());
    assert_eq!(report.cleanup.failures().len(), 1);
    assert_eq!(report.cleanup.failures()[0].step, CleanupStep::DestroyResources);
    assert_eq!(engine.active_workspace(), "staging");
    assert!(!engine.has_workspace(report.scratch.as_str()));
}

#[tokio::test]
async fn test_cancellation_cleans_up() {
    let dir = definitions();
    let engine = staging(&dir).hang_always(FakeOp::Plan);

    let report = run(&engine, config(&dir))
        .execute_until(tokio::time::sleep(Duration::from_millis(50)))
        .await;

    assert!(matches!(report.failure(), Some(RunFailure::Cancelled)));
    assert_eq!(tail(&engine, 4), CLEANUP_SEQUENCE);
    assert_eq!(engine.active_workspace(), "staging");
    assert!(!engine.has_workspace(report.scratch.as_str()));
}

#[tokio::test]
async fn test_run_timeout_cleans_up() {
    let dir = definitions();
    let engine = staging(&dir).hang_always(FakeOp::Initialize);

    let report = run(&engine, config(&dir).with_run_timeout(1)).execute().await;

    assert!(matches!(report.failure(), Some(RunFailure::TimedOut(1))));
    assert_eq!(engine.active_workspace(), "staging");
    assert!(!engine.has_workspace(report.scratch.as_str()));
}

#[tokio::test]
async fn test_panic_is_resumed_after_cleanup() {
    let dir = definitions();
    let engine = staging(&dir).script(FakeOp::Plan, Scripted::Panic("provider crashed".into()), 1);
    let sandbox = run(&engine, config(&dir));

    let joined = tokio::spawn(async move { sandbox.execute().await }).await;

    assert!(joined.unwrap_err().is_panic());
    assert_eq!(tail(&engine, 4), CLEANUP_SEQUENCE);
    assert_eq!(engine.active_workspace(), "staging");
    assert_eq!(engine.workspaces(), vec!["default", "staging"]);
}

#[tokio::test]
async fn test_concurrent_runs_use_distinct_scratch_names() {
    let dir = definitions();
    let engines: Vec<FakeEngine> = (0..16).map(|_| staging(&dir)).collect();

    let reports = futures_util::future::join_all(
        engines
            .iter()
            .map(|engine| run_sandbox(Arc::new(engine.clone()), config(&dir))),
    )
    .await;

    let names: HashSet<String> = reports
        .into_iter()
        .map(|r| r.unwrap().scratch.to_string())
        .collect();
    assert_eq!(names.len(), 16);
    assert!(!names.contains("default"));
}

#[tokio::test]
async fn test_run_sandbox_reports_failure_as_error() {
    let dir = definitions();
    let engine = staging(&dir).fail_always(FakeOp::Plan, "Error: Invalid reference");

    let err = run_sandbox(Arc::new(engine.clone()), config(&dir))
        .await
        .unwrap_err();

    match err {
        HarnessError::RunFailed { ambient, failure, .. } => {
            assert_eq!(ambient, "staging");
            assert_eq!(failure.engine_output(), Some("Error: Invalid reference"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_invalid_prefix_fails_before_engine_calls() {
    let dir = definitions();
    let engine = staging(&dir);

    let err = run_sandbox(Arc::new(engine.clone()), config(&dir).with_prefix("ci/tests"))
        .await
        .unwrap_err();

    assert!(matches!(err, HarnessError::Config(_)));
    assert!(engine.ops().is_empty());
}

#[tokio::test]
async fn test_custom_classifier_decides_retries() {
    let dir = definitions();
    let engine = staging(&dir).fail_next(FakeOp::Initialize, "Error: quota exceeded", 2);

    let mut classifier = MockClassifier::new();
    classifier
        .expect_classify()
        .with(always())
        .times(2)
        .returning(|_| RetryDecision::Retry);
    let policy = RetryPolicy::new(Arc::new(classifier)).time_between_retries(Duration::ZERO);

    let report = run(&engine, config(&dir))
        .with_retry_policy(policy)
        .execute()
        .await;

    report.assert_passed();
    assert_eq!(report.outcome.unwrap().init_attempts, 3);
}

#[tokio::test]
#[should_panic(expected = "Error: Unsupported block type")]
async fn test_assert_passed_shows_engine_output() {
    let dir = definitions();
    let engine = staging(&dir).fail_always(FakeOp::Initialize, "Error: Unsupported block type");

    run(&engine, config(&dir)).execute().await.assert_passed();
}
