//! Integration tests for the reconciler
//!
//! These tests verify the end-to-end behavior of:
//! - Idempotence of a second run
//! - Hook ordering and hook failure handling
//! - Create, recreate and removed-but-not-recreated paths
//! - Transport errors isolated to one container
//! - Registry login as a hard stop
//! - Halt on failure and check mode

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use converge_core::{
    ActionOutcome, ActionTaken, Decision, FailureKind, HookOutcome, PipelineStage,
    ReconcileError, ReconcileOptions, Reconciler, RunStats, TerminalState,
};
use converge_types::{
    ComparedField, ContainerId, ContainerSpec, ContainerSpecList, ContainerStatus, PortMapping,
    Result as ConvergeResult, RuntimeOptions, RuntimeState,
};
use host_clients::{CallLog, MockCall, MockHookRunner, MockRegistry, MockRuntime};
use host_interface::{ContainerRuntime, HookPhase, RegistryCredentials};

// ============================================================================
// Fixtures
// ============================================================================

struct Harness {
    log: CallLog,
    runtime: MockRuntime,
    registry: MockRegistry,
    hooks: MockHookRunner,
}

impl Harness {
    fn new() -> Self {
        let log = CallLog::new();
        Self {
            runtime: MockRuntime::with_call_log(log.clone()),
            registry: MockRegistry::with_call_log(log.clone()),
            hooks: MockHookRunner::with_call_log(log.clone()),
            log,
        }
    }

    fn reconciler(&self, options: ReconcileOptions) -> Reconciler {
        Reconciler::new(
            Arc::new(self.runtime.clone()),
            Arc::new(self.registry.clone()),
            Arc::new(self.hooks.clone()),
            options,
        )
    }

    fn default_reconciler(&self) -> Reconciler {
        self.reconciler(ReconcileOptions::default())
    }
}

fn squid_options() -> RuntimeOptions {
    let mut options = RuntimeOptions::default();
    options.env.insert("SQUID_CACHE_MB".into(), "512".into());
    options.env.insert("TZ".into(), "UTC".into());
    options.ports.insert(PortMapping::tcp(3128, Some(3128)));
    options.volumes.insert("/etc/squid:/etc/squid:ro".into());
    options.network_mode = Some("host".into());
    options
}

fn squid() -> ContainerSpec {
    ContainerSpec::new("squid", "stackhpc/squid:3.5.20-1").with_options(squid_options())
}

fn list(specs: Vec<ContainerSpec>) -> ContainerSpecList {
    ContainerSpecList::new(specs).unwrap()
}

fn credentials() -> RegistryCredentials {
    RegistryCredentials {
        address: Some("registry.example.com".into()),
        username: "kolla".into(),
        password: SecretString::new("s3cret".into()),
    }
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let harness = Harness::new();
    let reconciler = harness.default_reconciler();
    let specs = list(vec![
        squid(),
        ContainerSpec::new("nginx", "nginx").with_options(squid_options()),
    ]);

    let first = reconciler.reconcile(&specs).await.unwrap();
    assert_eq!(first.exit_code(), 0);
    assert_eq!(first.changed_count(), 2);

    harness.log.clear().await;
    let second = reconciler.reconcile(&specs).await.unwrap();
    for result in &second.results {
        assert_eq!(result.decision, Some(Decision::Matches));
        assert_eq!(result.action_outcome, ActionOutcome::Unchanged);
        assert_eq!(result.terminal, TerminalState::Done);
    }
    assert!(harness.runtime.mutations().await.is_empty());
}

#[tokio::test]
async fn test_no_hooks_declared_does_not_block_acting() {
    let harness = Harness::new();
    let batch = harness
        .default_reconciler()
        .reconcile(&list(vec![squid()]))
        .await
        .unwrap();

    let result = batch.get("squid").unwrap();
    assert_eq!(result.pre_hook, HookOutcome::Skipped);
    assert_eq!(result.post_hook, Some(HookOutcome::Skipped));
    assert_eq!(result.action_outcome, ActionOutcome::Succeeded);
    assert!(harness.hooks.invocations().await.is_empty());
}

#[tokio::test]
async fn test_absent_container_is_created_never_diverges() {
    let harness = Harness::new();
    let batch = harness
        .default_reconciler()
        .reconcile(&list(vec![squid().with_tag("3.5.21-1")]))
        .await
        .unwrap();

    let result = batch.get("squid").unwrap();
    assert_eq!(result.decision, Some(Decision::Absent));
    assert_eq!(result.action_taken, ActionTaken::Create);

    let state = harness.runtime.container("squid").await.unwrap();
    assert_eq!(state.status, ContainerStatus::Running);
    assert_eq!(state.image, "stackhpc/squid:3.5.21-1");
}

#[tokio::test]
async fn test_equal_fields_match_regardless_of_order() {
    let harness = Harness::new();

    let mut observed = RuntimeOptions::default();
    observed.volumes.insert("/etc/squid:/etc/squid:ro".into());
    observed.ports.insert(PortMapping::tcp(3128, Some(3128)));
    observed.env.insert("TZ".into(), "UTC".into());
    observed.env.insert("SQUID_CACHE_MB".into(), "512".into());
    observed.network_mode = Some("host".into());
    harness
        .runtime
        .add_container(RuntimeState {
            name: "squid".into(),
            id: "existing".into(),
            image: "docker.io/stackhpc/squid:3.5.20-1".into(),
            options: observed,
            status: ContainerStatus::Running,
        })
        .await;

    let batch = harness
        .default_reconciler()
        .reconcile(&list(vec![squid()]))
        .await
        .unwrap();

    assert_eq!(batch.results[0].decision, Some(Decision::Matches));
    assert!(harness.runtime.mutations().await.is_empty());
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_squid_create_with_hooks_runs_in_order() {
    let harness = Harness::new();
    let spec = squid().with_pre("p1").with_post("p2");

    let batch = harness
        .default_reconciler()
        .reconcile(&list(vec![spec]))
        .await
        .unwrap();

    let result = batch.get("squid").unwrap();
    assert_eq!(result.pre_hook, HookOutcome::Succeeded);
    assert_eq!(result.post_hook, Some(HookOutcome::Succeeded));
    assert_eq!(result.terminal, TerminalState::Done);

    let calls = harness.log.snapshot().await;
    let pre = calls
        .iter()
        .position(|c| matches!(c, MockCall::Hook { phase: HookPhase::Pre, .. }))
        .unwrap();
    let inspect = calls
        .iter()
        .position(|c| matches!(c, MockCall::Inspect(_)))
        .unwrap();
    let start = calls
        .iter()
        .position(|c| matches!(c, MockCall::Start(_)))
        .unwrap();
    let post = calls
        .iter()
        .position(|c| matches!(c, MockCall::Hook { phase: HookPhase::Post, .. }))
        .unwrap();
    assert!(pre < inspect && inspect < start && start < post);
    assert_eq!(
        calls[post],
        MockCall::Hook {
            phase: HookPhase::Post,
            task: PathBuf::from("p2")
        }
    );
}

#[tokio::test]
async fn test_squid_diverging_tag_with_failed_create_is_removed_not_recreated() {
    let harness = Harness::new();
    harness.runtime.add_container_from_spec(&squid()).await.unwrap();
    harness.runtime.fail_create_for("squid").await;

    let spec = squid().with_tag("3.5.21-1").with_post("p2");
    let batch = harness
        .default_reconciler()
        .reconcile(&list(vec![spec]))
        .await
        .unwrap();

    let result = batch.get("squid").unwrap();
    assert_eq!(
        result.decision,
        Some(Decision::Diverges {
            fields: vec![ComparedField::Image]
        })
    );
    assert!(matches!(
        result.action_outcome,
        ActionOutcome::RemovedNotRecreated(_)
    ));
    assert_eq!(
        result.failure_kind(),
        Some(FailureKind::DivergentRecreateFailure)
    );
    assert_eq!(result.terminal.to_string(), "Failed: removed but not recreated");

    // Post-hook is not reached and the container is gone
    assert_eq!(result.post_hook, None);
    assert!(harness.hooks.invocations().await.is_empty());
    assert_eq!(harness.runtime.container_count().await, 0);
    assert_eq!(batch.exit_code(), 1);

    // Never retried
    let creates = harness
        .runtime
        .mutations()
        .await
        .into_iter()
        .filter(|c| matches!(c, MockCall::Create(_)))
        .count();
    assert_eq!(creates, 1);
}

#[tokio::test]
async fn test_diverging_pull_failure_is_removed_not_recreated() {
    let harness = Harness::new();
    harness.runtime.add_container_from_spec(&squid()).await.unwrap();
    harness.runtime.fail_pull_for("stackhpc/squid:3.5.21-1").await;

    let batch = harness
        .default_reconciler()
        .reconcile(&list(vec![squid().with_tag("3.5.21-1")]))
        .await
        .unwrap();

    assert_eq!(
        batch.results[0].failure_kind(),
        Some(FailureKind::DivergentRecreateFailure)
    );
}

#[tokio::test]
async fn test_pre_hook_failure_leaves_existing_container_untouched() {
    let harness = Harness::new();
    let existing = harness.runtime.add_container_from_spec(&squid()).await.unwrap();
    harness.hooks.fail_task("p1", 2, "pre-flight check failed").await;

    let spec = squid().with_tag("3.5.21-1").with_pre("p1");
    let batch = harness
        .default_reconciler()
        .reconcile(&list(vec![spec]))
        .await
        .unwrap();

    let result = batch.get("squid").unwrap();
    assert!(result.pre_hook.is_failed());
    assert_eq!(result.decision, None);
    assert_eq!(result.action_outcome, ActionOutcome::NotAttempted);
    assert!(matches!(
        &result.terminal,
        TerminalState::Failed {
            kind: FailureKind::HookFailure,
            stage: PipelineStage::PendingPreHook,
            ..
        }
    ));

    // No runtime call at all, not even inspect
    let calls = harness.log.snapshot().await;
    assert!(calls.iter().all(|c| matches!(c, MockCall::Hook { .. })));
    assert_eq!(harness.runtime.container("squid").await.unwrap().id, existing);
}

#[tokio::test]
async fn test_transport_error_on_first_does_not_stop_second() {
    let harness = Harness::new();
    harness.runtime.set_unreachable("first").await;

    let batch = harness
        .default_reconciler()
        .reconcile(&list(vec![
            ContainerSpec::new("first", "stackhpc/squid"),
            ContainerSpec::new("second", "nginx"),
        ]))
        .await
        .unwrap();

    assert_eq!(batch.results.len(), 2);
    assert_eq!(batch.results[0].name, "first");
    assert_eq!(
        batch.results[0].failure_kind(),
        Some(FailureKind::TransportError)
    );
    assert_eq!(batch.results[1].name, "second");
    assert_eq!(batch.results[1].terminal, TerminalState::Done);
    assert_eq!(batch.exit_code(), 1);
}

#[tokio::test]
async fn test_post_hook_failure_marks_failed_without_rollback() {
    let harness = Harness::new();
    harness.hooks.fail_task("p2", 1, "smoke test failed").await;

    let batch = harness
        .default_reconciler()
        .reconcile(&list(vec![squid().with_post("p2")]))
        .await
        .unwrap();

    let result = batch.get("squid").unwrap();
    assert_eq!(result.action_outcome, ActionOutcome::Succeeded);
    assert_eq!(result.failure_kind(), Some(FailureKind::HookFailure));
    assert!(harness.runtime.container("squid").await.is_some());
}

#[tokio::test]
async fn test_action_failure_keeps_later_containers_running() {
    let harness = Harness::new();
    harness.runtime.fail_start_for("first").await;

    let batch = harness
        .default_reconciler()
        .reconcile(&list(vec![
            ContainerSpec::new("first", "nginx"),
            ContainerSpec::new("second", "nginx"),
        ]))
        .await
        .unwrap();

    assert_eq!(
        batch.results[0].failure_kind(),
        Some(FailureKind::ActionFailure)
    );
    assert_eq!(batch.results[1].terminal, TerminalState::Done);
}

#[tokio::test]
async fn test_unreachable_registry_while_creating_is_transport_error() {
    let harness = Harness::new();
    harness.runtime.fail_pull_for("nginx").await;

    let batch = harness
        .default_reconciler()
        .reconcile(&list(vec![ContainerSpec::new("web", "nginx")]))
        .await
        .unwrap();

    let result = batch.get("web").unwrap();
    assert_eq!(result.decision, Some(Decision::Absent));
    assert!(matches!(result.action_outcome, ActionOutcome::Unreachable(_)));
    assert_eq!(result.failure_kind(), Some(FailureKind::TransportError));
    assert!(matches!(
        result.terminal,
        TerminalState::Failed {
            stage: PipelineStage::Acting,
            ..
        }
    ));
    assert_eq!(result.post_hook, None);

    let stats = RunStats::from_batch(&batch);
    assert_eq!(stats.unreachable, vec!["web".to_string()]);
    assert_eq!(stats.num_unreachable, 1);
    assert!(stats.failures.is_empty());
    assert_eq!(batch.exit_code(), 1);
}

// ============================================================================
// Registry login
// ============================================================================

#[tokio::test]
async fn test_registry_login_failure_is_a_hard_stop() {
    let harness = Harness::new();
    harness.registry.set_reject(true).await;

    let reconciler = harness.reconciler(ReconcileOptions {
        credentials: Some(credentials()),
        ..ReconcileOptions::default()
    });
    let err = reconciler.reconcile(&list(vec![squid()])).await.unwrap_err();

    assert!(matches!(err, ReconcileError::RegistryLogin(_)));
    assert!(harness.runtime.call_log().snapshot().await.iter().all(|c| matches!(c, MockCall::Login(_))));
    assert_eq!(harness.runtime.container_count().await, 0);
}

#[tokio::test]
async fn test_registry_login_happens_before_containers() {
    let harness = Harness::new();
    let reconciler = harness.reconciler(ReconcileOptions {
        credentials: Some(credentials()),
        ..ReconcileOptions::default()
    });
    reconciler.reconcile(&list(vec![squid()])).await.unwrap();

    let calls = harness.log.snapshot().await;
    assert_eq!(calls[0], MockCall::Login("kolla".into()));
    assert_eq!(harness.registry.login_count().await, 1);
}

#[tokio::test]
async fn test_registry_login_can_be_disabled() {
    let harness = Harness::new();
    harness.registry.set_reject(true).await;

    let reconciler = harness.reconciler(ReconcileOptions {
        credentials: Some(credentials()),
        skip_registry_login: true,
        ..ReconcileOptions::default()
    });
    let batch = reconciler.reconcile(&list(vec![squid()])).await.unwrap();

    assert_eq!(batch.exit_code(), 0);
    assert_eq!(harness.registry.login_count().await, 0);
}

// ============================================================================
// Halt on failure, extra vars, check mode, stats
// ============================================================================

#[tokio::test]
async fn test_halt_on_failure_skips_remaining() {
    let harness = Harness::new();
    harness.runtime.set_unreachable("b").await;

    let reconciler = harness.reconciler(ReconcileOptions {
        halt_on_failure: true,
        ..ReconcileOptions::default()
    });
    let batch = reconciler
        .reconcile(&list(vec![
            ContainerSpec::new("a", "nginx"),
            ContainerSpec::new("b", "nginx"),
            ContainerSpec::new("c", "nginx"),
            ContainerSpec::new("d", "nginx"),
        ]))
        .await
        .unwrap();

    assert!(batch.halted);
    assert_eq!(batch.results.len(), 2);
    assert_eq!(batch.skipped, vec!["c".to_string(), "d".to_string()]);
    assert!(harness.runtime.container("c").await.is_none());

    let stats = RunStats::from_batch(&batch);
    assert_eq!(stats.unreachable, vec!["b".to_string()]);
    assert!(stats.failures.is_empty());
    assert!(stats.halted);
    assert!(!stats.completed_without_failures());
}

#[tokio::test]
async fn test_extra_vars_reach_hooks() {
    let harness = Harness::new();
    let mut extra_vars = BTreeMap::new();
    extra_vars.insert("kolla_action".to_string(), "upgrade".to_string());

    let reconciler = harness.reconciler(ReconcileOptions {
        extra_vars,
        ..ReconcileOptions::default()
    });
    reconciler
        .reconcile(&list(vec![squid().with_pre("p1").with_post("p2")]))
        .await
        .unwrap();

    let invocations = harness.hooks.invocations().await;
    assert_eq!(invocations.len(), 2);
    for (_, context) in invocations {
        assert_eq!(
            context.extra_vars.get("kolla_action").map(String::as_str),
            Some("upgrade")
        );
    }
}

#[tokio::test]
async fn test_plan_decides_without_mutation_or_hooks() {
    let harness = Harness::new();
    harness.runtime.add_container_from_spec(&squid()).await.unwrap();
    harness.runtime.set_unreachable("broken").await;

    let plan = harness
        .default_reconciler()
        .plan(&list(vec![
            squid().with_pre("p1"),
            ContainerSpec::new("nginx", "nginx"),
            ContainerSpec::new("squid-tagged", "stackhpc/squid"),
            ContainerSpec::new("broken", "nginx"),
        ]))
        .await;

    assert_eq!(plan[0].decision, Some(Decision::Matches));
    assert_eq!(plan[0].action, Some(ActionTaken::None));
    assert_eq!(plan[1].action, Some(ActionTaken::Create));
    assert_eq!(plan[2].decision, Some(Decision::Absent));
    assert!(plan[3].error.is_some());

    assert!(harness.runtime.mutations().await.is_empty());
    assert!(harness.hooks.invocations().await.is_empty());
}

#[tokio::test]
async fn test_stats_record_degraded_containers() {
    let harness = Harness::new();
    harness.runtime.add_container_from_spec(&squid()).await.unwrap();
    harness.runtime.fail_create_for("squid").await;

    let batch = harness
        .default_reconciler()
        .reconcile(&list(vec![squid().with_tag("3.5.21-1")]))
        .await
        .unwrap();

    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("stats.json");
    RunStats::from_batch(&batch).write(&path).unwrap();

    let stats = RunStats::from_json(&path).unwrap();
    assert_eq!(stats.num_failures, 1);
    assert_eq!(stats.degraded, vec!["squid".to_string()]);
}

// ============================================================================
// Protocol errors
// ============================================================================

/// Runtime that answers every inspect with a container of another name.
struct ConfusedRuntime;

#[async_trait]
impl ContainerRuntime for ConfusedRuntime {
    async fn inspect(&self, _name: &str) -> ConvergeResult<Option<RuntimeState>> {
        Ok(Some(RuntimeState {
            name: "someone-else".into(),
            id: "other".into(),
            image: "nginx".into(),
            options: RuntimeOptions::default(),
            status: ContainerStatus::Running,
        }))
    }

    async fn image_present(&self, _image: &str) -> ConvergeResult<bool> {
        Ok(true)
    }

    async fn pull(&self, _image: &str) -> ConvergeResult<()> {
        Ok(())
    }

    async fn create(&self, _spec: &ContainerSpec) -> ConvergeResult<ContainerId> {
        Ok("new".into())
    }

    async fn start(&self, _container_id: &ContainerId) -> ConvergeResult<()> {
        Ok(())
    }

    async fn stop(&self, _container_id: &ContainerId) -> ConvergeResult<()> {
        Ok(())
    }

    async fn remove(&self, _container_id: &ContainerId) -> ConvergeResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_name_mismatch_is_transport_error() {
    let reconciler = Reconciler::new(
        Arc::new(ConfusedRuntime),
        Arc::new(MockRegistry::new()),
        Arc::new(MockHookRunner::new()),
        ReconcileOptions::default(),
    );

    let batch = reconciler.reconcile(&list(vec![squid()])).await.unwrap();
    assert_eq!(
        batch.results[0].failure_kind(),
        Some(FailureKind::TransportError)
    );
    assert_eq!(batch.results[0].action_outcome, ActionOutcome::NotAttempted);
}
