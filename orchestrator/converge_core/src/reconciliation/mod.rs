//! Reconciliation driver.
//!
//! For each declared container, in declared order, the reconciler runs one
//! pipeline to completion before starting the next:
//!
//! ```text
//! ┌────────────────┐   ┌──────────┐   ┌────────┐   ┌─────────────────┐
//! │ PendingPreHook │──▶│ Deciding │──▶│ Acting │──▶│ PendingPostHook │──▶ Done
//! └────────────────┘   └──────────┘   └────────┘   └─────────────────┘
//!         │                 │              │                │
//!         └─────────────────┴──────────────┴────────────────┴────────▶ Failed
//! ```
//!
//! - **Sense** ([`sense`]): observe the container through the runtime
//! - **Compare** ([`compare`]): decide `Absent`, `Matches` or `Diverges`
//! - **Actuate** ([`actuate`]): issue the runtime calls for the decision
//! - **Hooks** ([`hooks`]): run declared pre/post task files
//!
//! A failure ends that container's pipeline only; later containers are still
//! processed unless `halt_on_failure` is set.
//!
//! # Usage
//!
//! ```ignore
//! use converge_core::reconciliation::{Reconciler, ReconcileOptions};
//!
//! let reconciler = Reconciler::new(runtime, registry, hook_runner, ReconcileOptions::default());
//! let batch = reconciler.reconcile(&specs).await?;
//! std::process::exit(batch.exit_code());
//! ```

pub mod actuate;
pub mod compare;
pub mod hooks;
pub mod result;
pub mod sense;

pub use actuate::{ActionOutcome, ActionTaken, Actuator};
pub use compare::{decide, Decision};
pub use hooks::{HookExecutor, HookOutcome};
pub use result::{
    BatchResult, FailureKind, PipelineStage, PlanEntry, ReconciliationResult, TerminalState,
};
pub use sense::{RuntimeInspector, TransportError};

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use converge_types::{ContainerSpec, ContainerSpecList};
use host_interface::{ContainerRuntime, HookPhase, HookRunner, RegistryClient, RegistryCredentials};

/// Batch-level errors. Per-container failures are reported in [`BatchResult`].
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Registry authentication failed; no image was pulled.
    #[error("Registry login failed: {0}")]
    RegistryLogin(String),
}

/// Run-wide settings for the reconciler.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    /// Credentials for the registry login performed before any container.
    pub credentials: Option<RegistryCredentials>,
    /// Disable registry login entirely.
    pub skip_registry_login: bool,
    /// Stop after the first failed container.
    pub halt_on_failure: bool,
    /// Variables passed to every hook.
    pub extra_vars: BTreeMap<String, String>,
}

pub struct Reconciler {
    inspector: RuntimeInspector,
    actuator: Actuator,
    hooks: HookExecutor,
    registry: Arc<dyn RegistryClient>,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<dyn RegistryClient>,
        hook_runner: Arc<dyn HookRunner>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            inspector: RuntimeInspector::new(runtime.clone()),
            actuator: Actuator::new(runtime),
            hooks: HookExecutor::new(hook_runner, options.extra_vars.clone()),
            registry,
            options,
        }
    }

    async fn login(&self) -> Result<(), ReconcileError> {
        if self.options.skip_registry_login {
            debug!("Registry login disabled");
            return Ok(());
        }
        let Some(credentials) = &self.options.credentials else {
            debug!("No registry credentials configured; skipping login");
            return Ok(());
        };

        self.registry.login(credentials).await.map_err(|e| {
            error!(error = %e, "Registry login failed");
            ReconcileError::RegistryLogin(e.to_string())
        })
    }

    /// Converge every container in `specs`, in declared order.
    pub async fn reconcile(&self, specs: &ContainerSpecList) -> Result<BatchResult, ReconcileError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, containers = specs.len(), "Starting reconciliation");

        self.login().await?;

        let mut results = Vec::with_capacity(specs.len());
        let mut skipped = Vec::new();
        let mut halted = false;

        for spec in specs {
            if halted {
                skipped.push(spec.name.clone());
                continue;
            }

            let span = info_span!("container", name = %spec.name, %run_id);
            let result = self.reconcile_one(spec).instrument(span).await;

            if result.is_failed() && self.options.halt_on_failure {
                warn!(container = %spec.name, "Halting after failed container");
                halted = true;
            }
            results.push(result);
        }

        let batch = BatchResult {
            run_id,
            started_at,
            finished_at: Utc::now(),
            results,
            skipped,
            halted,
        };
        info!(
            %run_id,
            changed = batch.changed_count(),
            failed = batch.failed().count(),
            halted,
            "Reconciliation finished"
        );
        Ok(batch)
    }

    /// Run the full pipeline for one container.
    pub async fn reconcile_one(&self, spec: &ContainerSpec) -> ReconciliationResult {
        let mut result = ReconciliationResult::new(&spec.name);

        debug!(stage = %PipelineStage::PendingPreHook, "Entering stage");
        result.pre_hook = self
            .hooks
            .run(spec.pre.as_deref(), spec, HookPhase::Pre)
            .await;
        if let HookOutcome::Failed(reason) = &result.pre_hook {
            let reason = format!("pre-hook: {}", reason);
            warn!(%reason, "Container failed");
            return result.fail(FailureKind::HookFailure, PipelineStage::PendingPreHook, reason);
        }

        debug!(stage = %PipelineStage::Deciding, "Entering stage");
        let observed = match self.inspector.inspect(&spec.name).await {
            Ok(observed) => observed,
            Err(e) => {
                warn!(error = %e, "Container failed");
                return result.fail(FailureKind::TransportError, PipelineStage::Deciding, e.0);
            }
        };
        let decision = decide(spec, observed.as_ref());
        info!(decision = decision.label(), "Decided");
        result.action_taken = ActionTaken::for_decision(&decision);

        debug!(stage = %PipelineStage::Acting, "Entering stage");
        result.action_outcome = self
            .actuator
            .apply(spec, &decision, observed.as_ref())
            .await;
        result.decision = Some(decision);

        match &result.action_outcome {
            ActionOutcome::Failed(reason) => {
                let reason = reason.clone();
                warn!(%reason, "Container failed");
                return result.fail(FailureKind::ActionFailure, PipelineStage::Acting, reason);
            }
            ActionOutcome::Unreachable(reason) => {
                let reason = reason.clone();
                warn!(%reason, "Container failed");
                return result.fail(FailureKind::TransportError, PipelineStage::Acting, reason);
            }
            ActionOutcome::RemovedNotRecreated(reason) => {
                let reason = reason.clone();
                error!(%reason, "Container removed but not recreated");
                return result.fail(
                    FailureKind::DivergentRecreateFailure,
                    PipelineStage::Acting,
                    reason,
                );
            }
            _ => {}
        }

        debug!(stage = %PipelineStage::PendingPostHook, "Entering stage");
        let post_hook = self
            .hooks
            .run(spec.post.as_deref(), spec, HookPhase::Post)
            .await;
        result.post_hook = Some(post_hook.clone());
        if let HookOutcome::Failed(reason) = post_hook {
            let reason = format!("post-hook: {}", reason);
            warn!(%reason, "Container failed");
            return result.fail(FailureKind::HookFailure, PipelineStage::PendingPostHook, reason);
        }

        debug!(stage = %PipelineStage::Done, "Entering stage");
        result
    }

    /// Check mode: inspect and decide for each container without running
    /// hooks or changing the host.
    pub async fn plan(&self, specs: &ContainerSpecList) -> Vec<PlanEntry> {
        let mut entries = Vec::with_capacity(specs.len());
        for spec in specs {
            let entry = match self.inspector.inspect(&spec.name).await {
                Ok(observed) => {
                    let decision = decide(spec, observed.as_ref());
                    PlanEntry {
                        name: spec.name.clone(),
                        action: Some(ActionTaken::for_decision(&decision)),
                        decision: Some(decision),
                        error: None,
                    }
                }
                Err(e) => PlanEntry {
                    name: spec.name.clone(),
                    decision: None,
                    action: None,
                    error: Some(e.0),
                },
            };
            entries.push(entry);
        }
        entries
    }
}
