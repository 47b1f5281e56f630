//! Reconciliation Actuate Module
//!
//! Turns a [`Decision`] into runtime calls for one container.
//!
//! - `Absent`: ensure the image, create, start
//! - `Matches`: nothing
//! - `Diverges`: stop (when running), remove, ensure the image, create, start
//!
//! Destructive steps are never retried. Once a divergent container has been
//! removed, a failure to pull or create its replacement leaves the host
//! without the container; this is reported as `RemovedNotRecreated` so the
//! operator knows a re-run is required. Any other error that comes from an
//! unreachable runtime or registry is reported as `Unreachable`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use converge_types::{ContainerSpec, ConvergeError, RuntimeState};
use host_interface::ContainerRuntime;

use super::compare::Decision;

/// Runtime action chosen for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTaken {
    None,
    Create,
    Recreate,
}

impl ActionTaken {
    pub fn for_decision(decision: &Decision) -> Self {
        match decision {
            Decision::Absent => ActionTaken::Create,
            Decision::Matches => ActionTaken::None,
            Decision::Diverges { .. } => ActionTaken::Recreate,
        }
    }
}

impl fmt::Display for ActionTaken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionTaken::None => f.write_str("none"),
            ActionTaken::Create => f.write_str("create"),
            ActionTaken::Recreate => f.write_str("recreate"),
        }
    }
}

/// How the runtime action ended.
///
/// Actions follow a state machine progression:
/// `NotAttempted -> (Unchanged | Succeeded | Failed | Unreachable | RemovedNotRecreated)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The pipeline stopped before the action stage.
    NotAttempted,

    /// Container already matched; no runtime call was made.
    Unchanged,

    Succeeded,

    /// The action failed; the previous container, if any, is still present.
    Failed(String),

    /// The runtime or registry could not be reached; the previous container,
    /// if any, is still present.
    Unreachable(String),

    /// The divergent container was removed but its replacement was not created.
    RemovedNotRecreated(String),
}

impl ActionOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ActionOutcome::Unchanged | ActionOutcome::Succeeded)
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionOutcome::NotAttempted => f.write_str("not attempted"),
            ActionOutcome::Unchanged => f.write_str("unchanged"),
            ActionOutcome::Succeeded => f.write_str("succeeded"),
            ActionOutcome::Failed(reason) => write!(f, "failed: {}", reason),
            ActionOutcome::Unreachable(reason) => write!(f, "unreachable: {}", reason),
            ActionOutcome::RemovedNotRecreated(reason) => {
                write!(f, "removed but not recreated: {}", reason)
            }
        }
    }
}

/// Outcome for an error that left any previous container in place.
fn failed(reason: String, error: &ConvergeError) -> ActionOutcome {
    if error.is_transport() {
        ActionOutcome::Unreachable(reason)
    } else {
        ActionOutcome::Failed(reason)
    }
}

/// Executes runtime actions for decided containers.
#[derive(Clone)]
pub struct Actuator {
    runtime: Arc<dyn ContainerRuntime>,
}

impl Actuator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Apply `decision` for `spec`. `observed` must be the state the decision
    /// was made from.
    pub async fn apply(
        &self,
        spec: &ContainerSpec,
        decision: &Decision,
        observed: Option<&RuntimeState>,
    ) -> ActionOutcome {
        match (decision, observed) {
            (Decision::Matches, _) => ActionOutcome::Unchanged,
            (Decision::Absent, _) => match self.create_and_start(spec).await {
                Ok(()) => ActionOutcome::Succeeded,
                Err(e) => failed(e.to_string(), &e),
            },
            (Decision::Diverges { fields }, Some(current)) => {
                info!(
                    differing = ?fields,
                    container_id = %current.id,
                    "Replacing divergent container"
                );
                self.replace(spec, current).await
            }
            (Decision::Diverges { .. }, None) => ActionOutcome::Failed(
                "divergent container has no observed state".to_string(),
            ),
        }
    }

    async fn replace(&self, spec: &ContainerSpec, current: &RuntimeState) -> ActionOutcome {
        if current.status.is_running() {
            if let Err(e) = self.runtime.stop(&current.id).await {
                return failed(format!("stop: {}", e), &e);
            }
        }
        if let Err(e) = self.runtime.remove(&current.id).await {
            return failed(format!("remove: {}", e), &e);
        }
        info!(container_id = %current.id, "Removed divergent container");

        match self.create(spec).await {
            Ok(id) => match self.runtime.start(&id).await {
                Ok(()) => ActionOutcome::Succeeded,
                Err(e) => failed(format!("start: {}", e), &e),
            },
            Err(e) => {
                warn!(error = %e, "Container removed but not recreated");
                ActionOutcome::RemovedNotRecreated(e.to_string())
            }
        }
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<(), ConvergeError> {
        let id = self.create(spec).await?;
        self.runtime.start(&id).await
    }

    /// Pull the effective image when missing, then create the container.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, ConvergeError> {
        let image = spec.effective_image()?;
        if !self.runtime.image_present(&image).await? {
            info!(%image, "Pulling image");
            self.runtime.pull(&image).await?;
        }
        let id = self.runtime.create(spec).await?;
        info!(container_id = %id, "Created container");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_types::ComparedField;
    use host_clients::{MockCall, MockRuntime};

    fn squid() -> ContainerSpec {
        ContainerSpec::new("squid", "stackhpc/squid:3.5.20-1")
    }

    #[tokio::test]
    async fn test_matches_makes_no_runtime_call() {
        let runtime = MockRuntime::new();
        let actuator = Actuator::new(Arc::new(runtime.clone()));

        let outcome = actuator.apply(&squid(), &Decision::Matches, None).await;
        assert_eq!(outcome, ActionOutcome::Unchanged);
        assert!(runtime.call_log().snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_absent_pulls_missing_image() {
        let runtime = MockRuntime::new();
        let actuator = Actuator::new(Arc::new(runtime.clone()));

        let outcome = actuator.apply(&squid(), &Decision::Absent, None).await;
        assert_eq!(outcome, ActionOutcome::Succeeded);
        assert!(runtime
            .mutations()
            .await
            .contains(&MockCall::Pull("stackhpc/squid:3.5.20-1".into())));
        assert!(runtime.container("squid").await.unwrap().status.is_running());
    }

    #[tokio::test]
    async fn test_absent_skips_pull_for_present_image() {
        let runtime = MockRuntime::new();
        runtime.add_image("stackhpc/squid:3.5.20-1").await;
        let actuator = Actuator::new(Arc::new(runtime.clone()));

        actuator.apply(&squid(), &Decision::Absent, None).await;
        assert!(!runtime
            .mutations()
            .await
            .iter()
            .any(|call| matches!(call, MockCall::Pull(_))));
    }

    #[tokio::test]
    async fn test_diverges_stops_removes_and_recreates() {
        let runtime = MockRuntime::new();
        let old_id = runtime.add_container_from_spec(&squid()).await.unwrap();
        let observed = runtime.container("squid").await.unwrap();
        let actuator = Actuator::new(Arc::new(runtime.clone()));

        let spec = squid().with_tag("3.5.21-1");
        let decision = Decision::Diverges {
            fields: vec![ComparedField::Image],
        };
        let outcome = actuator.apply(&spec, &decision, Some(&observed)).await;
        assert_eq!(outcome, ActionOutcome::Succeeded);

        let mutations = runtime.mutations().await;
        assert_eq!(mutations[0], MockCall::Stop(old_id.clone()));
        assert_eq!(mutations[1], MockCall::Remove(old_id));

        let current = runtime.container("squid").await.unwrap();
        assert_eq!(current.image, "stackhpc/squid:3.5.21-1");
    }

    #[tokio::test]
    async fn test_failed_create_after_removal_is_removed_not_recreated() {
        let runtime = MockRuntime::new();
        runtime.add_container_from_spec(&squid()).await.unwrap();
        runtime.fail_create_for("squid").await;
        let observed = runtime.container("squid").await.unwrap();
        let actuator = Actuator::new(Arc::new(runtime.clone()));

        let decision = Decision::Diverges {
            fields: vec![ComparedField::Image],
        };
        let outcome = actuator
            .apply(&squid().with_tag("3.5.21-1"), &decision, Some(&observed))
            .await;
        assert!(matches!(outcome, ActionOutcome::RemovedNotRecreated(_)));
        assert_eq!(runtime.container_count().await, 0);
    }

    #[tokio::test]
    async fn test_unreachable_registry_during_create_is_unreachable() {
        let runtime = MockRuntime::new();
        runtime.fail_pull_for("nginx").await;
        let actuator = Actuator::new(Arc::new(runtime.clone()));

        let outcome = actuator
            .apply(&ContainerSpec::new("web", "nginx"), &Decision::Absent, None)
            .await;
        assert!(matches!(outcome, ActionOutcome::Unreachable(_)));
        assert!(!outcome.is_ok());
        assert_eq!(runtime.container_count().await, 0);
    }

    #[tokio::test]
    async fn test_unreachable_registry_after_removal_is_removed_not_recreated() {
        let runtime = MockRuntime::new();
        runtime.add_container_from_spec(&squid()).await.unwrap();
        runtime.fail_pull_for("stackhpc/squid:3.5.21-1").await;
        let observed = runtime.container("squid").await.unwrap();
        let actuator = Actuator::new(Arc::new(runtime.clone()));

        let decision = Decision::Diverges {
            fields: vec![ComparedField::Image],
        };
        let outcome = actuator
            .apply(&squid().with_tag("3.5.21-1"), &decision, Some(&observed))
            .await;
        assert!(matches!(outcome, ActionOutcome::RemovedNotRecreated(_)));
    }

    #[tokio::test]
    async fn test_failed_remove_keeps_container() {
        let runtime = MockRuntime::new();
        runtime.add_container_from_spec(&squid()).await.unwrap();
        runtime.fail_remove_for("squid").await;
        let observed = runtime.container("squid").await.unwrap();
        let actuator = Actuator::new(Arc::new(runtime.clone()));

        let decision = Decision::Diverges {
            fields: vec![ComparedField::Env],
        };
        let outcome = actuator.apply(&squid(), &decision, Some(&observed)).await;
        assert!(matches!(outcome, ActionOutcome::Failed(_)));
        assert_eq!(runtime.container_count().await, 1);
    }
}
