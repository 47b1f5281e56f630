//! Reconciliation Sense Module
//!
//! Observes the current state of one named container. Sensing is read-only:
//! it never mutates the host and its result is never cached between runs.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use converge_types::RuntimeState;
use host_interface::ContainerRuntime;

/// The runtime could not give a trustworthy answer about a container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Transport error: {0}")]
pub struct TransportError(pub String);

/// Queries the container runtime for the state of named containers.
#[derive(Clone)]
pub struct RuntimeInspector {
    runtime: Arc<dyn ContainerRuntime>,
}

impl RuntimeInspector {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Current state of the named container.
    ///
    /// Absence is `Ok(None)`. Any runtime error, and any answer describing a
    /// different container than the one requested, is a [`TransportError`].
    pub async fn inspect(&self, name: &str) -> Result<Option<RuntimeState>, TransportError> {
        let state = self
            .runtime
            .inspect(name)
            .await
            .map_err(|e| TransportError(e.to_string()))?;

        match state {
            Some(state) if state.name != name => Err(TransportError(format!(
                "runtime answered for container '{}' when asked for '{}'",
                state.name, name
            ))),
            Some(state) => {
                debug!(container = name, status = ?state.status, "Observed container");
                Ok(Some(state))
            }
            None => {
                debug!(container = name, "Container not present");
                Ok(None)
            }
        }
    }
}
