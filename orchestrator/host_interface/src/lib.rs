//! Interfaces to the host-side collaborators of the reconciliation engine.
//!
//! The engine only issues intents through these traits; concrete clients
//! live in `host_clients`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use converge_types::{ContainerId, ContainerSpec, Result, RuntimeOptions, RuntimeState};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Trait for interacting with a single host's container engine (e.g., Docker)
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Returns the state of the named container, or `None` if no container
    /// with that name exists. An error means the runtime could not answer.
    async fn inspect(&self, name: &str) -> Result<Option<RuntimeState>>;

    /// Whether the image is already present in the local image store.
    async fn image_present(&self, image: &str) -> Result<bool>;

    /// Pulls an image from its registry.
    async fn pull(&self, image: &str) -> Result<()>;

    /// Creates (but does not start) a container for the spec.
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerId>;

    /// Starts a created container.
    async fn start(&self, container_id: &ContainerId) -> Result<()>;

    /// Stops a running container.
    async fn stop(&self, container_id: &ContainerId) -> Result<()>;

    /// Removes a stopped container.
    async fn remove(&self, container_id: &ContainerId) -> Result<()>;
}

/// Credentials for a registry login.
#[derive(Debug, Clone)]
pub struct RegistryCredentials {
    /// Registry address; `None` means the runtime's default registry.
    pub address: Option<String>,
    pub username: String,
    pub password: SecretString,
}

/// Trait for authenticating against an image registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn login(&self, credentials: &RegistryCredentials) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HookPhase {
    Pre,
    Post,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::Pre => f.write_str("pre"),
            HookPhase::Post => f.write_str("post"),
        }
    }
}

/// Execution context handed to a hook task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HookContext {
    pub container_name: String,
    pub phase: HookPhase,
    pub image: String,
    pub options: RuntimeOptions,
    /// Operator-supplied variables (`-e KEY=VALUE`).
    pub extra_vars: BTreeMap<String, String>,
}

/// Completion report of a hook task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookRunOutput {
    /// Exit code, or `None` if the task was terminated abnormally (signal, timeout).
    pub exit_code: Option<i32>,
    /// Diagnostic output collected from the task.
    pub diagnostics: String,
}

impl HookRunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Trait for executing externally defined task files.
#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn execute(&self, task_file: &Path, context: &HookContext) -> Result<HookRunOutput>;
}
