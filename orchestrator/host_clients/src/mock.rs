//! In-memory collaborators for testing and development.
//!
//! `MockRuntime`, `MockRegistry` and `MockHookRunner` simulate the host
//! without touching a container engine. Runtime calls and hook runs can be
//! recorded into one shared [`CallLog`] so tests can assert on ordering.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use converge_types::{
    ContainerId, ContainerSpec, ContainerStatus, ConvergeError, Result, RuntimeState,
};
use host_interface::{
    ContainerRuntime, HookContext, HookPhase, HookRunOutput, HookRunner, RegistryClient,
    RegistryCredentials,
};

/// One recorded collaborator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Inspect(String),
    ImagePresent(String),
    Pull(String),
    /// Container name being created
    Create(String),
    Start(ContainerId),
    Stop(ContainerId),
    Remove(ContainerId),
    Hook { phase: HookPhase, task: PathBuf },
    Login(String),
}

impl MockCall {
    /// Whether the call changes host state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            MockCall::Pull(_)
                | MockCall::Create(_)
                | MockCall::Start(_)
                | MockCall::Stop(_)
                | MockCall::Remove(_)
        )
    }
}

/// Shared, ordered record of calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<RwLock<Vec<MockCall>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    async fn push(&self, call: MockCall) {
        self.calls.write().await.push(call);
    }

    pub async fn snapshot(&self) -> Vec<MockCall> {
        self.calls.read().await.clone()
    }

    pub async fn clear(&self) {
        self.calls.write().await.clear();
    }
}

/// Injected failures for the mock runtime.
#[derive(Debug, Default)]
struct Faults {
    /// Container names whose inspect fails with a transport error
    unreachable: HashSet<String>,
    /// Container names whose create fails
    create: HashSet<String>,
    /// Container names whose start fails
    start: HashSet<String>,
    /// Container names whose removal fails
    remove: HashSet<String>,
    /// Images whose pull fails
    pull: HashSet<String>,
}

/// Mock runtime that simulates a single host's container engine in memory.
#[derive(Debug, Clone, Default)]
pub struct MockRuntime {
    /// Containers by name
    containers: Arc<RwLock<HashMap<String, RuntimeState>>>,
    /// Locally present images
    images: Arc<RwLock<HashSet<String>>>,
    faults: Arc<RwLock<Faults>>,
    log: CallLog,
}

impl MockRuntime {
    /// Create a new mock runtime instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock runtime recording into an existing log.
    pub fn with_call_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }

    /// Seed a container as if it already existed on the host.
    pub async fn add_container(&self, state: RuntimeState) {
        self.containers
            .write()
            .await
            .insert(state.name.clone(), state);
    }

    /// Seed a running container built from a spec.
    pub async fn add_container_from_spec(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        let id = format!("mock-container-{}", Uuid::new_v4());
        self.add_container(RuntimeState {
            name: spec.name.clone(),
            id: id.clone(),
            image: spec.effective_image()?,
            options: spec.options.clone(),
            status: ContainerStatus::Running,
        })
        .await;
        Ok(id)
    }

    pub async fn add_image(&self, image: impl Into<String>) {
        self.images.write().await.insert(image.into());
    }

    pub async fn set_unreachable(&self, name: impl Into<String>) {
        self.faults.write().await.unreachable.insert(name.into());
    }

    pub async fn fail_create_for(&self, name: impl Into<String>) {
        self.faults.write().await.create.insert(name.into());
    }

    pub async fn fail_start_for(&self, name: impl Into<String>) {
        self.faults.write().await.start.insert(name.into());
    }

    pub async fn fail_remove_for(&self, name: impl Into<String>) {
        self.faults.write().await.remove.insert(name.into());
    }

    pub async fn fail_pull_for(&self, image: impl Into<String>) {
        self.faults.write().await.pull.insert(image.into());
    }

    /// Get the current state of a container (for testing).
    pub async fn container(&self, name: &str) -> Option<RuntimeState> {
        self.containers.read().await.get(name).cloned()
    }

    /// Get the count of containers (for testing).
    pub async fn container_count(&self) -> usize {
        self.containers.read().await.len()
    }

    /// Recorded calls that changed host state.
    pub async fn mutations(&self) -> Vec<MockCall> {
        self.log
            .snapshot()
            .await
            .into_iter()
            .filter(MockCall::is_mutation)
            .collect()
    }

    async fn name_of(&self, container_id: &ContainerId) -> Result<String> {
        self.containers
            .read()
            .await
            .values()
            .find(|c| &c.id == container_id)
            .map(|c| c.name.clone())
            .ok_or_else(|| {
                ConvergeError::RuntimeError(format!("Container not found: {}", container_id))
            })
    }

    async fn set_status(&self, container_id: &ContainerId, status: ContainerStatus) -> Result<()> {
        let name = self.name_of(container_id).await?;
        if let Some(container) = self.containers.write().await.get_mut(&name) {
            container.status = status;
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn inspect(&self, name: &str) -> Result<Option<RuntimeState>> {
        self.log.push(MockCall::Inspect(name.to_string())).await;

        if self.faults.read().await.unreachable.contains(name) {
            return Err(ConvergeError::Transport(
                "Simulated runtime socket failure".to_string(),
            ));
        }
        Ok(self.containers.read().await.get(name).cloned())
    }

    async fn image_present(&self, image: &str) -> Result<bool> {
        self.log.push(MockCall::ImagePresent(image.to_string())).await;
        Ok(self.images.read().await.contains(image))
    }

    async fn pull(&self, image: &str) -> Result<()> {
        self.log.push(MockCall::Pull(image.to_string())).await;

        if self.faults.read().await.pull.contains(image) {
            return Err(ConvergeError::Transport(format!(
                "Simulated registry failure pulling {}",
                image
            )));
        }
        info!("MockRuntime: Pulled image {}", image);
        self.images.write().await.insert(image.to_string());
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        self.log.push(MockCall::Create(spec.name.clone())).await;

        if self.faults.read().await.create.contains(&spec.name) {
            return Err(ConvergeError::RuntimeError(
                "Simulated container creation failure".to_string(),
            ));
        }

        let mut containers = self.containers.write().await;
        if containers.contains_key(&spec.name) {
            return Err(ConvergeError::RuntimeError(format!(
                "Conflict: container name {} already in use",
                spec.name
            )));
        }

        let container_id = format!("mock-container-{}", Uuid::new_v4());
        info!("MockRuntime: Creating container {} as {}", spec.name, container_id);
        debug!("Container spec: {:?}", spec);

        containers.insert(
            spec.name.clone(),
            RuntimeState {
                name: spec.name.clone(),
                id: container_id.clone(),
                image: spec.effective_image()?,
                options: spec.options.clone(),
                status: ContainerStatus::Created,
            },
        );
        Ok(container_id)
    }

    async fn start(&self, container_id: &ContainerId) -> Result<()> {
        self.log.push(MockCall::Start(container_id.clone())).await;

        let name = self.name_of(container_id).await?;
        if self.faults.read().await.start.contains(&name) {
            return Err(ConvergeError::RuntimeError(
                "Simulated container start failure".to_string(),
            ));
        }
        self.set_status(container_id, ContainerStatus::Running).await
    }

    async fn stop(&self, container_id: &ContainerId) -> Result<()> {
        self.log.push(MockCall::Stop(container_id.clone())).await;
        info!("MockRuntime: Stopping container {}", container_id);
        self.set_status(container_id, ContainerStatus::Exited).await
    }

    async fn remove(&self, container_id: &ContainerId) -> Result<()> {
        self.log.push(MockCall::Remove(container_id.clone())).await;
        info!("MockRuntime: Removing container {}", container_id);

        let name = self.name_of(container_id).await?;
        if self.faults.read().await.remove.contains(&name) {
            return Err(ConvergeError::RuntimeError(
                "Simulated container removal failure".to_string(),
            ));
        }
        self.containers.write().await.remove(&name);
        Ok(())
    }
}

/// Mock registry that accepts or rejects every login.
#[derive(Debug, Clone, Default)]
pub struct MockRegistry {
    reject: Arc<RwLock<bool>>,
    logins: Arc<RwLock<usize>>,
    log: CallLog,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_call_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub async fn set_reject(&self, reject: bool) {
        *self.reject.write().await = reject;
    }

    pub async fn login_count(&self) -> usize {
        *self.logins.read().await
    }
}

#[async_trait]
impl RegistryClient for MockRegistry {
    async fn login(&self, credentials: &RegistryCredentials) -> Result<()> {
        self.log
            .push(MockCall::Login(credentials.username.clone()))
            .await;
        *self.logins.write().await += 1;

        if *self.reject.read().await {
            return Err(ConvergeError::RegistryError(
                "Simulated authentication failure".to_string(),
            ));
        }
        Ok(())
    }
}

/// Mock hook runner. Every task succeeds unless configured otherwise.
#[derive(Debug, Clone, Default)]
pub struct MockHookRunner {
    outcomes: Arc<RwLock<HashMap<PathBuf, HookRunOutput>>>,
    broken: Arc<RwLock<HashSet<PathBuf>>>,
    contexts: Arc<RwLock<Vec<(PathBuf, HookContext)>>>,
    log: CallLog,
}

impl MockHookRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_call_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Make a task exit with the given code and diagnostics.
    pub async fn fail_task(&self, task: impl Into<PathBuf>, exit_code: i32, diagnostics: &str) {
        self.outcomes.write().await.insert(
            task.into(),
            HookRunOutput {
                exit_code: Some(exit_code),
                diagnostics: diagnostics.to_string(),
            },
        );
    }

    /// Make the runner itself fail to launch a task.
    pub async fn break_task(&self, task: impl Into<PathBuf>) {
        self.broken.write().await.insert(task.into());
    }

    /// Task files run so far with the context each received.
    pub async fn invocations(&self) -> Vec<(PathBuf, HookContext)> {
        self.contexts.read().await.clone()
    }
}

#[async_trait]
impl HookRunner for MockHookRunner {
    async fn execute(&self, task_file: &Path, context: &HookContext) -> Result<HookRunOutput> {
        self.log
            .push(MockCall::Hook {
                phase: context.phase,
                task: task_file.to_path_buf(),
            })
            .await;
        self.contexts
            .write()
            .await
            .push((task_file.to_path_buf(), context.clone()));

        if self.broken.read().await.contains(task_file) {
            return Err(ConvergeError::HookError(format!(
                "Simulated launch failure for {}",
                task_file.display()
            )));
        }

        Ok(self
            .outcomes
            .read()
            .await
            .get(task_file)
            .cloned()
            .unwrap_or(HookRunOutput {
                exit_code: Some(0),
                diagnostics: String::new(),
            }))
    }
}
