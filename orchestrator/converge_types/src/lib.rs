//! Shared data model for the converge reconciliation engine.
//!
//! A [`ContainerSpec`] is the declared desired state of one named container;
//! a [`RuntimeState`] is what the container runtime reports for it.

pub mod image;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub use image::{canonical_image, validate_tag, ImageRefError, ImageReference};

pub type ContainerId = String; // Assigned by the runtime

#[derive(Debug, Error)]
pub enum ConvergeError {
    /// The container runtime or registry could not be reached.
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Container runtime error: {0}")]
    RuntimeError(String),
    #[error("Registry error: {0}")]
    RegistryError(String),
    #[error("Hook runner error: {0}")]
    HookError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ConvergeError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ConvergeError::Transport(_))
    }
}

impl From<ImageRefError> for ConvergeError {
    fn from(err: ImageRefError) -> Self {
        ConvergeError::ConfigError(err.to_string())
    }
}

// Generic result type for converge operations
pub type Result<T> = std::result::Result<T, ConvergeError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: Option<u16>, // If None, runtime chooses an ephemeral port
    pub protocol: String,       // "tcp" or "udp"
}

impl PortMapping {
    pub fn tcp(container_port: u16, host_port: Option<u16>) -> Self {
        Self {
            container_port,
            host_port,
            protocol: "tcp".to_string(),
        }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host_port {
            Some(host) => write!(f, "{}:{}/{}", host, self.container_port, self.protocol),
            None => write!(f, "{}/{}", self.container_port, self.protocol),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    UnlessStopped,
    OnFailure,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::UnlessStopped => "unless-stopped",
            RestartPolicy::OnFailure => "on-failure",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Ulimit {
    pub soft: i64,
    pub hard: i64,
}

/// Runtime options of a container, declared or observed.
///
/// Maps and sorted sets are used where the option is unordered, so equality
/// of two option records does not depend on declaration order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeOptions {
    pub command: Option<Vec<String>>,
    pub env: BTreeMap<String, String>,
    pub network_mode: Option<String>,
    pub ports: BTreeSet<PortMapping>,
    pub volumes: BTreeSet<String>,
    pub capabilities: BTreeSet<String>,
    pub privileged: bool,
    pub restart_policy: Option<RestartPolicy>,
    pub shm_size: Option<String>,
    pub sysctls: BTreeMap<String, String>,
    pub ulimits: BTreeMap<String, Ulimit>,
    pub user: Option<String>,
    pub pid_mode: Option<String>,
    pub ipc_mode: Option<String>,
    pub init: Option<bool>,
    pub detach: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            command: None,
            env: BTreeMap::new(),
            network_mode: None,
            ports: BTreeSet::new(),
            volumes: BTreeSet::new(),
            capabilities: BTreeSet::new(),
            privileged: false,
            restart_policy: None,
            shm_size: None,
            sysctls: BTreeMap::new(),
            ulimits: BTreeMap::new(),
            user: None,
            pid_mode: None,
            ipc_mode: None,
            init: None,
            detach: true,
        }
    }
}

/// A field that can participate in change detection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ComparedField {
    Image,
    Command,
    Env,
    Ports,
    Volumes,
    NetworkMode,
    Capabilities,
    Privileged,
    RestartPolicy,
    ShmSize,
    Sysctls,
    Ulimits,
    User,
    PidMode,
    IpcMode,
    Init,
}

impl ComparedField {
    /// Fields compared when a spec declares no `comparisons` override.
    pub const DEFAULTS: [ComparedField; 6] = [
        ComparedField::Image,
        ComparedField::Command,
        ComparedField::Env,
        ComparedField::Ports,
        ComparedField::Volumes,
        ComparedField::NetworkMode,
    ];

    pub const ALL: [ComparedField; 16] = [
        ComparedField::Image,
        ComparedField::Command,
        ComparedField::Env,
        ComparedField::Ports,
        ComparedField::Volumes,
        ComparedField::NetworkMode,
        ComparedField::Capabilities,
        ComparedField::Privileged,
        ComparedField::RestartPolicy,
        ComparedField::ShmSize,
        ComparedField::Sysctls,
        ComparedField::Ulimits,
        ComparedField::User,
        ComparedField::PidMode,
        ComparedField::IpcMode,
        ComparedField::Init,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComparedField::Image => "image",
            ComparedField::Command => "command",
            ComparedField::Env => "env",
            ComparedField::Ports => "ports",
            ComparedField::Volumes => "volumes",
            ComparedField::NetworkMode => "network_mode",
            ComparedField::Capabilities => "capabilities",
            ComparedField::Privileged => "privileged",
            ComparedField::RestartPolicy => "restart_policy",
            ComparedField::ShmSize => "shm_size",
            ComparedField::Sysctls => "sysctls",
            ComparedField::Ulimits => "ulimits",
            ComparedField::User => "user",
            ComparedField::PidMode => "pid_mode",
            ComparedField::IpcMode => "ipc_mode",
            ComparedField::Init => "init",
        }
    }
}

impl fmt::Display for ComparedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComparedField {
    type Err = ConvergeError;

    fn from_str(s: &str) -> Result<Self> {
        ComparedField::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| ConvergeError::ConfigError(format!("unknown comparison field '{}'", s)))
    }
}

/// Declared desired state for one named container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String, // e.g., "stackhpc/squid:3.5.20-1"
    /// Replaces the tag of `image` when set.
    pub tag: Option<String>,
    pub options: RuntimeOptions,
    /// Task file run before the container action.
    pub pre: Option<PathBuf>,
    /// Task file run after the container action.
    pub post: Option<PathBuf>,
    /// Overrides the default set of compared fields.
    pub comparisons: Option<Vec<ComparedField>>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            tag: None,
            options: RuntimeOptions::default(),
            pre: None,
            post: None,
            comparisons: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_pre(mut self, path: impl Into<PathBuf>) -> Self {
        self.pre = Some(path.into());
        self
    }

    pub fn with_post(mut self, path: impl Into<PathBuf>) -> Self {
        self.post = Some(path.into());
        self
    }

    pub fn with_comparisons(mut self, fields: Vec<ComparedField>) -> Self {
        self.comparisons = Some(fields);
        self
    }

    /// The image to run: `image` with the tag override applied.
    pub fn effective_image(&self) -> Result<String> {
        let reference = ImageReference::parse(&self.image)?;
        match &self.tag {
            Some(tag) => Ok(reference.with_tag(tag)?),
            None => Ok(self.image.trim().to_string()),
        }
    }

    pub fn compared_fields(&self) -> &[ComparedField] {
        match &self.comparisons {
            Some(fields) => fields.as_slice(),
            None => &ComparedField::DEFAULTS[..],
        }
    }

    /// Check the per-spec invariants: non-empty name, parseable image, valid tag.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConvergeError::ConfigError(
                "container name must not be empty".to_string(),
            ));
        }
        if self.image.trim().is_empty() {
            return Err(ConvergeError::ConfigError(format!(
                "container '{}': image must not be empty",
                self.name
            )));
        }
        self.effective_image().map_err(|e| {
            ConvergeError::ConfigError(format!("container '{}': {}", self.name, e))
        })?;
        Ok(())
    }
}

/// An ordered, validated batch of container specs.
///
/// Construction fails if any spec is invalid or two specs share a name, so a
/// value of this type can be reconciled without further checks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerSpecList {
    specs: Vec<ContainerSpec>,
}

impl ContainerSpecList {
    pub fn new(specs: Vec<ContainerSpec>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for spec in &specs {
            spec.validate()?;
            if !seen.insert(spec.name.as_str()) {
                return Err(ConvergeError::ConfigError(format!(
                    "duplicate container name '{}'",
                    spec.name
                )));
            }
        }
        Ok(Self { specs })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ContainerSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ContainerSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Keep only the named containers, in declared order.
    pub fn limit<S: AsRef<str>>(&self, names: &[S]) -> Result<Self> {
        if let Some(unknown) = names.iter().find(|n| self.get(n.as_ref()).is_none()) {
            return Err(ConvergeError::ConfigError(format!(
                "limit names unknown container '{}'",
                unknown.as_ref()
            )));
        }
        let specs = self
            .specs
            .iter()
            .filter(|s| names.iter().any(|n| n.as_ref() == s.name))
            .cloned()
            .collect();
        Ok(Self { specs })
    }
}

impl<'a> IntoIterator for &'a ContainerSpecList {
    type Item = &'a ContainerSpec;
    type IntoIter = std::slice::Iter<'a, ContainerSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.specs.iter()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
    Unknown,
}

impl ContainerStatus {
    /// Map a runtime status string (Docker `State.Status`) onto a status.
    pub fn from_runtime(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "restarting" => ContainerStatus::Restarting,
            "exited" | "stopped" => ContainerStatus::Exited,
            "dead" => ContainerStatus::Dead,
            _ => ContainerStatus::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self,
            ContainerStatus::Running | ContainerStatus::Restarting | ContainerStatus::Paused
        )
    }
}

/// Observed state of a container present on the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeState {
    pub name: String,
    pub id: ContainerId,
    pub image: String,
    pub options: RuntimeOptions,
    pub status: ContainerStatus,
}
