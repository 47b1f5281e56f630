//! Host-side clients for the converge engine.
//!
//! This crate provides implementations of the `host_interface` traits:
//! - `DockerCliRuntime` / `DockerCliRegistry`: drive the `docker` binary (requires `docker-cli` feature, on by default)
//! - `PlaybookHookRunner`: runs hook task files with `ansible-playbook` or another program
//! - `MockRuntime`, `MockRegistry`, `MockHookRunner`: in-memory doubles for testing (requires `mock-runtime` feature)

pub mod playbook;

#[cfg(feature = "docker-cli")]
pub mod docker_cli;

#[cfg(feature = "mock-runtime")]
pub mod mock;

// Re-export common types
pub use host_interface::{
    ContainerRuntime, HookContext, HookPhase, HookRunOutput, HookRunner, RegistryClient,
    RegistryCredentials,
};

pub use playbook::{PlaybookConfig, PlaybookHookRunner};

#[cfg(feature = "docker-cli")]
pub use docker_cli::{DockerCliConfig, DockerCliError, DockerCliRegistry, DockerCliRuntime};

#[cfg(feature = "mock-runtime")]
pub use mock::{CallLog, MockCall, MockHookRunner, MockRegistry, MockRuntime};
