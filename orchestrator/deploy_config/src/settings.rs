//! Engine settings from `converge.toml`.
//!
//! Every section is optional:
//!
//! ```toml
//! [registry]
//! login = true
//! address = "registry.example.com"
//! username = "kolla"
//! password_env = "CONVERGE_REGISTRY_PASSWORD"
//!
//! [runtime]
//! docker_binary = "docker"
//! command_timeout_secs = 60
//! pull_timeout_secs = 900
//! stop_timeout_secs = 10
//!
//! [hooks]
//! runner = "ansible-playbook"
//! timeout_secs = 1800
//! extra_args = ["-i", "/etc/converge/inventory"]
//!
//! [reconcile]
//! halt_on_failure = false
//! stats_path = "/var/lib/converge/stats.json"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::debug;

use host_interface::RegistryCredentials;

use crate::error::{ConfigError, Result};

/// Environment variable holding the registry password unless overridden.
pub const DEFAULT_PASSWORD_ENV: &str = "CONVERGE_REGISTRY_PASSWORD";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub registry: RegistrySettings,
    pub runtime: RuntimeSettings,
    pub hooks: HookSettings,
    pub reconcile: ReconcileSettings,
}

/// Registry login settings. The password itself never lives in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrySettings {
    /// Log in before reconciling.
    pub login: bool,
    /// Registry address; the runtime default when absent.
    pub address: Option<String>,
    pub username: Option<String>,
    /// Name of the environment variable holding the password.
    pub password_env: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            login: true,
            address: None,
            username: None,
            password_env: DEFAULT_PASSWORD_ENV.to_string(),
        }
    }
}

impl RegistrySettings {
    /// Credentials from the process environment. `None` when no username is configured.
    pub fn credentials(&self) -> Result<Option<RegistryCredentials>> {
        self.credentials_with(|name| std::env::var(name).ok())
    }

    /// Credentials with an explicit variable lookup.
    pub fn credentials_with<F>(&self, lookup: F) -> Result<Option<RegistryCredentials>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(username) = &self.username else {
            return Ok(None);
        };
        let password = lookup(&self.password_env).ok_or_else(|| {
            ConfigError::MissingSecret(format!(
                "registry password for '{}' expected in ${}",
                username, self.password_env
            ))
        })?;

        Ok(Some(RegistryCredentials {
            address: self.address.clone(),
            username: username.clone(),
            password: SecretString::new(password),
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeSettings {
    pub docker_binary: PathBuf,
    pub command_timeout_secs: u64,
    pub pull_timeout_secs: u64,
    pub stop_timeout_secs: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            docker_binary: PathBuf::from("docker"),
            command_timeout_secs: 60,
            pull_timeout_secs: 900,
            stop_timeout_secs: 10,
        }
    }
}

impl RuntimeSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HookSettings {
    /// Program that runs hook task files.
    pub runner: PathBuf,
    pub timeout_secs: u64,
    /// Arguments placed before the task file.
    pub extra_args: Vec<String>,
}

impl Default for HookSettings {
    fn default() -> Self {
        Self {
            runner: PathBuf::from("ansible-playbook"),
            timeout_secs: 1800,
            extra_args: Vec::new(),
        }
    }
}

impl HookSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileSettings {
    /// Stop after the first failed container.
    pub halt_on_failure: bool,
    /// Where to write the run statistics file.
    pub stats_path: Option<PathBuf>,
}

impl Settings {
    /// Parse from TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from file; a missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "No settings file; using defaults");
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&content)
    }
}
