//! Configuration loading for converge
//!
//! This crate provides:
//! - The declared container list (`containers.yml`), validated into a `ContainerSpecList`
//! - Engine settings (`converge.toml`): registry login, runtime, hooks and run behaviour
//! - Configuration paths
//!
//! # Configuration Location
//!
//! Configuration is read from `$CONVERGE_CONFIG_PATH`, or `/etc/converge/`:
//! - `containers.yml` - Declared containers, in reconciliation order
//! - `converge.toml` - Settings (optional)
//!
//! # Example
//!
//! ```no_run
//! use deploy_config::{load_containers, ConfigPaths, Settings};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let paths = ConfigPaths::from_env();
//!     let settings = Settings::load(paths.settings_file()).await?;
//!     let specs = load_containers(paths.containers_file()).await?;
//!
//!     println!("{} containers, halt on failure: {}", specs.len(), settings.reconcile.halt_on_failure);
//!     Ok(())
//! }
//! ```

pub mod containers;
pub mod paths;
pub mod settings;
mod error;

pub use containers::{load_containers, parse_containers, parse_port};
pub use error::{ConfigError, Result};
pub use paths::ConfigPaths;
pub use settings::{HookSettings, ReconcileSettings, RegistrySettings, RuntimeSettings, Settings};

/// Application name used for cache paths
pub const APP_NAME: &str = "converge";

/// Environment variable overriding the configuration directory
pub const CONFIG_PATH_ENV: &str = "CONVERGE_CONFIG_PATH";

/// Configuration directory used when nothing else is given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/converge";
