//! Subcommands and the setup they share.

pub mod apply;
pub mod plan;
pub mod validate;

use std::path::Path;
use std::sync::Arc;

use clap::Args;
use tracing::debug;

use converge_types::ContainerSpecList;
use deploy_config::{load_containers, ConfigPaths, Settings};
use host_clients::{DockerCliConfig, DockerCliRegistry, DockerCliRuntime, PlaybookConfig, PlaybookHookRunner};

use crate::error::Result;

/// Container selection shared by every subcommand.
#[derive(Args, Debug, Default)]
pub struct SelectionArgs {
    /// Only handle these containers (comma separated, declared order is kept)
    #[arg(short, long, value_delimiter = ',')]
    pub limit: Vec<String>,
}

/// Loaded configuration for one invocation.
pub struct Loaded {
    pub paths: ConfigPaths,
    pub settings: Settings,
    pub specs: ContainerSpecList,
}

/// Load settings and the (optionally limited) container list.
pub async fn load(config_path: &Path, selection: &SelectionArgs) -> Result<Loaded> {
    let paths = ConfigPaths::new(config_path);
    debug!(config_dir = %paths.config_dir().display(), "Loading configuration");

    let settings = Settings::load(paths.settings_file()).await?;
    let mut specs = load_containers(paths.containers_file()).await?;
    if !selection.limit.is_empty() {
        specs = specs.limit(selection.limit.as_slice())?;
    }

    Ok(Loaded {
        paths,
        settings,
        specs,
    })
}

fn docker_config(settings: &Settings) -> DockerCliConfig {
    DockerCliConfig {
        docker_binary: settings.runtime.docker_binary.clone(),
        command_timeout: settings.runtime.command_timeout(),
        pull_timeout: settings.runtime.pull_timeout(),
        stop_timeout: settings.runtime.stop_timeout(),
    }
}

pub fn runtime(settings: &Settings) -> Arc<DockerCliRuntime> {
    Arc::new(DockerCliRuntime::new(docker_config(settings)))
}

pub fn registry(settings: &Settings) -> Arc<DockerCliRegistry> {
    Arc::new(DockerCliRegistry::new(docker_config(settings)))
}

pub fn hook_runner(settings: &Settings) -> Arc<PlaybookHookRunner> {
    Arc::new(PlaybookHookRunner::new(PlaybookConfig {
        program: settings.hooks.runner.clone(),
        extra_args: settings.hooks.extra_args.clone(),
        timeout: settings.hooks.timeout(),
    }))
}
