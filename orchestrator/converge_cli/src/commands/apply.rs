//! Apply command - converge containers to the declared state.

use std::path::{Path, PathBuf};

use clap::Args;
use tracing::warn;

use converge_core::{BatchResult, ReconcileOptions, Reconciler, RunStats};
use deploy_config::{ConfigPaths, Settings};

use crate::commands::{hook_runner, load, registry, runtime, SelectionArgs};
use crate::error::{CliError, Result};
use crate::output::print_batch;
use crate::OutputFormat;

/// Arguments for the apply command.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Variable passed to every hook (KEY=VALUE, repeatable)
    #[arg(short = 'e', long = "extra-var", value_parser = parse_key_val)]
    pub extra_vars: Vec<(String, String)>,

    /// Do not log in to the registry
    #[arg(long)]
    pub skip_registry_login: bool,

    /// Stop after the first failed container
    #[arg(long)]
    pub halt_on_failure: bool,

    /// Where to write the run statistics file
    #[arg(long)]
    pub stats_path: Option<PathBuf>,
}

/// Parse a `KEY=VALUE` pair.
fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Combine settings and flags into reconciler options.
fn reconcile_options(args: &ApplyArgs, settings: &Settings) -> Result<ReconcileOptions> {
    let skip_registry_login = args.skip_registry_login || !settings.registry.login;
    let credentials = if skip_registry_login {
        None
    } else {
        settings.registry.credentials()?
    };

    Ok(ReconcileOptions {
        credentials,
        skip_registry_login,
        halt_on_failure: args.halt_on_failure || settings.reconcile.halt_on_failure,
        extra_vars: args.extra_vars.iter().cloned().collect(),
    })
}

fn stats_path(args: &ApplyArgs, settings: &Settings, paths: &ConfigPaths) -> PathBuf {
    args.stats_path
        .clone()
        .or_else(|| settings.reconcile.stats_path.clone())
        .unwrap_or_else(|| paths.default_stats_file())
}

fn write_stats(batch: &BatchResult, path: &Path) {
    if let Err(e) = RunStats::from_batch(batch).write(path) {
        warn!(path = %path.display(), error = %e, "Could not write run statistics");
    }
}

/// Execute the apply command. Returns the process exit code.
pub async fn execute(args: ApplyArgs, config_path: &Path, format: OutputFormat) -> anyhow::Result<i32> {
    let loaded = load(config_path, &args.selection).await?;
    let options = reconcile_options(&args, &loaded.settings)?;

    let reconciler = Reconciler::new(
        runtime(&loaded.settings),
        registry(&loaded.settings),
        hook_runner(&loaded.settings),
        options,
    );
    let batch = reconciler
        .reconcile(&loaded.specs)
        .await
        .map_err(CliError::from)?;

    write_stats(&batch, &stats_path(&args, &loaded.settings, &loaded.paths));
    print_batch(&batch, format)?;
    Ok(batch.exit_code())
}
