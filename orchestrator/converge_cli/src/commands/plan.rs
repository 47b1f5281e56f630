//! Plan command - check mode.

use std::path::Path;

use clap::Args;

use converge_core::{ReconcileOptions, Reconciler};

use crate::commands::{hook_runner, load, registry, runtime, SelectionArgs};
use crate::output::print_plan;
use crate::OutputFormat;

/// Arguments for the plan command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,
}

/// Execute the plan command. Exits 1 when any container could not be inspected.
pub async fn execute(args: PlanArgs, config_path: &Path, format: OutputFormat) -> anyhow::Result<i32> {
    let loaded = load(config_path, &args.selection).await?;

    let reconciler = Reconciler::new(
        runtime(&loaded.settings),
        registry(&loaded.settings),
        hook_runner(&loaded.settings),
        ReconcileOptions::default(),
    );
    let entries = reconciler.plan(&loaded.specs).await;

    print_plan(&entries, format)?;
    Ok(if entries.iter().any(|e| e.error.is_some()) { 1 } else { 0 })
}
