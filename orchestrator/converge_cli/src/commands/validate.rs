//! Validate command - load configuration without contacting the runtime.

use std::path::Path;

use clap::Args;

use crate::commands::{load, SelectionArgs};
use crate::output::{self, print_specs};
use crate::OutputFormat;

/// Arguments for the validate command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,
}

/// Execute the validate command.
pub async fn execute(args: ValidateArgs, config_path: &Path, format: OutputFormat) -> anyhow::Result<i32> {
    let loaded = load(config_path, &args.selection).await?;

    print_specs(&loaded.specs, format)?;
    if matches!(format, OutputFormat::Table) {
        output::success(&format!(
            "{} container(s) valid in {}",
            loaded.specs.len(),
            loaded.paths.containers_file().display()
        ));
    }
    Ok(0)
}
