//! converge CLI
//!
//! Converges the containers on this host to the declared configuration.

mod commands;
mod error;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use observability::{init_tracing, TracingConfig};

use crate::commands::{apply, plan, validate};

/// Exit code for errors raised before any container was touched.
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// Declarative container convergence
#[derive(Parser)]
#[command(name = "converge")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration directory
    #[arg(
        long,
        global = true,
        env = deploy_config::CONFIG_PATH_ENV,
        default_value = deploy_config::DEFAULT_CONFIG_PATH
    )]
    config_path: PathBuf,

    /// Verbose output (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Output format
    #[arg(long, global = true, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

#[derive(Subcommand)]
enum Commands {
    /// Converge containers to the declared state
    Apply(apply::ApplyArgs),

    /// Show what apply would do, without changing anything
    Plan(plan::PlanArgs),

    /// Validate the configuration and list declared containers
    Validate(validate::ValidateArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(
        TracingConfig::new("converge")
            .with_verbosity(cli.verbose)
            .with_json(cli.log_json),
    );

    let result = match cli.command {
        Commands::Apply(args) => apply::execute(args, &cli.config_path, cli.format).await,
        Commands::Plan(args) => plan::execute(args, &cli.config_path, cli.format).await,
        Commands::Validate(args) => validate::execute(args, &cli.config_path, cli.format).await,
    };

    match result {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply_flags() {
        let cli = Cli::try_parse_from([
            "converge",
            "--config-path",
            "/srv/deploy",
            "-vv",
            "apply",
            "--limit",
            "squid,nginx",
            "-e",
            "kolla_action=upgrade",
            "--halt-on-failure",
            "--format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.config_path, PathBuf::from("/srv/deploy"));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.format, OutputFormat::Json));
        let Commands::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.selection.limit, vec!["squid", "nginx"]);
        assert_eq!(
            args.extra_vars,
            vec![("kolla_action".to_string(), "upgrade".to_string())]
        );
        assert!(args.halt_on_failure);
        assert!(!args.skip_registry_login);
    }

    #[test]
    fn test_malformed_extra_var_is_rejected() {
        assert!(Cli::try_parse_from(["converge", "apply", "-e", "novalue"]).is_err());
    }
}
