//! Notebook platform deployment CLI.
//!
//! Renders the platform configuration from a parameter file or the
//! environment, then creates or removes the cluster, its workloads and
//! the DNS record in front of them.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use nb_deploy::commands::{DeployCommand, UndeployCommand};
use nb_deploy::ui;

/// Notebook platform deployment tool.
#[derive(Parser)]
#[command(
    name = "nbdeploy",
    version,
    about = "Deploy or remove a notebook platform",
    long_about = "Deploy or remove a notebook platform.\n\n\
                  Parameters come from a YAML file (-f) or LSST_NB_* environment\n\
                  variables; anything required and still missing is prompted for."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the cluster, its workloads and the DNS record.
    Deploy(DeployCommand),

    /// Remove everything a deploy created.
    Undeploy(UndeployCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("info,nb_deploy=debug")
    } else {
        EnvFilter::new("warn,nb_deploy=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Deploy(cmd) => cmd.run(),
        Commands::Undeploy(cmd) => cmd.run(),
    };
    if let Err(e) = result {
        ui::print_error(&failure_message(&e));
        std::process::exit(1);
    }
    Ok(())
}

/// One line per cause, outermost first.
fn failure_message(error: &anyhow::Error) -> String {
    error
        .chain()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n  caused by: ")
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_failure_message_lists_causes() {
        let error = anyhow::anyhow!("kubectl exited with status 1").context("Undeploy failed");
        assert_eq!(
            failure_message(&error),
            "Undeploy failed\n  caused by: kubectl exited with status 1"
        );
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_directory_conflicts_with_temporary() {
        let result = Cli::try_parse_from(["nbdeploy", "deploy", "-d", "conf", "-t"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_only_conflicts_with_temporary() {
        let result = Cli::try_parse_from(["nbdeploy", "deploy", "-c", "-t"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_existing_namespace_requires_existing_cluster() {
        assert!(Cli::try_parse_from(["nbdeploy", "undeploy", "--existing-namespace"]).is_err());
        assert!(Cli::try_parse_from([
            "nbdeploy",
            "undeploy",
            "--existing-cluster",
            "--existing-namespace"
        ])
        .is_ok());
    }

    #[test]
    fn test_existing_database_requires_instance() {
        assert!(Cli::try_parse_from(["nbdeploy", "deploy", "--existing-database"]).is_err());
        let cli = Cli::try_parse_from([
            "nbdeploy",
            "-v",
            "deploy",
            "--existing-database-instance",
            "--existing-database",
        ])
        .unwrap();
        assert!(cli.verbose);
    }
}
