use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use super::{default_config_dir, load_parameters};
use crate::components::PlatformOptions;
use crate::params::{self, Operation};
use crate::platform::Platform;
use crate::runner::{Executables, ProcessRunner, REQUIRED_TOOLS};
use crate::ui;

/// Create the notebook platform.
#[derive(Args, Debug)]
pub struct DeployCommand {
    /// Parameter file (YAML); the environment is used when omitted
    #[arg(short, long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// Configuration directory [default: ./configurations/<hostname>]
    #[arg(short, long, value_name = "DIR", conflicts_with = "temporary")]
    directory: Option<PathBuf>,

    /// Render into a scratch directory removed after the run
    #[arg(short, long, conflicts_with = "config_only")]
    temporary: bool,

    /// Write configuration only; touch no cluster
    #[arg(short, long)]
    config_only: bool,

    /// Do not install the image prepuller
    #[arg(long)]
    disable_prepuller: bool,

    /// Deploy into a cluster that already exists
    #[arg(long)]
    existing_cluster: bool,

    /// Deploy into a namespace that already exists
    #[arg(long, requires = "existing_cluster")]
    existing_namespace: bool,

    /// Use the existing database instance named after the cluster
    #[arg(long)]
    existing_database_instance: bool,

    /// The session database already exists in that instance
    #[arg(long, requires = "existing_database_instance")]
    existing_database: bool,
}

impl DeployCommand {
    fn options(&self) -> PlatformOptions {
        PlatformOptions {
            config_only: self.config_only,
            temporary: self.temporary,
            disable_prepuller: self.disable_prepuller,
            existing_cluster: self.existing_cluster,
            existing_namespace: self.existing_namespace,
            existing_database_instance: self.existing_database_instance,
            existing_database: self.existing_database,
        }
    }

    pub fn run(&self) -> Result<()> {
        ui::print_section("Notebook platform deployment");

        let record = load_parameters(self.file.as_deref(), Operation::Deploy)?;
        let params = params::normalize(&record).context("Invalid deployment parameters")?;
        if self.existing_database {
            info!("Using existing session database");
        }

        let scratch = if self.temporary {
            Some(tempfile::tempdir().context("Failed to create scratch directory")?)
        } else {
            None
        };
        let config_dir = match (&scratch, &self.directory) {
            (Some(dir), _) => dir.path().to_path_buf(),
            (None, Some(dir)) => dir.clone(),
            (None, None) => default_config_dir(&params.hostname),
        };
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create {}", config_dir.display()))?;
        ui::print_kv("Hostname", &params.hostname);
        ui::print_kv("Cluster", &params.cluster_name);
        ui::print_kv("Namespace", &params.namespace);
        ui::print_kv("Configuration", &config_dir.display().to_string());

        let mut executables = Executables::resolve(REQUIRED_TOOLS, self.config_only)?;
        let dhparam_given = params.path("tls_dhparam").is_some();
        executables.ensure("openssl", self.config_only || dhparam_given)?;
        let runner = ProcessRunner::new(executables, &config_dir);

        let mut platform = Platform::new(&runner, params, self.options(), config_dir.clone())
            .with_source_file(self.file.clone());
        let report = platform.deploy().context("Deployment failed")?;

        if let Some(snapshot) = &report.snapshot {
            ui::print_kv("Snapshot", &snapshot.display().to_string());
        }
        if self.config_only {
            return Ok(());
        }
        ui::print_success(&format!(
            "Deployed {} in {} phases",
            platform.params().hostname,
            report.phases.len()
        ));
        Ok(())
    }
}
