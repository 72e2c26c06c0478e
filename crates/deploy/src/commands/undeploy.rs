use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use super::load_parameters;
use crate::components::PlatformOptions;
use crate::params::{self, Operation};
use crate::platform::Platform;
use crate::runner::{Executables, ProcessRunner, REQUIRED_TOOLS};
use crate::ui;

/// Tear the notebook platform down.
#[derive(Args, Debug)]
pub struct UndeployCommand {
    /// Parameter file (YAML); the environment is used when omitted
    #[arg(short, long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// Keep the cluster
    #[arg(long)]
    existing_cluster: bool,

    /// Keep the namespace
    #[arg(long, requires = "existing_cluster")]
    existing_namespace: bool,
}

impl UndeployCommand {
    pub fn run(&self) -> Result<()> {
        ui::print_section("Notebook platform teardown");

        let record = load_parameters(self.file.as_deref(), Operation::Undeploy)?;
        let params = params::normalize(&record).context("Invalid parameters")?;
        ui::print_kv("Hostname", &params.hostname);
        ui::print_kv("Cluster", &params.cluster_name);
        ui::print_kv("Namespace", &params.namespace);

        let executables = Executables::resolve(REQUIRED_TOOLS, false)?;
        let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
        let runner = ProcessRunner::new(executables, scratch.path());
        let options = PlatformOptions {
            existing_cluster: self.existing_cluster,
            existing_namespace: self.existing_namespace,
            ..PlatformOptions::default()
        };

        let mut platform = Platform::new(&runner, params, options, scratch.path());
        let report = platform.undeploy().context("Teardown failed")?;

        for disk in &report.skipped_disks {
            ui::print_warning(&format!("Disk {disk} is still attached; delete it manually"));
        }
        ui::print_success(&format!(
            "Removed {} ({} phases, {} disks released)",
            platform.params().hostname,
            report.phases.len(),
            report.released_disks.len()
        ));
        Ok(())
    }
}
