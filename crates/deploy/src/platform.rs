//! Ordered deploy and undeploy of the whole platform.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::components::{
    release_disk, Cluster, Component, Ctx, Dns, Fileserver, Firefly, FsKeepalive, Hub,
    IngressController, LandingPage, Logging, Namespace, PlatformOptions, Prepuller, Proxy,
    TlsSecrets,
};
use crate::error::{DeployError, Result};
use crate::generate;
use crate::kubecontext::{self, ContextGuard};
use crate::manifests::DeploymentTree;
use crate::params::{Operation, Params, CONFIG_PLACEHOLDER};
use crate::poll::Patience;
use crate::preflight;
use crate::runner::CommandRunner;
use crate::snapshot;
use crate::tools;
use crate::ui;

/// Components to create, in order, for these parameters.
#[must_use]
pub fn deploy_plan(params: &Params, options: &PlatformOptions) -> Vec<Box<dyn Component>> {
    let mut plan: Vec<Box<dyn Component>> = vec![Box::new(Cluster)];
    if !options.existing_cluster {
        plan.push(Box::new(IngressController));
    }
    plan.push(Box::new(Namespace));
    if params.features.logging {
        plan.push(Box::new(Logging));
    }
    plan.push(Box::new(Fileserver));
    if params.external_fileserver_ip.is_none() {
        plan.push(Box::new(FsKeepalive));
    }
    if !options.disable_prepuller {
        plan.push(Box::new(Prepuller));
    }
    plan.push(Box::new(TlsSecrets));
    if params.features.firefly {
        plan.push(Box::new(Firefly));
    }
    plan.push(Box::new(Hub));
    plan.push(Box::new(Proxy));
    if params.features.landing_page {
        plan.push(Box::new(LandingPage));
    }
    plan.push(Box::new(Dns));
    plan
}

/// Components to destroy, in order.
///
/// Every optional component is included; deleting what was never created
/// is harmless, and the order is the exact reverse of a full deploy.
#[must_use]
pub fn teardown_plan() -> Vec<Box<dyn Component>> {
    vec![
        Box::new(Dns),
        Box::new(LandingPage),
        Box::new(Proxy),
        Box::new(Hub),
        Box::new(Firefly),
        Box::new(TlsSecrets),
        Box::new(Prepuller),
        Box::new(FsKeepalive),
        Box::new(Fileserver),
        Box::new(Logging),
        Box::new(Namespace),
        Box::new(IngressController),
        Box::new(Cluster),
    ]
}

/// What a run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub operation: Operation,
    /// Component phases in the order they ran.
    pub phases: Vec<&'static str>,
    /// Rendered configuration directory.
    pub config_dir: PathBuf,
    /// Snapshot written by a successful deploy.
    pub snapshot: Option<PathBuf>,
    /// Cloud disks released after teardown.
    pub released_disks: Vec<String>,
    /// Cloud disks that stayed attached and were left behind.
    pub skipped_disks: Vec<String>,
}

impl Report {
    fn new(operation: Operation, config_dir: &Path) -> Self {
        Self {
            operation,
            phases: Vec::new(),
            config_dir: config_dir.to_path_buf(),
            snapshot: None,
            released_disks: Vec::new(),
            skipped_disks: Vec::new(),
        }
    }
}

/// Lifecycle manager for one platform instance.
pub struct Platform<'a> {
    runner: &'a dyn CommandRunner,
    params: Params,
    options: PlatformOptions,
    config_dir: PathBuf,
    source_file: Option<PathBuf>,
    poll_delay: Option<Duration>,
}

impl<'a> Platform<'a> {
    #[must_use]
    pub fn new(
        runner: &'a dyn CommandRunner,
        params: Params,
        options: PlatformOptions,
        config_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            params,
            options,
            config_dir: config_dir.into(),
            source_file: None,
            poll_delay: None,
        }
    }

    /// Parameter file to copy as the snapshot.
    #[must_use]
    pub fn with_source_file(mut self, path: Option<PathBuf>) -> Self {
        self.source_file = path;
        self
    }

    /// Override every poll delay.
    #[must_use]
    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    fn ctx(&self, tree: DeploymentTree) -> Ctx<'_> {
        let mut ctx = Ctx::new(self.runner, &self.params, self.options, tree);
        ctx.poll_delay = self.poll_delay;
        ctx
    }

    fn resolve_project(&mut self) -> Result<()> {
        if self.params.project.is_some() || self.options.config_only {
            return Ok(());
        }
        let project = tools::default_project(self.runner)?
            .ok_or_else(|| DeployError::Other("Could not determine cloud project".into()))?;
        info!(project = %project, "Using default cloud project");
        self.params.project = Some(project);
        Ok(())
    }

    fn resolve_database_instance(&mut self) -> Result<()> {
        if self.params.database_instance.is_some() || !self.options.existing_database_instance {
            return Ok(());
        }
        let mut found = tools::database_instances(self.runner, &self.params)?;
        match found.len() {
            0 => Err(DeployError::Other(format!(
                "No database instance named {}-*",
                self.params.cluster_name
            ))),
            1 => {
                let instance = found.remove(0);
                info!(instance = %instance, "Using existing database instance");
                self.params.database_instance = Some(instance);
                Ok(())
            }
            _ => Err(DeployError::Other(format!(
                "Multiple database instances match {}-*: {}",
                self.params.cluster_name,
                found.join(", ")
            ))),
        }
    }

    /// Render configuration, or reuse a tree left by an earlier run.
    ///
    /// # Errors
    ///
    /// Returns generation errors.
    pub fn prepare_tree(&self) -> Result<DeploymentTree> {
        let tree = DeploymentTree::new(&self.config_dir);
        if tree.exists() {
            info!(dir = %tree.root().display(), "Reusing existing deployment configuration");
            return Ok(tree);
        }
        std::fs::create_dir_all(&self.config_dir)?;
        generate::generate(
            self.runner,
            &self.params,
            self.options.config_only,
            &self.config_dir,
        )
    }

    /// Create the platform.
    ///
    /// # Errors
    ///
    /// Any failure stops the deploy where it is; nothing already created
    /// is rolled back.
    pub fn deploy(&mut self) -> Result<Report> {
        let mut report = Report::new(Operation::Deploy, &self.config_dir);
        if self.options.config_only {
            self.params.zone_id = Some(CONFIG_PLACEHOLDER.to_string());
        } else {
            let checks = preflight::run(self.runner, &self.params.hostname)?;
            self.params.zone_id = Some(checks.zone_id);
        }
        self.resolve_project()?;
        let tree = self.prepare_tree()?;
        if self.options.config_only {
            report.snapshot = Some(self.write_snapshot()?);
            ui::print_success(&format!(
                "Configuration written to {}",
                self.config_dir.display()
            ));
            return Ok(report);
        }
        self.resolve_database_instance()?;

        let plan = deploy_plan(&self.params, &self.options);
        let _guard = ContextGuard::save(self.runner)?;
        let mut ctx = self.ctx(tree);
        ctx.deferred.db_identifier = Some(self.params.db_identifier());
        for (i, component) in plan.iter().enumerate() {
            ui::print_phase(i + 1, plan.len(), &format!("Creating {}", component.name()));
            info!(component = component.name(), "Creating");
            if let Err(e) = component.create(&mut ctx) {
                error!(component = component.name(), error = %e, "Create failed");
                return Err(e);
            }
            report.phases.push(component.name());
        }
        drop(ctx);
        report.snapshot = Some(self.write_snapshot()?);
        Ok(report)
    }

    /// Tear the platform down.
    ///
    /// # Errors
    ///
    /// Any failure stops the teardown where it is.
    pub fn undeploy(&mut self) -> Result<Report> {
        let mut report = Report::new(Operation::Undeploy, &self.config_dir);
        match tools::dns_zone_id(self.runner, &self.params.hostname) {
            Ok(zone_id) => self.params.zone_id = Some(zone_id),
            Err(e) => warn!(error = %e, "DNS record will not be removed"),
        }

        let _guard = ContextGuard::save(self.runner)?;
        let context =
            kubecontext::switch_to(self.runner, &self.params.cluster_name, &self.params.namespace)?;
        let plan = teardown_plan();
        let mut ctx = self.ctx(DeploymentTree::new(&self.config_dir));
        ctx.context = Some(context);
        for (i, component) in plan.iter().enumerate() {
            ui::print_phase(i + 1, plan.len(), &format!("Destroying {}", component.name()));
            info!(component = component.name(), "Destroying");
            if let Err(e) = component.destroy(&mut ctx) {
                error!(component = component.name(), error = %e, "Destroy failed");
                return Err(e);
            }
            report.phases.push(component.name());
        }

        let patience = ctx.patience(Patience::default());
        for disk in std::mem::take(&mut ctx.disks) {
            if release_disk(self.runner, &self.params, &disk, patience)? {
                report.released_disks.push(disk);
            } else {
                report.skipped_disks.push(disk);
            }
        }
        Ok(report)
    }

    fn write_snapshot(&self) -> Result<PathBuf> {
        snapshot::write(
            &self.config_dir,
            &self.params,
            self.source_file.as_deref(),
            Utc::now(),
        )
    }
}
