//! Platform components and their create/destroy pairs.
//!
//! Each component is a value implementing [`Component`]; the platform
//! composes them into ordered plans instead of dispatching on names.

mod cluster;
mod dns;
mod fileserver;
mod hub;
mod workloads;

use std::path::Path;
use std::time::Duration;

use tracing::warn;

pub use cluster::{Cluster, IngressController, Namespace};
pub use dns::{ChangeBatch, Dns};
pub use fileserver::{release_disk, Fileserver, FsKeepalive};
pub use hub::{Hub, Proxy};
pub use workloads::{Firefly, LandingPage, Logging, Prepuller, TlsSecrets};

use crate::error::Result;
use crate::manifests::DeploymentTree;
use crate::params::Params;
use crate::poll::{wait_for, Patience};
use crate::runner::{CommandRunner, CommandOutput};
use crate::template::DeferredBindings;
use crate::tools;

/// Switches that change what the lifecycle touches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct PlatformOptions {
    /// Render configuration only; touch no cluster.
    pub config_only: bool,
    /// Apply from a scratch directory that is discarded afterwards.
    pub temporary: bool,
    pub disable_prepuller: bool,
    /// Neither create nor delete the cluster.
    pub existing_cluster: bool,
    /// Neither create nor delete the namespace.
    pub existing_namespace: bool,
    /// Discover the database instance instead of naming it.
    pub existing_database_instance: bool,
    pub existing_database: bool,
}

/// State shared by the components of one run.
pub struct Ctx<'a> {
    pub runner: &'a dyn CommandRunner,
    pub params: &'a Params,
    pub options: PlatformOptions,
    pub tree: DeploymentTree,
    /// Values for stage-two manifests, filled as they become known.
    pub deferred: DeferredBindings,
    /// kubectl context selected for the run.
    pub context: Option<String>,
    /// Cloud disks discovered during teardown, released last.
    pub disks: Vec<String>,
    /// Overrides every poll delay.
    pub poll_delay: Option<Duration>,
}

impl<'a> Ctx<'a> {
    #[must_use]
    pub fn new(
        runner: &'a dyn CommandRunner,
        params: &'a Params,
        options: PlatformOptions,
        tree: DeploymentTree,
    ) -> Self {
        Self {
            runner,
            params,
            options,
            tree,
            deferred: DeferredBindings::default(),
            context: None,
            disks: Vec::new(),
            poll_delay: None,
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.params.namespace
    }

    /// `patience` with the run's delay override applied.
    #[must_use]
    pub fn patience(&self, patience: Patience) -> Patience {
        self.poll_delay
            .map_or(patience, |delay| patience.with_delay(delay))
    }

    /// Create the objects in a rendered file of a component subtree.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DeployError::CommandFailed`] if kubectl rejects it.
    pub fn apply(&self, component: &str, file: &str) -> Result<CommandOutput> {
        self.apply_path(&self.tree.file(component, file))
    }

    /// Create the objects in a rendered file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DeployError::CommandFailed`] if kubectl rejects it.
    pub fn apply_path(&self, path: &Path) -> Result<CommandOutput> {
        self.runner
            .run(&tools::create_from(path, self.namespace()))
    }

    /// Best-effort deletion of each `(kind, name)` in order.
    ///
    /// # Errors
    ///
    /// Only fails if kubectl cannot be started.
    pub fn delete_all(&self, objects: &[(&str, &str)]) -> Result<()> {
        for (kind, name) in objects {
            self.runner
                .run(&tools::delete(kind, name, self.namespace()))?;
        }
        Ok(())
    }

    /// Record the cloud disk behind a claim for release after teardown,
    /// returning the claim's persistent volume.
    ///
    /// # Errors
    ///
    /// Returns an error if the describe calls produce unreadable output.
    pub fn discover_disk(&mut self, claim: &str) -> Result<Option<String>> {
        let Some(volume) = tools::volume_for_claim(self.runner, claim, self.namespace())? else {
            warn!(claim, "No persistent volume bound to claim");
            return Ok(None);
        };
        match tools::disk_for_volume(self.runner, &volume, self.namespace())? {
            Some(disk) => self.disks.push(disk),
            None => warn!(claim, volume = %volume, "No cloud disk behind volume"),
        }
        Ok(Some(volume))
    }

    /// Wait for every pod named `<prefix>...` to exit.
    ///
    /// Running out of patience is fatal only when the cluster outlives the
    /// teardown; otherwise deleting the cluster removes the pods anyway.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DeployError::Timeout`] on an existing cluster, or
    /// any listing error.
    pub fn wait_pods_gone(&self, prefix: &str) -> Result<()> {
        let what = format!("{prefix} pods to exit");
        let result = wait_for(&what, self.patience(Patience::pod_exit()), || {
            let remaining = tools::pods_remaining(self.runner, prefix, self.namespace())?;
            Ok((!remaining).then_some(()))
        });
        match result {
            Err(e) if e.is_timeout() && !self.options.existing_cluster => {
                warn!(prefix, error = %e, "Pods still present; cluster deletion will remove them");
                Ok(())
            }
            other => other,
        }
    }
}

/// One platform component.
pub trait Component {
    /// Phase name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Create the component's resources.
    ///
    /// # Errors
    ///
    /// Any failure aborts the deploy; earlier phases are not rolled back.
    fn create(&self, ctx: &mut Ctx<'_>) -> Result<()>;

    /// Delete the component's resources.
    ///
    /// # Errors
    ///
    /// Any failure aborts the teardown.
    fn destroy(&self, ctx: &mut Ctx<'_>) -> Result<()>;
}
