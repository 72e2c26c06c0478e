//! Embedded resource templates and the on-disk deployment tree.
//!
//! Templates ship inside the binary and are written below
//! `<config-dir>/deployment/` before rendering. The file server's volume
//! and claim templates are written once per shared mount.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::params::MOUNTS;

/// A file compiled into the binary, addressed relative to the tree root.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedFile {
    pub path: &'static str,
    pub contents: &'static str,
}

macro_rules! embed {
    ($path:literal) => {
        EmbeddedFile {
            path: $path,
            contents: include_str!(concat!("../templates/", $path)),
        }
    };
}

/// Every resource template and configuration file, one subtree per
/// platform component.
pub const EMBEDDED: &[EmbeddedFile] = &[
    embed!("nginx-ingress/default-backend.yml"),
    embed!("nginx-ingress/configmaps.template.yml"),
    embed!("nginx-ingress/rbac.yml"),
    embed!("nginx-ingress/controller.yml"),
    embed!("nginx-ingress/service.yml"),
    embed!("logstashrmq/secrets.template.yml"),
    embed!("logstashrmq/service.yml"),
    embed!("logstashrmq/deployment.template.yml"),
    embed!("filebeat/secrets.template.yml"),
    embed!("filebeat/daemonset.template.yml"),
    embed!("fileserver/storageclass.yml"),
    embed!("fileserver/physpvc.template.yml"),
    embed!("fileserver/service.yml"),
    embed!("fileserver/deployment.yml"),
    embed!("fs-keepalive/deployment.yml"),
    embed!("prepuller/serviceaccount.yml"),
    embed!("prepuller/rbac.template.yml"),
    embed!("prepuller/cronjob.template.yml"),
    embed!("tls/tls-secrets.template.yml"),
    embed!("firefly/service.yml"),
    embed!("firefly/secrets.template.yml"),
    embed!("firefly/deployment.template.yml"),
    embed!("firefly/ingress.template.yml"),
    embed!("jupyterhub/service.yml"),
    embed!("jupyterhub/physpvc.yml"),
    embed!("jupyterhub/secrets.template.yml"),
    embed!("jupyterhub/rbac.template.yml"),
    embed!("jupyterhub/deployment.template.yml"),
    embed!("jupyterhub/config/jupyterhub_config.py"),
    embed!("jupyterhub/config/jupyterhub_config.d/10-authenticator.py"),
    embed!("jupyterhub/config/jupyterhub_config.d/20-spawner.py"),
    embed!("jupyterhub/config/mountpoints.json"),
    embed!("proxy/service.yml"),
    embed!("proxy/ingress.template.yml"),
    embed!("proxy/deployment.template.yml"),
    embed!("landing-page/service.yml"),
    embed!("landing-page/ingress.template.yml"),
    embed!("landing-page/deployment.yml"),
    embed!("landing-page/config/index.html"),
];

/// Templates expanded once per shared mount; `{{MOUNT}}` is replaced
/// before rendering and the file is written as `<mount>-<name>`.
pub const PER_MOUNT: &[EmbeddedFile] = &[
    embed!("fileserver/pv.template.yml"),
    embed!("fileserver/pvc.template.yml"),
];

const MOUNT_TOKEN: &str = "{{MOUNT}}";

/// Write every embedded file below `root`, returning the paths written.
///
/// # Errors
///
/// Returns an I/O error if a directory or file cannot be created.
pub fn materialize(root: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for file in EMBEDDED {
        written.push(write(root, Path::new(file.path), file.contents)?);
    }
    for file in PER_MOUNT {
        let rel = Path::new(file.path);
        let name = rel.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        for mount in MOUNTS {
            let expanded = file.contents.replace(MOUNT_TOKEN, mount);
            let target = rel.with_file_name(format!("{mount}-{name}"));
            written.push(write(root, &target, &expanded)?);
        }
    }
    debug!(root = %root.display(), files = written.len(), "Materialized templates");
    Ok(written)
}

fn write(root: &Path, rel: &Path, contents: &str) -> Result<PathBuf> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, contents)?;
    Ok(path)
}

/// The rendered deployment tree for one platform instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentTree {
    root: PathBuf,
}

impl DeploymentTree {
    /// Subdirectory of the configuration directory holding the tree.
    pub const DIR: &'static str = "deployment";

    #[must_use]
    pub fn new(config_dir: &Path) -> Self {
        Self {
            root: config_dir.join(Self::DIR),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a previous run already produced the tree.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Path of a file inside a component subtree.
    #[must_use]
    pub fn file(&self, component: &str, name: &str) -> PathBuf {
        self.root.join(component).join(name)
    }

    /// Path of a component subdirectory.
    #[must_use]
    pub fn dir(&self, component: &str) -> PathBuf {
        self.root.join(component)
    }
}
