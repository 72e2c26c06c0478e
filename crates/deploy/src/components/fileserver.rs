//! Shared NFS file server, its exported volumes and the keep-alive
//! workload, plus release of the cloud disks left behind.

use tracing::{info, warn};

use super::{Component, Ctx};
use crate::error::Result;
use crate::params::{Params, MOUNTS};
use crate::poll::{wait_for, Patience};
use crate::runner::CommandRunner;
use crate::template::PartialManifest;
use crate::tools;

const DIR: &str = "fileserver";

/// NFS server on a physical claim, exporting one volume per mount.
pub struct Fileserver;

impl Fileserver {
    fn server_address(ctx: &Ctx<'_>) -> Result<String> {
        if let Some(ip) = &ctx.params.external_fileserver_ip {
            info!(ip = %ip, "Using external file server");
            return Ok(ip.clone());
        }
        for file in ["storageclass.yml", "physpvc.yml", "service.yml", "deployment.yml"] {
            ctx.apply(DIR, file)?;
        }
        wait_for(
            "file server address",
            ctx.patience(Patience::default()),
            || tools::service_cluster_ip(ctx.runner, "fileserver", ctx.namespace()),
        )
    }
}

impl Component for Fileserver {
    fn name(&self) -> &'static str {
        "fileserver"
    }

    fn create(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        let ip = Self::server_address(ctx)?;
        info!(ip = %ip, "File server address known");
        ctx.deferred.nfs_server_ip = Some(ip);
        for mount in MOUNTS {
            let partial =
                PartialManifest::open(ctx.tree.file(DIR, &format!("{mount}-pv.stage2.yml")))?;
            let volume = ctx
                .tree
                .file(DIR, &format!("{mount}-pv-{}.yml", ctx.namespace()));
            partial.finalize(&ctx.deferred, &volume)?;
            ctx.apply_path(&volume)?;
            ctx.apply(DIR, &format!("{mount}-pvc.yml"))?;
        }
        Ok(())
    }

    fn destroy(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        let namespace = ctx.namespace().to_string();
        for mount in MOUNTS {
            ctx.delete_all(&[("pvc", *mount)])?;
        }
        for mount in MOUNTS {
            ctx.delete_all(&[("pv", format!("{mount}-{namespace}").as_str())])?;
        }
        if ctx.params.external_fileserver_ip.is_some() {
            return Ok(());
        }
        let volume = ctx.discover_disk("physpvc")?;
        ctx.delete_all(&[
            ("deployment", "fileserver"),
            ("svc", "fileserver"),
            ("pvc", "physpvc"),
        ])?;
        if let Some(volume) = volume {
            ctx.delete_all(&[("pv", volume.as_str())])?;
        }
        ctx.delete_all(&[("storageclass", "fast")])?;
        ctx.wait_pods_gone("fileserver")
    }
}

/// Keeps the file server's exports busy so it never idles out.
pub struct FsKeepalive;

impl Component for FsKeepalive {
    fn name(&self) -> &'static str {
        "fs-keepalive"
    }

    fn create(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        ctx.apply("fs-keepalive", "deployment.yml")?;
        Ok(())
    }

    fn destroy(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        ctx.delete_all(&[("deployment", "keepalive")])?;
        ctx.wait_pods_gone("keepalive")
    }
}

/// Detach (if needed) and delete a cloud disk.
///
/// A disk that cannot be described is assumed gone or free. One that
/// stays attached past the poll budget is reported and skipped.
///
/// # Errors
///
/// Only fails if the cloud CLI cannot be started.
pub fn release_disk(
    runner: &dyn CommandRunner,
    params: &Params,
    disk: &str,
    patience: Patience,
) -> Result<bool> {
    let detached = wait_for(&format!("disk {disk} to detach"), patience, || {
        let out = runner.run(
            &tools::gcloud(params, ["compute", "disks", "describe", disk, "-q"])
                .capture()
                .best_effort(),
        )?;
        if !out.success() {
            return Ok(Some(()));
        }
        let described: serde_yaml::Value = match serde_yaml::from_str(&out.stdout) {
            Ok(described) => described,
            Err(e) => {
                warn!(disk, error = %e, "Unreadable disk description; assuming removable");
                return Ok(Some(()));
            }
        };
        let users: Vec<&str> = described["users"]
            .as_sequence()
            .into_iter()
            .flatten()
            .filter_map(serde_yaml::Value::as_str)
            .collect();
        if users.is_empty() {
            return Ok(Some(()));
        }
        for user in users {
            let instance = user.rsplit('/').next().unwrap_or(user);
            info!(disk, instance, "Detaching disk");
            runner.run(
                &tools::gcloud(
                    params,
                    [
                        "compute".to_string(),
                        "instances".to_string(),
                        "detach-disk".to_string(),
                        instance.to_string(),
                        format!("--disk={disk}"),
                    ],
                )
                .best_effort(),
            )?;
        }
        Ok(None)
    });
    match detached {
        Ok(()) => {
            info!(disk, "Deleting disk");
            runner.run(
                &tools::gcloud(params, ["compute", "disks", "delete", disk, "-q"]).best_effort(),
            )?;
            Ok(true)
        }
        Err(e) if e.is_timeout() => {
            warn!(disk, error = %e, "Disk never detached; skipping");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::components::testing::{params, scratch_ctx};
    use crate::components::PlatformOptions;
    use crate::runner::testing::RecordingRunner;

    fn partials(config: &Path) {
        let dir = config.join("deployment").join(DIR);
        std::fs::create_dir_all(&dir).unwrap();
        for mount in MOUNTS {
            std::fs::write(
                dir.join(format!("{mount}-pv.stage2.yml")),
                format!("name: {mount}-nb\nserver: {{{{NFS_SERVER_IP_ADDRESS}}}}\n"),
            )
            .unwrap();
        }
    }

    #[test]
    fn test_create_waits_for_service_address() {
        let config = tempfile::tempdir().unwrap();
        partials(config.path());
        let runner = RecordingRunner::new();
        runner.reply("kubectl get svc fileserver", 0, "spec:\n  clusterIP: 10.0.0.7\n");
        let params = params();
        let mut ctx = scratch_ctx(&runner, &params, PlatformOptions::default(), config.path());
        Fileserver.create(&mut ctx).unwrap();

        assert_eq!(ctx.deferred.nfs_server_ip.as_deref(), Some("10.0.0.7"));
        let scratch = std::fs::read_to_string(
            config.path().join("deployment/fileserver/scratch-pv-kremvax.yml"),
        )
        .unwrap();
        assert!(scratch.contains("server: 10.0.0.7"));
        assert_eq!(runner.count("kubectl create -f"), 4 + 2 * MOUNTS.len());
    }

    #[test]
    fn test_external_server_skips_workloads() {
        let config = tempfile::tempdir().unwrap();
        partials(config.path());
        let runner = RecordingRunner::new();
        let mut params = params();
        params.external_fileserver_ip = Some("192.168.1.5".to_string());
        let mut ctx = scratch_ctx(&runner, &params, PlatformOptions::default(), config.path());
        Fileserver.create(&mut ctx).unwrap();

        let home = std::fs::read_to_string(
            config.path().join("deployment/fileserver/home-pv-kremvax.yml"),
        )
        .unwrap();
        assert!(home.contains("server: 192.168.1.5"));
        assert_eq!(runner.count("kubectl get svc"), 0);
        assert_eq!(runner.count("kubectl create -f"), 2 * MOUNTS.len());

        Fileserver.destroy(&mut ctx).unwrap();
        assert_eq!(runner.count("kubectl delete deployment fileserver"), 0);
        assert_eq!(runner.count("kubectl get pvc physpvc"), 0);
        assert!(ctx.disks.is_empty());
    }

    #[test]
    fn test_destroy_records_physical_disk() {
        let runner = RecordingRunner::new();
        runner
            .reply("kubectl get pvc physpvc", 0, "spec:\n  volumeName: pvc-phys\n")
            .reply(
                "kubectl get pv pvc-phys",
                0,
                "spec:\n  csi:\n    volumeHandle: projects/kgb/zones/z/disks/disk-phys\n",
            )
            .reply("kubectl get pods", 0, "items: []\n");
        let params = params();
        let mut ctx = scratch_ctx(&runner, &params, PlatformOptions::default(), Path::new("/cfg"));
        Fileserver.destroy(&mut ctx).unwrap();
        assert_eq!(ctx.disks, ["disk-phys"]);
        assert_eq!(runner.count("kubectl delete pv pvc-phys"), 1);
        assert_eq!(runner.count("kubectl delete pvc"), MOUNTS.len() + 1);
    }
}
