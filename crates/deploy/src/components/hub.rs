//! The notebook hub and the HTTP proxy in front of it.

use tracing::info;

use super::{Component, Ctx};
use crate::error::Result;
use crate::template::PartialManifest;
use crate::tools::kubectl;

const DIR: &str = "jupyterhub";

/// Hub deployment, its configuration maps, secrets and RBAC.
pub struct Hub;

impl Hub {
    fn create_configmap(ctx: &Ctx<'_>, name: &str, sources: &[&str]) -> Result<()> {
        let config = ctx.tree.file(DIR, "config");
        let mut args = vec![
            "create".to_string(),
            "configmap".to_string(),
            name.to_string(),
        ];
        args.extend(
            sources
                .iter()
                .map(|s| format!("--from-file={}", config.join(s).display())),
        );
        args.push(format!("--namespace={}", ctx.namespace()));
        ctx.runner.run(&kubectl(args))?;
        Ok(())
    }
}

impl Component for Hub {
    fn name(&self) -> &'static str {
        "jupyterhub"
    }

    fn create(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        let partial = PartialManifest::open(ctx.tree.file(DIR, "deployment.stage2.yml"))?;
        let deployment = ctx.tree.file(DIR, "deployment.yml");
        partial.finalize(&ctx.deferred, &deployment)?;
        info!(
            db = ctx.deferred.db_identifier.as_deref().unwrap_or_default(),
            "Hub deployment finalized"
        );
        for file in ["service.yml", "physpvc.yml", "secrets.yml", "rbac.yml"] {
            ctx.apply(DIR, file)?;
        }
        Self::create_configmap(
            ctx,
            "hub-config",
            &["jupyterhub_config.py", "jupyterhub_config.d"],
        )?;
        Self::create_configmap(ctx, "jwt-cert", &["signing-certificate.pem"])?;
        Self::create_configmap(ctx, "fs-mounts", &["mountpoints.json"])?;
        ctx.apply_path(&deployment)?;
        Ok(())
    }

    fn destroy(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        let volume = ctx.discover_disk("hub-physpvc")?;
        ctx.delete_all(&[
            ("rolebinding", "dask"),
            ("role", "dask"),
            ("serviceaccount", "dask"),
            ("deployment", "hub"),
            ("configmap", "hub-config"),
            ("configmap", "jwt-cert"),
            ("configmap", "fs-mounts"),
            ("rolebinding", "hub"),
            ("role", "hub"),
            ("clusterrolebinding", "hub"),
            ("clusterrole", "hub"),
            ("serviceaccount", "hub"),
            ("secret", "hub"),
            ("pvc", "hub-physpvc"),
            ("svc", "hub"),
        ])?;
        if let Some(volume) = volume {
            ctx.delete_all(&[("pv", volume.as_str())])?;
        }
        Ok(())
    }
}

/// Configurable HTTP proxy and the ingress routing the hub path to it.
pub struct Proxy;

impl Component for Proxy {
    fn name(&self) -> &'static str {
        "proxy"
    }

    fn create(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        for file in ["service.yml", "ingress.yml", "deployment.yml"] {
            ctx.apply("proxy", file)?;
        }
        Ok(())
    }

    fn destroy(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        ctx.delete_all(&[
            ("deployment", "proxy"),
            ("ingress", "proxy"),
            ("svc", "proxy"),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::testing::{params, scratch_ctx};
    use crate::components::PlatformOptions;
    use crate::runner::testing::RecordingRunner;

    #[test]
    fn test_create_finalizes_before_applying() {
        let config = tempfile::tempdir().unwrap();
        let dir = config.path().join("deployment").join(DIR);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("deployment.stage2.yml"),
            "args: [\"-instances={{DB_IDENTIFIER}}=tcp:3306\"]\n",
        )
        .unwrap();

        let runner = RecordingRunner::new();
        let params = params();
        let mut ctx = scratch_ctx(&runner, &params, PlatformOptions::default(), config.path());
        ctx.deferred.db_identifier = Some(params.db_identifier());
        Hub.create(&mut ctx).unwrap();

        let deployment = std::fs::read_to_string(dir.join("deployment.yml")).unwrap();
        assert!(deployment.contains("-instances=kgb:us-central1:dummy=tcp:3306"));
        let calls = runner.calls();
        let last = calls.last().unwrap();
        assert!(last.starts_with("kubectl create -f") && last.contains("jupyterhub/deployment.yml"));
        assert_eq!(runner.count("kubectl create configmap"), 3);
    }

    #[test]
    fn test_create_needs_database_identifier() {
        let config = tempfile::tempdir().unwrap();
        let dir = config.path().join("deployment").join(DIR);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("deployment.stage2.yml"), "db: {{DB_IDENTIFIER}}\n").unwrap();

        let runner = RecordingRunner::new();
        let params = params();
        let mut ctx = scratch_ctx(&runner, &params, PlatformOptions::default(), config.path());
        assert!(Hub.create(&mut ctx).is_err());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_destroy_records_hub_disk() {
        let runner = RecordingRunner::new();
        runner
            .reply("kubectl get pvc hub-physpvc", 0, "spec:\n  volumeName: pvc-hub\n")
            .reply(
                "kubectl get pv pvc-hub",
                0,
                "spec:\n  gcePersistentDisk:\n    pdName: disk-hub\n",
            )
            .reply("kubectl delete", 1, "");
        let params = params();
        let mut ctx = scratch_ctx(
            &runner,
            &params,
            PlatformOptions::default(),
            std::path::Path::new("/nonexistent"),
        );
        Hub.destroy(&mut ctx).unwrap();
        assert_eq!(ctx.disks, ["disk-hub"]);
        assert_eq!(
            runner.calls().last().map(String::as_str),
            Some("kubectl delete pv pvc-hub --namespace=kremvax")
        );
    }
}
