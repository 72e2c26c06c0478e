//! The cluster, its ingress controller and the platform namespace.

use std::time::Duration;

use tracing::info;

use super::{Component, Ctx};
use crate::error::Result;
use crate::kubecontext;
use crate::poll::{wait_for, Patience};
use crate::runner::Invocation;
use crate::tools::{self, kubectl, INGRESS_NAMESPACE};

const ADMIN_BINDING: &str = "admin-binding";

/// Managed Kubernetes cluster and the context pointing at it.
pub struct Cluster;

impl Component for Cluster {
    fn name(&self) -> &'static str {
        "cluster"
    }

    fn create(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        let params = ctx.params;
        if ctx.options.existing_cluster {
            info!(cluster = %params.cluster_name, "Using existing cluster");
        } else {
            let version = tools::cluster_version(ctx.runner, params)?;
            info!(cluster = %params.cluster_name, version = %version, "Creating cluster");
            ctx.runner.run(&tools::gcloud(
                params,
                [
                    "container".to_string(),
                    "clusters".to_string(),
                    "create".to_string(),
                    params.cluster_name.clone(),
                    format!("--num-nodes={}", params.node_count),
                    format!("--machine-type={}", params.machine_type),
                    format!("--disk-size={}", params.node_disk_gigabytes),
                    format!("--cluster-version={version}"),
                    format!("--node-version={version}"),
                ],
            ))?;
            ctx.runner.run(&tools::gcloud(
                params,
                [
                    "container",
                    "clusters",
                    "get-credentials",
                    params.cluster_name.as_str(),
                ],
            ))?;
            let account = tools::configured_account(ctx.runner)?;
            ctx.runner.run(&kubectl([
                "create".to_string(),
                "clusterrolebinding".to_string(),
                ADMIN_BINDING.to_string(),
                "--clusterrole=cluster-admin".to_string(),
                format!("--user={account}"),
            ]))?;
        }
        let context =
            kubecontext::switch_to(ctx.runner, &params.cluster_name, &params.namespace)?;
        ctx.context = Some(context);
        Ok(())
    }

    fn destroy(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        if ctx.options.existing_cluster {
            info!(cluster = %ctx.params.cluster_name, "Keeping existing cluster");
            return Ok(());
        }
        ctx.runner.run(
            &kubectl(["delete", "clusterrolebinding", ADMIN_BINDING]).best_effort(),
        )?;
        info!(cluster = %ctx.params.cluster_name, "Deleting cluster");
        ctx.runner.run(&tools::gcloud(
            ctx.params,
            [
                "-q",
                "container",
                "clusters",
                "delete",
                ctx.params.cluster_name.as_str(),
            ],
        ))?;
        Ok(())
    }
}

/// Ingress controller serving every platform route; only installed on
/// clusters this tool creates.
pub struct IngressController;

const INGRESS_DIR: &str = "nginx-ingress";
const INGRESS_FILES: &[&str] = &[
    "default-backend.yml",
    "configmaps.yml",
    "rbac.yml",
    "controller.yml",
    "service.yml",
];
const INGRESS_OBJECTS: &[(&str, &str)] = &[
    ("svc", "ingress-nginx"),
    ("deployment", "nginx-ingress-controller"),
    ("rolebinding", "nginx-ingress-role-nisa-binding"),
    ("role", "nginx-ingress-role"),
    ("clusterrolebinding", "nginx-ingress-clusterrole-nisa-binding"),
    ("clusterrole", "nginx-ingress-clusterrole"),
    ("serviceaccount", "nginx-ingress-serviceaccount"),
    ("configmap", "udp-services"),
    ("configmap", "tcp-services"),
    ("configmap", "nginx-configuration"),
    ("svc", "default-http-backend"),
    ("deployment", "default-http-backend"),
];

impl Component for IngressController {
    fn name(&self) -> &'static str {
        "ingress-controller"
    }

    fn create(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        ctx.runner
            .run(&kubectl(["create", "namespace", INGRESS_NAMESPACE]))?;
        for file in INGRESS_FILES {
            let path = ctx.tree.file(INGRESS_DIR, file);
            ctx.runner.run(&tools::create_from(&path, INGRESS_NAMESPACE))?;
        }
        Ok(())
    }

    fn destroy(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        if ctx.options.existing_cluster {
            return Ok(());
        }
        for (kind, name) in INGRESS_OBJECTS {
            ctx.runner
                .run(&tools::delete(kind, name, INGRESS_NAMESPACE))?;
        }
        ctx.runner.run(
            &kubectl(["delete", "namespace", INGRESS_NAMESPACE]).best_effort(),
        )?;
        Ok(())
    }
}

/// The platform namespace.
pub struct Namespace;

impl Namespace {
    /// Creation is retried while a previous namespace of the same name is
    /// still terminating.
    fn patience() -> Patience {
        Patience {
            delay: Duration::from_secs(1),
            tries: 15,
        }
    }
}

impl Component for Namespace {
    fn name(&self) -> &'static str {
        "namespace"
    }

    fn create(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        let namespace = ctx.namespace().to_string();
        if ctx.options.existing_namespace {
            info!(namespace = %namespace, "Using existing namespace");
            return Ok(());
        }
        let create = kubectl(["create", "namespace", namespace.as_str()]).best_effort();
        wait_for(
            &format!("namespace {namespace}"),
            ctx.patience(Self::patience()),
            || {
                let out = ctx.runner.run(&create)?;
                let exists = out.success() || out.stderr.contains("AlreadyExists");
                Ok(exists.then_some(()))
            },
        )
    }

    fn destroy(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        let namespace = ctx.namespace().to_string();
        if ctx.options.existing_namespace {
            info!(namespace = %namespace, "Keeping existing namespace");
            return Ok(());
        }
        if let Some(context) = ctx.context.clone() {
            kubecontext::set_namespace(ctx.runner, &context, "default")?;
        }
        info!(namespace = %namespace, "Deleting namespace");
        let mut delete = Invocation::new(["kubectl", "delete", "namespace", namespace.as_str()]);
        if !ctx.options.existing_cluster {
            delete = delete.best_effort();
        }
        ctx.runner.run(&delete)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::components::testing::{params, scratch_ctx};
    use crate::components::PlatformOptions;
    use crate::error::DeployError;
    use crate::runner::testing::RecordingRunner;

    const CONTEXTS: &str = "\
CURRENT   NAME                                 CLUSTER   AUTHINFO   NAMESPACE
*         gke_kgb_us-central1-a_kremvax-ru     kremvax   kremvax    kremvax
";

    fn kept_cluster() -> PlatformOptions {
        PlatformOptions {
            existing_cluster: true,
            ..PlatformOptions::default()
        }
    }

    #[test]
    fn test_existing_cluster_only_switches_context() {
        let runner = RecordingRunner::new();
        runner.reply("kubectl config get-contexts", 0, CONTEXTS);
        let params = params();
        let mut ctx = scratch_ctx(&runner, &params, kept_cluster(), Path::new("/nonexistent"));
        Cluster.create(&mut ctx).unwrap();
        assert_eq!(ctx.context.as_deref(), Some("gke_kgb_us-central1-a_kremvax-ru"));
        assert_eq!(runner.count("gcloud"), 0);
        assert_eq!(
            runner.count("kubectl config set-context gke_kgb_us-central1-a_kremvax-ru --namespace kremvax"),
            1
        );

        Cluster.destroy(&mut ctx).unwrap();
        assert_eq!(runner.count("gcloud"), 0);
    }

    #[test]
    fn test_cluster_delete_failure_is_fatal() {
        let runner = RecordingRunner::new();
        runner.reply("gcloud -q container clusters delete", 1, "");
        let params = params();
        let mut ctx = scratch_ctx(&runner, &params, PlatformOptions::default(), Path::new("/nonexistent"));
        let err = Cluster.destroy(&mut ctx).unwrap_err();
        assert!(matches!(err, DeployError::CommandFailed { code: 1, .. }));
        assert_eq!(runner.count("kubectl delete clusterrolebinding admin-binding"), 1);
    }

    #[test]
    fn test_ingress_left_alone_on_existing_cluster() {
        let runner = RecordingRunner::new();
        let params = params();
        let mut ctx = scratch_ctx(&runner, &params, kept_cluster(), Path::new("/nonexistent"));
        IngressController.destroy(&mut ctx).unwrap();
        assert!(runner.calls().is_empty());

        let mut ctx = scratch_ctx(&runner, &params, PlatformOptions::default(), Path::new("/nonexistent"));
        runner.reply("kubectl delete", 1, "");
        IngressController.destroy(&mut ctx).unwrap();
        assert_eq!(runner.count("kubectl delete"), INGRESS_OBJECTS.len() + 1);
        assert_eq!(
            runner.calls().last().map(String::as_str),
            Some("kubectl delete namespace ingress-nginx")
        );
    }

    #[test]
    fn test_namespace_create_retries_until_timeout() {
        let runner = RecordingRunner::new();
        runner.reply("kubectl create namespace kremvax", 1, "");
        let params = params();
        let mut ctx = scratch_ctx(&runner, &params, PlatformOptions::default(), Path::new("/nonexistent"));
        let err = Namespace.create(&mut ctx).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(runner.count("kubectl create namespace kremvax"), 15);
    }

    #[test]
    fn test_namespace_delete_fatal_only_on_existing_cluster() {
        let runner = RecordingRunner::new();
        runner.reply("kubectl delete namespace kremvax", 1, "");
        let params = params();

        let mut ctx = scratch_ctx(&runner, &params, PlatformOptions::default(), Path::new("/nonexistent"));
        ctx.context = Some("gke_kgb_us-central1-a_kremvax-ru".to_string());
        Namespace.destroy(&mut ctx).unwrap();
        assert_eq!(
            runner.calls().first().map(String::as_str),
            Some("kubectl config set-context gke_kgb_us-central1-a_kremvax-ru --namespace default")
        );

        let mut ctx = scratch_ctx(&runner, &params, kept_cluster(), Path::new("/nonexistent"));
        let err = Namespace.destroy(&mut ctx).unwrap_err();
        assert!(matches!(err, DeployError::CommandFailed { code: 1, .. }));
    }

    #[test]
    fn test_existing_namespace_is_kept() {
        let runner = RecordingRunner::new();
        let params = params();
        let opts = PlatformOptions {
            existing_namespace: true,
            ..kept_cluster()
        };
        let mut ctx = scratch_ctx(&runner, &params, opts, Path::new("/nonexistent"));
        Namespace.create(&mut ctx).unwrap();
        Namespace.destroy(&mut ctx).unwrap();
        assert!(runner.calls().is_empty());
    }
}
