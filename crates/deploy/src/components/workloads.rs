//! Optional and supporting workloads: logging, prepuller, TLS, Firefly
//! and the landing page.

use super::{Component, Ctx};
use crate::error::Result;
use crate::tools::kubectl;

/// Log shipping pipeline: a logstash relay and a filebeat daemon set.
pub struct Logging;

impl Component for Logging {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn create(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        for file in ["secrets.yml", "service.yml", "deployment.yml"] {
            ctx.apply("logstashrmq", file)?;
        }
        for file in ["secrets.yml", "daemonset.yml"] {
            ctx.apply("filebeat", file)?;
        }
        Ok(())
    }

    fn destroy(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        ctx.delete_all(&[
            ("daemonset", "filebeat"),
            ("secret", "filebeat"),
            ("deployment", "logstash"),
            ("svc", "logstashrmq"),
            ("secret", "logstashrmq"),
        ])
    }
}

/// Hourly job pulling lab images onto every node.
pub struct Prepuller;

impl Component for Prepuller {
    fn name(&self) -> &'static str {
        "prepuller"
    }

    fn create(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        for file in ["serviceaccount.yml", "rbac.yml", "cronjob.yml"] {
            ctx.apply("prepuller", file)?;
        }
        Ok(())
    }

    fn destroy(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        ctx.delete_all(&[
            ("cronjob", "prepuller"),
            ("rolebinding", "prepuller"),
            ("clusterrolebinding", "prepuller"),
            ("role", "prepuller"),
            ("clusterrole", "prepuller"),
            ("serviceaccount", "prepuller"),
        ])
    }
}

/// Certificate, key, chain and DH parameters for the ingress routes.
pub struct TlsSecrets;

impl Component for TlsSecrets {
    fn name(&self) -> &'static str {
        "tls"
    }

    fn create(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        ctx.apply("tls", "tls-secrets.yml")?;
        Ok(())
    }

    fn destroy(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        ctx.delete_all(&[("secret", "tls")])
    }
}

/// Firefly image viewer behind its own route.
pub struct Firefly;

impl Component for Firefly {
    fn name(&self) -> &'static str {
        "firefly"
    }

    fn create(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        for file in ["service.yml", "secrets.yml", "deployment.yml", "ingress.yml"] {
            ctx.apply("firefly", file)?;
        }
        Ok(())
    }

    fn destroy(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        ctx.delete_all(&[
            ("ingress", "firefly"),
            ("deployment", "firefly"),
            ("secret", "firefly"),
            ("svc", "firefly"),
        ])
    }
}

/// Static page at `/` when the hub lives elsewhere.
pub struct LandingPage;

const LANDING_WWW: &str = "landing-page-www";

impl Component for LandingPage {
    fn name(&self) -> &'static str {
        "landing-page"
    }

    fn create(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        ctx.apply("landing-page", "service.yml")?;
        ctx.apply("landing-page", "ingress.yml")?;
        let config = ctx.tree.file("landing-page", "config");
        ctx.runner.run(&kubectl([
            "create".to_string(),
            "configmap".to_string(),
            LANDING_WWW.to_string(),
            format!("--from-file={}", config.display()),
            format!("--namespace={}", ctx.namespace()),
        ]))?;
        ctx.apply("landing-page", "deployment.yml")?;
        Ok(())
    }

    fn destroy(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        ctx.delete_all(&[
            ("deployment", "landing-page"),
            ("configmap", LANDING_WWW),
            ("ingress", "landing-page"),
            ("svc", "landing-page"),
        ])
    }
}
