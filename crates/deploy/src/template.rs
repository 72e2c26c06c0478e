//! Two-stage manifest rendering.
//!
//! Stage one substitutes every known binding into `*.template.yml` files
//! and consumes them. Two values only exist once the cluster is partly
//! built, so stage one emits their tokens verbatim; any output still
//! holding a token becomes a [`PartialManifest`] (`*.stage2.yml`), and
//! [`PartialManifest::finalize`] is the only code that resolves tokens.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use handlebars::Handlebars;
use tracing::info;

use crate::error::{DeployError, Result};

/// Suffix of files consumed by stage one.
pub const TEMPLATE_SUFFIX: &str = ".template.yml";
/// Suffix of stage-one output awaiting deferred values.
pub const PARTIAL_SUFFIX: &str = ".stage2.yml";

/// A value deferred to stage two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferred {
    /// Internal address of the file server service.
    NfsServerIp,
    /// Database connection identifier for the hub.
    DbIdentifier,
}

impl Deferred {
    pub const ALL: [Self; 2] = [Self::NfsServerIp, Self::DbIdentifier];

    /// Binding name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::NfsServerIp => "NFS_SERVER_IP_ADDRESS",
            Self::DbIdentifier => "DB_IDENTIFIER",
        }
    }

    /// Literal token left in stage-one output.
    #[must_use]
    pub fn token(self) -> String {
        format!("{{{{{}}}}}", self.name())
    }
}

/// Stage-one renderer over a fixed binding set.
pub struct Renderer {
    registry: Handlebars<'static>,
    bindings: BTreeMap<String, String>,
}

/// What stage one produced for a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Complete(PathBuf),
    Partial(PartialManifest),
}

impl Renderer {
    /// Unknown bindings render empty; nothing is HTML-escaped.
    #[must_use]
    pub fn new(mut bindings: BTreeMap<String, String>) -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        registry.register_escape_fn(handlebars::no_escape);
        for deferred in Deferred::ALL {
            bindings.insert(deferred.name().to_string(), deferred.token());
        }
        Self { registry, bindings }
    }

    /// Render template text.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Template`] for malformed template syntax.
    pub fn render(&self, text: &str) -> Result<String> {
        Ok(self.registry.render_template(text, &self.bindings)?)
    }

    /// Render `x.template.yml` into `x.yml` (or `x.stage2.yml`) and delete
    /// the template.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::NotFound`] if the template was already
    /// consumed, or I/O and template errors.
    pub fn render_file(&self, template: &Path) -> Result<Rendered> {
        if !template.is_file() {
            return Err(DeployError::NotFound(template.to_path_buf()));
        }
        let name = file_name(template);
        let stem = name.strip_suffix(TEMPLATE_SUFFIX).ok_or_else(|| {
            DeployError::Other(format!("{} is not a template", template.display()))
        })?;
        let out = self.render(&std::fs::read_to_string(template)?)?;
        let deferred = Deferred::ALL
            .iter()
            .any(|d| out.contains(d.token().as_str()));
        let rendered = if deferred {
            let path = template.with_file_name(format!("{stem}{PARTIAL_SUFFIX}"));
            std::fs::write(&path, &out)?;
            Rendered::Partial(PartialManifest { path })
        } else {
            let path = template.with_file_name(format!("{stem}.yml"));
            std::fs::write(&path, &out)?;
            Rendered::Complete(path)
        };
        std::fs::remove_file(template)?;
        info!(template = %template.display(), "Substituted template");
        Ok(rendered)
    }

    /// Render every template below `root`, depth first in name order.
    ///
    /// # Errors
    ///
    /// Propagates the first rendering failure.
    pub fn render_tree(&self, root: &Path) -> Result<Vec<Rendered>> {
        let mut out = Vec::new();
        for path in walk(root)? {
            if file_name(&path).ends_with(TEMPLATE_SUFFIX) {
                out.push(self.render_file(&path)?);
            }
        }
        Ok(out)
    }
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

fn walk(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    entries.sort();
    let mut files = Vec::new();
    for entry in entries {
        if entry.is_dir() {
            files.extend(walk(&entry)?);
        } else {
            files.push(entry);
        }
    }
    Ok(files)
}

/// Values for stage two; unset fields leave their token untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeferredBindings {
    pub nfs_server_ip: Option<String>,
    pub db_identifier: Option<String>,
}

impl DeferredBindings {
    fn get(&self, deferred: Deferred) -> Option<&str> {
        match deferred {
            Deferred::NfsServerIp => self.nfs_server_ip.as_deref(),
            Deferred::DbIdentifier => self.db_identifier.as_deref(),
        }
    }
}

/// Stage-one output still carrying deferred tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialManifest {
    path: PathBuf,
}

impl PartialManifest {
    /// Partial manifest at a known location.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::NotFound`] if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.is_file() {
            Ok(Self { path })
        } else {
            Err(DeployError::NotFound(path))
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Substitute deferred values and write the result to `dest`.
    ///
    /// The partial itself is kept so the same configuration directory can
    /// be applied again after a teardown.
    ///
    /// # Errors
    ///
    /// Fails if a token in the manifest has no value in `bindings`.
    pub fn finalize(&self, bindings: &DeferredBindings, dest: &Path) -> Result<PathBuf> {
        let mut text = std::fs::read_to_string(&self.path)?;
        for deferred in Deferred::ALL {
            let token = deferred.token();
            if !text.contains(token.as_str()) {
                continue;
            }
            let value = bindings.get(deferred).ok_or_else(|| {
                DeployError::Other(format!(
                    "{} needs a value for {}",
                    self.path.display(),
                    deferred.name()
                ))
            })?;
            text = text.replace(token.as_str(), value);
        }
        std::fs::write(dest, text)?;
        info!(partial = %self.path.display(), dest = %dest.display(), "Finalized manifest");
        Ok(dest.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings() -> BTreeMap<String, String> {
        [("HOSTNAME", "kremvax.ru"), ("CLUSTER_IDENTIFIER", "kremvax")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_unknown_binding_renders_empty() {
        let r = Renderer::new(bindings());
        assert_eq!(r.render("host: {{HOSTNAME}}/{{MISSING}}").unwrap(), "host: kremvax.ru/");
    }

    #[test]
    fn test_no_html_escaping() {
        let r = Renderer::new([("URL".to_string(), "a&b<c>".to_string())].into());
        assert_eq!(r.render("{{URL}}").unwrap(), "a&b<c>");
    }

    #[test]
    fn test_deferred_tokens_survive_stage_one() {
        let r = Renderer::new(bindings());
        let out = r
            .render("server: {{NFS_SERVER_IP_ADDRESS}}\ndb: {{DB_IDENTIFIER}}\nns: {{CLUSTER_IDENTIFIER}}")
            .unwrap();
        assert_eq!(
            out,
            "server: {{NFS_SERVER_IP_ADDRESS}}\ndb: {{DB_IDENTIFIER}}\nns: kremvax"
        );
    }

    #[test]
    fn test_render_file_consumes_template() {
        let dir = tempfile::tempdir().unwrap();
        let tpl = dir.path().join("service.template.yml");
        std::fs::write(&tpl, "name: {{HOSTNAME}}").unwrap();
        let r = Renderer::new(bindings());

        let out = r.render_file(&tpl).unwrap();
        let dest = dir.path().join("service.yml");
        assert_eq!(out, Rendered::Complete(dest.clone()));
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "name: kremvax.ru");
        assert!(!tpl.exists());

        let err = r.render_file(&tpl).unwrap_err();
        assert!(matches!(err, DeployError::NotFound(_)));
    }

    #[test]
    fn test_partial_then_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let tpl = dir.path().join("home-pv.template.yml");
        std::fs::write(&tpl, "ns: {{CLUSTER_IDENTIFIER}}\nserver: {{NFS_SERVER_IP_ADDRESS}}").unwrap();
        let r = Renderer::new(bindings());

        let Rendered::Partial(partial) = r.render_file(&tpl).unwrap() else {
            panic!("expected a partial manifest");
        };
        assert_eq!(partial.path(), dir.path().join("home-pv.stage2.yml"));

        let dest = dir.path().join("home-pv-kremvax.yml");
        let err = partial
            .finalize(&DeferredBindings::default(), &dest)
            .unwrap_err();
        assert!(matches!(err, DeployError::Other(_)));

        let deferred = DeferredBindings {
            nfs_server_ip: Some("10.0.0.7".into()),
            db_identifier: None,
        };
        partial.finalize(&deferred, &dest).unwrap();
        assert_eq!(
            std::fs::read_to_string(&dest).unwrap(),
            "ns: kremvax\nserver: 10.0.0.7"
        );
        assert!(partial.path().exists());
    }

    #[test]
    fn test_render_tree_skips_plain_files() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("tls");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("plain.yml"), "{{HOSTNAME}}").unwrap();
        std::fs::write(sub.join("tls-secrets.template.yml"), "{{HOSTNAME}}").unwrap();

        let out = Renderer::new(bindings()).render_tree(dir.path()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(std::fs::read_to_string(sub.join("plain.yml")).unwrap(), "{{HOSTNAME}}");
        assert_eq!(
            std::fs::read_to_string(sub.join("tls-secrets.yml")).unwrap(),
            "kremvax.ru"
        );
    }
}
