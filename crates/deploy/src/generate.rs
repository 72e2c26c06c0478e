//! Configuration generation: materialize, encode secrets, render.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{info, warn};

use crate::error::Result;
use crate::manifests::{self, DeploymentTree};
use crate::params::Params;
use crate::runner::{CommandRunner, Invocation};
use crate::secrets::SecretEncoder;
use crate::template::{Rendered, Renderer};

/// Scalar inputs base64-encoded into secret manifests.
pub const SECRET_VALUE_KEYS: &[&str] = &[
    "oauth_provider",
    "oauth_client_id",
    "oauth_secret",
    "oauth_callback_url",
    "github_organization_whitelist",
    "cilogon_group_whitelist",
    "github_organization_denylist",
    "cilogon_group_denylist",
    "session_db_url",
    "session_db_password",
    "crypto_key",
    "configproxy_auth_token",
    "firefly_admin_password",
    "rabbitmq_pan_password",
];

/// Inputs naming files whose contents are encoded into secret manifests.
pub const SECRET_FILE_KEYS: &[&str] = &[
    "tls_cert",
    "tls_key",
    "tls_root_chain",
    "beats_cert",
    "beats_key",
    "beats_ca",
];

const DHPARAM_KEY: &str = "tls_dhparam";
const DHPARAM_PEM: &str = "tls_dhparam_pem";
const DHPARAM_BITS: &str = "2048";

fn random_hex() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// Hub cookie encryption key: two random halves joined by `;`.
#[must_use]
pub fn crypto_key() -> String {
    format!("{};{}", random_hex(), random_hex())
}

/// Shared secret between the hub and its proxy.
#[must_use]
pub fn proxy_token() -> String {
    random_hex()
}

/// Diffie-Hellman parameters from `openssl dhparam`.
///
/// # Errors
///
/// Returns [`crate::DeployError::CommandFailed`] if openssl fails.
pub fn generate_dhparam(runner: &dyn CommandRunner) -> Result<String> {
    info!("Generating DH parameters; this takes a while");
    let out = runner.run(&Invocation::new(["openssl", "dhparam", DHPARAM_BITS]).capture())?;
    Ok(out.stdout)
}

/// Every binding for stage-one rendering: plain settings plus encoded
/// secrets.
///
/// # Errors
///
/// Returns an error if DH parameters have to be generated and cannot be.
pub fn bindings(
    runner: &dyn CommandRunner,
    params: &Params,
    config_only: bool,
) -> Result<BTreeMap<String, String>> {
    let mut encoder = SecretEncoder::new(params.secret_inputs(), config_only);
    encoder.insert(
        "session_db_password",
        params.session_db_password.clone().unwrap_or_default(),
    );
    encoder.insert("crypto_key", crypto_key());
    encoder.insert("configproxy_auth_token", proxy_token());

    let mut bindings = params.bindings();
    for key in SECRET_VALUE_KEYS {
        bindings.insert(key.to_uppercase(), encoder.encode_value(key));
    }
    for key in SECRET_FILE_KEYS {
        bindings.insert(key.to_uppercase(), encoder.encode_file(key));
    }
    let dhparam = if params.path(DHPARAM_KEY).is_some() {
        encoder.encode_file(DHPARAM_KEY)
    } else {
        if !config_only {
            encoder.insert(DHPARAM_PEM, generate_dhparam(runner)?);
        }
        encoder.encode_value(DHPARAM_PEM)
    };
    bindings.insert(DHPARAM_KEY.to_uppercase(), dhparam);
    Ok(bindings)
}

/// Write and render the deployment tree for `params` under `config_dir`.
///
/// # Errors
///
/// Returns I/O, template or command errors.
pub fn generate(
    runner: &dyn CommandRunner,
    params: &Params,
    config_only: bool,
    config_dir: &Path,
) -> Result<DeploymentTree> {
    let tree = DeploymentTree::new(config_dir);
    info!(dir = %tree.root().display(), "Generating deployment configuration");
    manifests::materialize(tree.root())?;

    let renderer = Renderer::new(bindings(runner, params, config_only)?);
    let rendered = renderer.render_tree(tree.root())?;
    let partials = rendered
        .iter()
        .filter(|r| matches!(r, Rendered::Partial(_)))
        .count();
    info!(rendered = rendered.len(), partials, "Rendered templates");

    install_signing_certificate(params, &tree)?;
    Ok(tree)
}

/// The hub's JWT certificate configuration map needs a file even when
/// no certificate is configured.
fn install_signing_certificate(params: &Params, tree: &DeploymentTree) -> Result<()> {
    let dest = tree.file("jupyterhub", "config/signing-certificate.pem");
    match params.path("jwt_signing_certificate") {
        Some(source) if source.is_file() => {
            std::fs::copy(source, &dest)?;
        }
        Some(source) => {
            warn!(path = %source.display(), "JWT signing certificate missing; installing empty file");
            std::fs::write(&dest, "")?;
        }
        None => std::fs::write(&dest, "")?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    use super::*;
    use crate::params::{normalize, ParamValue, ParameterRecord, CONFIG_PLACEHOLDER};
    use crate::runner::testing::RecordingRunner;

    fn params(certs: &Path) -> Params {
        let path = |name: &str| certs.join(name).display().to_string();
        let record: ParameterRecord = [
            ("hostname", "kremvax.ru".to_string()),
            ("oauth_client_id", "id".to_string()),
            ("oauth_secret", "secret".to_string()),
            ("allowed_groups", "kgb".to_string()),
            ("tls_cert", path("cert.pem")),
            ("tls_key", path("key.pem")),
            ("tls_root_chain", path("chain.pem")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), ParamValue::from(v)))
        .collect();
        normalize(&record).unwrap()
    }

    fn certs() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in ["cert.pem", "key.pem", "chain.pem"] {
            std::fs::write(dir.path().join(name), format!("contents of {name}")).unwrap();
        }
        dir
    }

    #[test]
    fn test_crypto_key_shape() {
        let key = crypto_key();
        let (a, b) = key.split_once(';').unwrap();
        assert_eq!(a.len(), 32);
        assert_eq!(b.len(), 32);
        assert_ne!(a, b);
        assert_eq!(proxy_token().len(), 32);
    }

    #[test]
    fn test_bindings_encode_secrets() {
        let certs = certs();
        let runner = RecordingRunner::new();
        runner.reply("openssl dhparam", 0, "DH PARAMETERS");
        let b = bindings(&runner, &params(certs.path()), false).unwrap();

        assert_eq!(b["TLS_CERT"], STANDARD.encode("contents of cert.pem"));
        assert_eq!(b["OAUTH_SECRET"], STANDARD.encode("secret"));
        assert_eq!(b["TLS_DHPARAM"], STANDARD.encode("DH PARAMETERS"));
        assert_eq!(b["HOSTNAME"], "kremvax.ru");
        assert_eq!(runner.count("openssl dhparam"), 1);
    }

    #[test]
    fn test_config_only_skips_openssl() {
        let certs = certs();
        let runner = RecordingRunner::new();
        let b = bindings(&runner, &params(certs.path()), true).unwrap();
        assert_eq!(b["TLS_DHPARAM"], STANDARD.encode(CONFIG_PLACEHOLDER));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_generate_tree() {
        let certs = certs();
        let config = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let tree = generate(&runner, &params(certs.path()), true, config.path()).unwrap();

        let tls = std::fs::read_to_string(tree.file("tls", "tls-secrets.yml")).unwrap();
        assert!(tls.contains(&STANDARD.encode("contents of key.pem")));
        assert!(tree.file("fileserver", "home-pv.stage2.yml").is_file());
        assert!(tree.file("fileserver", "home-pvc.yml").is_file());
        assert!(tree.file("jupyterhub", "deployment.stage2.yml").is_file());
        assert!(tree
            .file("jupyterhub", "config/signing-certificate.pem")
            .is_file());
        assert!(!tree.file("tls", "tls-secrets.template.yml").exists());

        let ingress = std::fs::read_to_string(tree.file("proxy", "ingress.yml")).unwrap();
        assert!(ingress.contains("path: /nb/"));
        assert!(ingress.contains("host: kremvax.ru"));
    }
}
