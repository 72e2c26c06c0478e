//! Configuration generation through the public API.
//!
//! These tests render a complete deployment tree without any cluster
//! tooling: every command the runner is asked to execute is a failure.

use std::cell::RefCell;
use std::path::Path;

use nb_deploy::generate;
use nb_deploy::params::{self, Operation, ParamValue, ParameterRecord, MOUNTS};
use nb_deploy::{CommandOutput, CommandRunner, DeployError, Invocation, Platform, PlatformOptions};
use serial_test::serial;

/// Refuses to run anything and remembers what was asked.
#[derive(Default)]
struct NoTools {
    asked: RefCell<Vec<String>>,
}

impl CommandRunner for NoTools {
    fn run(&self, invocation: &Invocation) -> nb_deploy::Result<CommandOutput> {
        self.asked.borrow_mut().push(invocation.display());
        Err(DeployError::ToolNotFound(invocation.argv[0].clone()))
    }
}

fn write_certs(dir: &Path) {
    for name in ["cert.pem", "key.pem", "chain.pem", "dhparam.pem"] {
        std::fs::write(dir.join(name), format!("-----{name}-----\n")).unwrap();
    }
}

fn record(certs: &Path) -> ParameterRecord {
    let mut record: ParameterRecord = [
        ("hostname", "nb.kremvax.ru"),
        ("oauth_client_id", "client"),
        ("oauth_secret", "hunter2"),
        ("allowed_groups", "kgb"),
        ("gke_project", "kgb"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), ParamValue::from(v)))
    .collect();
    record.extend(params::certs_from_dir(certs, false));
    record
}

#[test]
fn test_config_only_deploy_writes_full_tree() {
    let certs = tempfile::tempdir().unwrap();
    write_certs(certs.path());
    let config = tempfile::tempdir().unwrap();
    let params = params::normalize(&record(certs.path())).unwrap();
    let runner = NoTools::default();
    let options = PlatformOptions {
        config_only: true,
        ..PlatformOptions::default()
    };

    let report = Platform::new(&runner, params, options, config.path())
        .deploy()
        .unwrap();

    assert!(runner.asked.borrow().is_empty());
    assert!(report.phases.is_empty());
    let root = config.path().join("deployment");
    for mount in MOUNTS {
        let partial = root.join(format!("fileserver/{mount}-pv.stage2.yml"));
        let text = std::fs::read_to_string(&partial).unwrap();
        assert!(text.contains("{{NFS_SERVER_IP_ADDRESS}}"), "{}", partial.display());
        assert!(text.contains(&format!("name: {mount}-nb")));
    }
    let ingress = std::fs::read_to_string(root.join("proxy/ingress.yml")).unwrap();
    assert!(ingress.contains("host: nb.kremvax.ru"));
    let hub = std::fs::read_to_string(root.join("jupyterhub/deployment.stage2.yml")).unwrap();
    assert!(hub.contains("{{DB_IDENTIFIER}}"));

    let snapshot = report.snapshot.unwrap();
    let saved = std::fs::read_to_string(snapshot).unwrap();
    assert!(saved.starts_with("# Notebook platform deployment"));
    assert!(saved.contains("hostname: nb.kremvax.ru"));
    assert!(!saved.contains("cert.pem"));
}

#[test]
fn test_existing_tree_is_reused() {
    let certs = tempfile::tempdir().unwrap();
    write_certs(certs.path());
    let config = tempfile::tempdir().unwrap();
    let params = params::normalize(&record(certs.path())).unwrap();
    let runner = NoTools::default();

    let tree = generate::generate(&runner, &params, true, config.path()).unwrap();
    let marker = tree.file("tls", "tls-secrets.yml");
    std::fs::write(&marker, "edited by hand\n").unwrap();

    let platform = Platform::new(
        &runner,
        params,
        PlatformOptions {
            config_only: true,
            ..PlatformOptions::default()
        },
        config.path(),
    );
    platform.prepare_tree().unwrap();
    assert_eq!(std::fs::read_to_string(&marker).unwrap(), "edited by hand\n");
}

#[test]
fn test_missing_dhparam_needs_openssl() {
    let certs = tempfile::tempdir().unwrap();
    write_certs(certs.path());
    std::fs::remove_file(certs.path().join("dhparam.pem")).unwrap();
    let config = tempfile::tempdir().unwrap();
    let params = params::normalize(&record(certs.path())).unwrap();
    let runner = NoTools::default();

    let err = generate::generate(&runner, &params, false, config.path()).unwrap_err();
    assert!(matches!(err, DeployError::ToolNotFound(tool) if tool == "openssl"));
}

#[test]
#[serial]
fn test_environment_parameters() {
    let certs = tempfile::tempdir().unwrap();
    write_certs(certs.path());
    std::env::set_var("LSST_NB_HOSTNAME", "nb.kremvax.ru");
    std::env::set_var("LSST_NB_GKE_NODE_COUNT", "5");
    std::env::set_var("LSST_NB_ALLOWED_GROUPS", "kgb,gru");
    std::env::set_var("LSST_NB_CERTIFICATE_DIRECTORY", certs.path());

    let record = params::canonicalize(params::from_env()).unwrap();

    for var in [
        "LSST_NB_HOSTNAME",
        "LSST_NB_GKE_NODE_COUNT",
        "LSST_NB_ALLOWED_GROUPS",
        "LSST_NB_CERTIFICATE_DIRECTORY",
    ] {
        std::env::remove_var(var);
    }

    assert_eq!(record["gke_node_count"], ParamValue::Int(5));
    assert_eq!(
        record["allowed_groups"],
        ParamValue::List(vec!["kgb".into(), "gru".into()])
    );
    assert!(record.contains_key("tls_dhparam"));
    let missing = params::missing_parameters(&record, Operation::Deploy);
    assert_eq!(missing, vec!["oauth_client_id", "oauth_secret"]);
}

#[test]
#[serial]
fn test_empty_environment_reports_hostname() {
    std::env::remove_var("LSST_NB_HOSTNAME");
    std::env::remove_var("LSST_NB_KUBERNETES_CLUSTER_NAME");
    let record = params::from_env();
    let err = params::validate(&record, Operation::Undeploy).unwrap_err();
    assert!(err.to_string().contains("hostname"));
}
