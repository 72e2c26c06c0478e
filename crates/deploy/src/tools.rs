//! Command lines and queries for the cluster, cloud and DNS CLIs.
//!
//! Builders return [`Invocation`]s; queries run them and pull single
//! values out of YAML or JSON output.

use std::path::Path;

use semver::Version;
use serde::Deserialize as _;
use serde_yaml::Value;
use tracing::debug;

use crate::error::{DeployError, Result};
use crate::params::Params;
use crate::runner::{CommandRunner, Invocation};

/// Namespace of the ingress controller.
pub const INGRESS_NAMESPACE: &str = "ingress-nginx";
/// Service exposing the ingress controller's load balancer.
pub const INGRESS_SERVICE: &str = "ingress-nginx";

/// Oldest kubectl client and cluster version supported.
pub const MIN_KUBERNETES: Version = Version::new(1, 10, 0);

pub fn kubectl<I, S>(args: I) -> Invocation
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Invocation::new(["kubectl"]).args(args)
}

/// `gcloud` with the deployment's zone, project and YAML output appended.
pub fn gcloud<I, S>(params: &Params, args: I) -> Invocation
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Invocation::new(["gcloud"])
        .args(args)
        .args([format!("--zone={}", params.zone), "--format=yaml".to_string()])
        .args(params.project.as_ref().map(|p| format!("--project={p}")))
}

pub fn aws<I, S>(args: I) -> Invocation
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Invocation::new(["aws"]).args(args)
}

/// `kubectl create -f <file>` in a namespace.
#[must_use]
pub fn create_from(file: &Path, namespace: &str) -> Invocation {
    kubectl([
        "create".to_string(),
        "-f".to_string(),
        file.display().to_string(),
        format!("--namespace={namespace}"),
    ])
}

/// Best-effort `kubectl delete <kind> <name>` in a namespace.
#[must_use]
pub fn delete(kind: &str, name: &str, namespace: &str) -> Invocation {
    kubectl([
        "delete".to_string(),
        kind.to_string(),
        name.to_string(),
        format!("--namespace={namespace}"),
    ])
    .best_effort()
}

fn parse_yaml(text: &str) -> Result<Value> {
    Ok(serde_yaml::from_str(text)?)
}

fn non_empty(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `kubectl get <kind> <name> -o yaml`, or `None` if the object is absent.
///
/// # Errors
///
/// Returns an error if the command cannot start or prints invalid YAML.
pub fn get_object(
    runner: &dyn CommandRunner,
    kind: &str,
    name: &str,
    namespace: &str,
) -> Result<Option<Value>> {
    let out = runner.run(
        &kubectl([
            "get".to_string(),
            kind.to_string(),
            name.to_string(),
            "-o".to_string(),
            "yaml".to_string(),
            format!("--namespace={namespace}"),
        ])
        .capture()
        .best_effort(),
    )?;
    if !out.success() {
        return Ok(None);
    }
    out.stdout_trimmed().map(parse_yaml).transpose()
}

/// Internal address of a service, once assigned.
///
/// # Errors
///
/// See [`get_object`].
pub fn service_cluster_ip(
    runner: &dyn CommandRunner,
    service: &str,
    namespace: &str,
) -> Result<Option<String>> {
    let ip = get_object(runner, "svc", service, namespace)?
        .and_then(|svc| non_empty(&svc["spec"]["clusterIP"]))
        .filter(|ip| ip != "None");
    Ok(ip)
}

/// External address of the ingress controller's load balancer.
///
/// # Errors
///
/// See [`get_object`].
pub fn load_balancer_ip(runner: &dyn CommandRunner) -> Result<Option<String>> {
    Ok(
        get_object(runner, "svc", INGRESS_SERVICE, INGRESS_NAMESPACE)?
            .and_then(|svc| non_empty(&svc["status"]["loadBalancer"]["ingress"][0]["ip"])),
    )
}

/// Whether any pod whose name starts with `prefix` still exists.
///
/// # Errors
///
/// Returns an error if the pod listing fails or is not YAML.
pub fn pods_remaining(runner: &dyn CommandRunner, prefix: &str, namespace: &str) -> Result<bool> {
    let out = runner.run(
        &kubectl([
            "get".to_string(),
            "pods".to_string(),
            "-o".to_string(),
            "yaml".to_string(),
            format!("--namespace={namespace}"),
        ])
        .capture(),
    )?;
    let Some(text) = out.stdout_trimmed() else {
        return Ok(false);
    };
    let pods = parse_yaml(text)?;
    let remaining = pods["items"]
        .as_sequence()
        .into_iter()
        .flatten()
        .filter_map(|pod| pod["metadata"]["name"].as_str())
        .filter(|name| name.starts_with(prefix))
        .count();
    debug!(prefix, remaining, "Counted pods");
    Ok(remaining > 0)
}

/// Persistent volume bound to a claim.
///
/// # Errors
///
/// See [`get_object`].
pub fn volume_for_claim(
    runner: &dyn CommandRunner,
    claim: &str,
    namespace: &str,
) -> Result<Option<String>> {
    Ok(get_object(runner, "pvc", claim, namespace)?
        .and_then(|pvc| non_empty(&pvc["spec"]["volumeName"])))
}

/// Cloud disk backing a persistent volume.
///
/// # Errors
///
/// See [`get_object`].
pub fn disk_for_volume(
    runner: &dyn CommandRunner,
    volume: &str,
    namespace: &str,
) -> Result<Option<String>> {
    Ok(get_object(runner, "pv", volume, namespace)?.and_then(|pv| {
        non_empty(&pv["spec"]["gcePersistentDisk"]["pdName"]).or_else(|| {
            // CSI handles look like projects/<p>/zones/<z>/disks/<name>.
            non_empty(&pv["spec"]["csi"]["volumeHandle"])
                .and_then(|h| h.rsplit('/').next().map(str::to_string))
        })
    }))
}

/// Account the cloud CLI is logged in as.
///
/// # Errors
///
/// Returns an error if `gcloud info` fails or prints invalid YAML.
pub fn authenticated_account(runner: &dyn CommandRunner) -> Result<Option<String>> {
    let out = runner.run(&Invocation::new(["gcloud", "info", "--format", "yaml"]).capture())?;
    let info = parse_yaml(out.stdout_trimmed().unwrap_or("{}"))?;
    Ok(non_empty(&info["config"]["account"]))
}

/// The cloud CLI's configured default project.
///
/// # Errors
///
/// Returns an error if the command cannot start.
pub fn default_project(runner: &dyn CommandRunner) -> Result<Option<String>> {
    let out = runner.run(
        &Invocation::new(["gcloud", "config", "get-value", "project"])
            .capture()
            .best_effort(),
    )?;
    Ok(out
        .success()
        .then(|| out.stdout_trimmed().map(str::to_string))
        .flatten())
}

/// The cloud CLI's configured account, used for the admin role binding.
///
/// # Errors
///
/// Returns [`DeployError::Other`] if no account is configured.
pub fn configured_account(runner: &dyn CommandRunner) -> Result<String> {
    let out = runner.run(&Invocation::new(["gcloud", "config", "get-value", "account"]).capture())?;
    out.stdout_trimmed()
        .map(str::to_string)
        .ok_or_else(|| DeployError::Other("No gcloud account configured".into()))
}

/// Lenient version parse: `1.27.3-gke.100`, `1.10+` and `v1.9` all work.
#[must_use]
pub fn loose_version(text: &str) -> Option<Version> {
    let text = text.trim().trim_start_matches('v');
    if let Ok(v) = Version::parse(text) {
        return Some(v);
    }
    let mut parts = text
        .split(['.', '-', '+'])
        .map(|p| p.chars().take_while(char::is_ascii_digit).collect::<String>());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    Some(Version::new(major, minor, patch))
}

/// kubectl client version.
///
/// # Errors
///
/// Returns an error if the version output is missing or unparsable.
pub fn kubectl_client_version(runner: &dyn CommandRunner) -> Result<Version> {
    let out = runner.run(&kubectl(["version", "--client", "-o", "yaml"]).capture())?;
    let doc = parse_yaml(out.stdout_trimmed().unwrap_or("{}"))?;
    let major = doc["clientVersion"]["major"].as_str().unwrap_or_default();
    let minor = doc["clientVersion"]["minor"].as_str().unwrap_or_default();
    loose_version(&format!("{major}.{minor}"))
        .ok_or_else(|| DeployError::Other("Could not determine kubectl version".into()))
}

/// Version for a new cluster: the server default if recent enough, else
/// the newest valid master version.
///
/// # Errors
///
/// Returns [`DeployError::UnsupportedVersion`] when no usable version is
/// offered.
pub fn cluster_version(runner: &dyn CommandRunner, params: &Params) -> Result<String> {
    let out = runner.run(&gcloud(params, ["container", "get-server-config"]).capture())?;
    let config = parse_yaml(out.stdout_trimmed().unwrap_or("{}"))?;
    let default = non_empty(&config["defaultClusterVersion"]).unwrap_or_default();
    if loose_version(&default).is_some_and(|v| v >= MIN_KUBERNETES) {
        return Ok(default);
    }
    non_empty(&config["validMasterVersions"][0]).ok_or_else(|| DeployError::UnsupportedVersion {
        tool: "cluster".into(),
        found: default,
        required: MIN_KUBERNETES.to_string(),
    })
}

/// Parent domain of a hostname: `kremvax.ru` for `nb.kremvax.ru`.
#[must_use]
pub fn parent_domain(hostname: &str) -> &str {
    hostname.split_once('.').map_or(hostname, |(_, rest)| rest)
}

/// Hosted DNS zone id for the hostname's parent domain.
///
/// # Errors
///
/// Returns [`DeployError::DnsZoneNotFound`] when no zone matches.
pub fn dns_zone_id(runner: &dyn CommandRunner, hostname: &str) -> Result<String> {
    let domain = parent_domain(hostname);
    let out = runner.run(&aws(["route53", "list-hosted-zones", "--output", "json"]).capture())?;
    let zones: serde_json::Value = serde_json::from_str(out.stdout_trimmed().unwrap_or("{}"))?;
    let wanted = format!("{domain}.");
    zones["HostedZones"]
        .as_array()
        .into_iter()
        .flatten()
        .find(|z| z["Name"].as_str() == Some(wanted.as_str()))
        .and_then(|z| z["Id"].as_str())
        .and_then(|id| id.rsplit('/').next())
        .map(str::to_string)
        .ok_or_else(|| DeployError::DnsZoneNotFound(domain.to_string()))
}

/// Cloud SQL instances whose name starts with `<cluster>-`.
///
/// # Errors
///
/// Returns an error if the listing fails or is not YAML.
pub fn database_instances(runner: &dyn CommandRunner, params: &Params) -> Result<Vec<String>> {
    let mut inv = Invocation::new(["gcloud", "sql", "instances", "list", "--format=yaml"]);
    if let Some(project) = &params.project {
        inv = inv.args([format!("--project={project}")]);
    }
    let out = runner.run(&inv.capture())?;
    let prefix = format!("{}-", params.cluster_name);
    let mut names = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(&out.stdout) {
        let value = Value::deserialize(doc)?;
        if let Some(name) = value["name"].as_str().filter(|n| n.starts_with(&prefix)) {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{normalize, ParamValue, ParameterRecord};
    use crate::runner::testing::RecordingRunner;

    fn params() -> Params {
        let record: ParameterRecord = [("hostname", "nb.kremvax.ru"), ("gke_project", "kgb")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), ParamValue::from(v)))
            .collect();
        normalize(&record).unwrap()
    }

    #[test]
    fn test_gcloud_appends_zone_and_project() {
        let inv = gcloud(&params(), ["compute", "disks", "list"]);
        assert_eq!(
            inv.display(),
            "gcloud compute disks list --zone=us-central1-a --format=yaml --project=kgb"
        );
    }

    #[test]
    fn test_delete_is_best_effort() {
        let inv = delete("svc", "hub", "nb");
        assert_eq!(inv.display(), "kubectl delete svc hub --namespace=nb");
        assert_eq!(inv.policy, crate::runner::Policy::BestEffort);
    }

    #[test]
    fn test_service_cluster_ip() {
        let runner = RecordingRunner::new();
        runner.reply("kubectl get svc fileserver", 0, "spec:\n  clusterIP: 10.0.0.7\n");
        assert_eq!(
            service_cluster_ip(&runner, "fileserver", "nb").unwrap().as_deref(),
            Some("10.0.0.7")
        );
        runner.reply("kubectl get svc fileserver", 1, "");
        assert_eq!(service_cluster_ip(&runner, "fileserver", "nb").unwrap(), None);
    }

    #[test]
    fn test_load_balancer_ip_pending() {
        let runner = RecordingRunner::new();
        runner.reply("kubectl get svc ingress-nginx", 0, "status:\n  loadBalancer: {}\n");
        assert_eq!(load_balancer_ip(&runner).unwrap(), None);
        runner.reply(
            "kubectl get svc ingress-nginx",
            0,
            "status:\n  loadBalancer:\n    ingress:\n    - ip: 35.1.2.3\n",
        );
        assert_eq!(load_balancer_ip(&runner).unwrap().as_deref(), Some("35.1.2.3"));
    }

    #[test]
    fn test_pods_remaining_by_prefix() {
        let runner = RecordingRunner::new();
        runner.reply(
            "kubectl get pods",
            0,
            "items:\n- metadata:\n    name: fileserver-5d8-abc\n- metadata:\n    name: hub-1\n",
        );
        assert!(pods_remaining(&runner, "fileserver", "nb").unwrap());
        assert!(!pods_remaining(&runner, "keepalive", "nb").unwrap());
    }

    #[test]
    fn test_disk_for_volume_gce_and_csi() {
        let runner = RecordingRunner::new();
        runner.reply(
            "kubectl get pv pvc-1",
            0,
            "spec:\n  gcePersistentDisk:\n    pdName: gke-disk-1\n",
        );
        runner.reply(
            "kubectl get pv pvc-2",
            0,
            "spec:\n  csi:\n    volumeHandle: projects/kgb/zones/z/disks/gke-disk-2\n",
        );
        assert_eq!(
            disk_for_volume(&runner, "pvc-1", "nb").unwrap().as_deref(),
            Some("gke-disk-1")
        );
        assert_eq!(
            disk_for_volume(&runner, "pvc-2", "nb").unwrap().as_deref(),
            Some("gke-disk-2")
        );
    }

    #[test]
    fn test_loose_version() {
        assert_eq!(loose_version("1.10+"), Some(Version::new(1, 10, 0)));
        assert_eq!(loose_version("v1.9"), Some(Version::new(1, 9, 0)));
        assert!(loose_version("1.27.3-gke.100").unwrap() >= MIN_KUBERNETES);
        assert_eq!(loose_version("garbage"), None);
    }

    #[test]
    fn test_kubectl_client_version() {
        let runner = RecordingRunner::new();
        runner.reply(
            "kubectl version",
            0,
            "clientVersion:\n  major: \"1\"\n  minor: \"9+\"\n",
        );
        assert_eq!(kubectl_client_version(&runner).unwrap(), Version::new(1, 9, 0));
    }

    #[test]
    fn test_cluster_version_falls_back() {
        let runner = RecordingRunner::new();
        runner.reply(
            "gcloud container get-server-config",
            0,
            "defaultClusterVersion: 1.9.7-gke.6\nvalidMasterVersions:\n- 1.11.2-gke.18\n",
        );
        assert_eq!(cluster_version(&runner, &params()).unwrap(), "1.11.2-gke.18");
    }

    #[test]
    fn test_dns_zone_id() {
        let runner = RecordingRunner::new();
        runner.reply(
            "aws route53 list-hosted-zones",
            0,
            r#"{"HostedZones":[{"Id":"/hostedzone/ZOTHER","Name":"example.com."},{"Id":"/hostedzone/Z123","Name":"kremvax.ru."}]}"#,
        );
        assert_eq!(dns_zone_id(&runner, "nb.kremvax.ru").unwrap(), "Z123");
        let err = dns_zone_id(&runner, "nb.moscow.su").unwrap_err();
        assert!(matches!(err, DeployError::DnsZoneNotFound(d) if d == "moscow.su"));
    }

    #[test]
    fn test_database_instances_by_prefix() {
        let runner = RecordingRunner::new();
        runner.reply(
            "gcloud sql instances list",
            0,
            "name: nb-kremvax-ru-abc\n---\nname: other-db\n",
        );
        assert_eq!(
            database_instances(&runner, &params()).unwrap(),
            vec!["nb-kremvax-ru-abc".to_string()]
        );
    }
}
