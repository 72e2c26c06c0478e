//! Deployment parameters.
//!
//! A [`ParameterRecord`] is the loosely typed input: a YAML file, the
//! `LSST_NB_*` environment, or interactive answers. [`validate`] reports
//! every missing key at once; [`normalize`] fills defaults and derives the
//! computed values into a strongly typed [`Params`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Local, Timelike};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DeployError, Result};

/// Prefix for parameters supplied through the environment.
pub const ENV_PREFIX: &str = "LSST_NB_";

/// Value used wherever a configuration-only run cannot learn a real one.
pub const CONFIG_PLACEHOLDER: &str = "CONFIGURATION_PLACEHOLDER";

/// Shared filesystem exports, one persistent volume each.
pub const MOUNTS: &[&str] = &["home", "scratch", "project", "datasets", "software"];

pub const DEFAULT_GKE_ZONE: &str = "us-central1-a";
pub const DEFAULT_GKE_MACHINE_TYPE: &str = "n1-standard-4";
pub const DEFAULT_GKE_NODE_COUNT: i64 = 3;
pub const DEFAULT_GKE_LOCAL_VOLUME_SIZE_GB: i64 = 200;
pub const DEFAULT_VOLUME_SIZE_GB: i64 = 20;
pub const DEFAULT_SESSION_DB_URL: &str = "sqlite:////home/jovyan/jupyterhub.sqlite";

/// Every parameter name the deployment understands.
pub const PARAMETER_NAMES: &[&str] = &[
    "hostname",
    "kubernetes_cluster_name",
    "kubernetes_cluster_namespace",
    "oauth_provider",
    "oauth_client_id",
    "oauth_secret",
    "allowed_groups",
    "forbidden_groups",
    "github_organization_whitelist",
    "cilogon_group_whitelist",
    "github_organization_denylist",
    "cilogon_group_denylist",
    "jwt_signing_certificate",
    "tls_cert",
    "tls_key",
    "tls_root_chain",
    "tls_dhparam",
    "gke_project",
    "gke_zone",
    "gke_machine_type",
    "gke_node_count",
    "gke_local_volume_size_gigabytes",
    "volume_size_gigabytes",
    "session_db_url",
    "external_fileserver_ip",
    "database_instance_name",
    "debug",
    "rabbitmq_pan_password",
    "rabbitmq_target_host",
    "rabbitmq_target_vhost",
    "log_shipper_name",
    "beats_cert",
    "beats_key",
    "beats_ca",
    "firefly_admin_password",
    "firefly_replicas",
    "firefly_container_mem_limit",
    "firefly_container_cpu_limit",
    "firefly_max_jvm_size",
    "firefly_uid",
    "prepuller_image_list",
    "prepuller_repo",
    "prepuller_owner",
    "prepuller_image_name",
    "prepuller_dailies",
    "prepuller_weeklies",
    "prepuller_releases",
    "prepuller_port",
    "prepuller_command",
    "prepuller_namespace",
    "lab_repo_host",
    "lab_repo_owner",
    "lab_repo_name",
    "lab_image",
    "lab_selector_title",
    "lab_idle_timeout",
    "lab_cpu_limit",
    "lab_mem_limit",
    "lab_cpu_guarantee",
    "lab_mem_guarantee",
    "hub_route",
    "firefly_route",
    "external_instance_url",
    "max_http_header_size",
];

/// Parameters that arrive as strings from the environment but are integers.
const INTEGER_PARAMETERS: &[&str] = &[
    "gke_node_count",
    "volume_size_gigabytes",
    "gke_local_volume_size_gigabytes",
];

/// Parameters that arrive as comma-separated strings but are lists.
const LIST_PARAMETERS: &[&str] = &[
    "allowed_groups",
    "forbidden_groups",
    "github_organization_whitelist",
    "cilogon_group_whitelist",
    "github_organization_denylist",
    "cilogon_group_denylist",
    "prepuller_image_list",
];

/// The logging pipeline is enabled only when all of these are set.
pub const LOGGING_PARAMETERS: &[&str] = &[
    "rabbitmq_pan_password",
    "rabbitmq_target_host",
    "rabbitmq_target_vhost",
    "log_shipper_name",
    "beats_cert",
    "beats_key",
    "beats_ca",
];

/// Keys holding filesystem paths; never written to the snapshot.
pub const PATH_PARAMETERS: &[&str] = &[
    "tls_cert",
    "tls_key",
    "tls_root_chain",
    "tls_dhparam",
    "jwt_signing_certificate",
    "beats_cert",
    "beats_key",
    "beats_ca",
];

/// Parameters that flow into templates verbatim, keyed by upper-cased name.
const PASSTHROUGH_PARAMETERS: &[&str] = &[
    "debug",
    "rabbitmq_target_host",
    "rabbitmq_target_vhost",
    "firefly_replicas",
    "firefly_container_mem_limit",
    "firefly_container_cpu_limit",
    "firefly_max_jvm_size",
    "firefly_uid",
    "prepuller_image_list",
    "prepuller_repo",
    "prepuller_owner",
    "prepuller_image_name",
    "prepuller_dailies",
    "prepuller_weeklies",
    "prepuller_releases",
    "prepuller_port",
    "prepuller_command",
    "prepuller_namespace",
    "lab_repo_host",
    "lab_repo_owner",
    "lab_repo_name",
    "lab_image",
    "lab_selector_title",
    "lab_idle_timeout",
    "lab_cpu_limit",
    "lab_mem_limit",
    "lab_cpu_guarantee",
    "lab_mem_guarantee",
];

const PASSTHROUGH_DEFAULTS: &[(&str, &str)] = &[
    ("lab_selector_title", "LSST Stack Selector"),
    ("lab_idle_timeout", "43200"),
    ("lab_mem_limit", "3G"),
    ("lab_cpu_limit", "2.0"),
    ("lab_mem_guarantee", "512M"),
    ("lab_cpu_guarantee", "0.5"),
    ("firefly_replicas", "1"),
    ("firefly_container_mem_limit", "4G"),
    ("firefly_container_cpu_limit", "3.0"),
    ("firefly_max_jvm_size", "3584M"),
    ("firefly_uid", "91"),
];

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
}

impl ParamValue {
    /// Convert a parsed YAML node; `null` and nested mappings yield `None`.
    #[must_use]
    pub fn from_yaml(value: &serde_yaml::Value) -> Option<Self> {
        use serde_yaml::Value;
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => Some(
                n.as_i64()
                    .map_or_else(|| Self::Str(n.to_string()), Self::Int),
            ),
            Value::String(s) => Some(Self::Str(s.clone())),
            Value::Sequence(items) => Some(Self::List(
                items
                    .iter()
                    .filter_map(Self::from_yaml)
                    .map(|v| v.as_text())
                    .collect(),
            )),
            Value::Tagged(tagged) => Self::from_yaml(&tagged.value),
            Value::Null | Value::Mapping(_) => None,
        }
    }

    /// Falsy values count as unset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Bool(b) => !b,
            Self::Int(_) => false,
            Self::Str(s) => s.trim().is_empty(),
            Self::List(items) => items.is_empty(),
        }
    }

    /// Scalar rendering; lists are comma-joined.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Str(s) => s.clone(),
            Self::List(items) => items.join(","),
        }
    }

    /// List rendering; strings are split on commas.
    #[must_use]
    pub fn as_list(&self) -> Vec<String> {
        match self {
            Self::List(items) => items.clone(),
            Self::Str(s) => split_list(s),
            other => vec![other.as_text()],
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// Parameter name to value.
pub type ParameterRecord = BTreeMap<String, ParamValue>;

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn present<'a>(record: &'a ParameterRecord, key: &str) -> Option<&'a ParamValue> {
    record.get(key).filter(|v| !v.is_empty())
}

fn text(record: &ParameterRecord, key: &str) -> Option<String> {
    present(record, key).map(ParamValue::as_text)
}

fn list(record: &ParameterRecord, key: &str) -> Vec<String> {
    present(record, key).map(ParamValue::as_list).unwrap_or_default()
}

/// Which lifecycle operation the parameters are for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Deploy,
    Undeploy,
}

/// Authentication provider in front of the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    #[default]
    Github,
    Cilogon,
    Jwt,
}

impl OAuthProvider {
    /// Providers whose groups come from CILogon-style group claims.
    #[must_use]
    pub fn uses_cilogon_groups(self) -> bool {
        matches!(self, Self::Cilogon | Self::Jwt)
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Github => write!(f, "github"),
            Self::Cilogon => write!(f, "cilogon"),
            Self::Jwt => write!(f, "jwt"),
        }
    }
}

impl FromStr for OAuthProvider {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "github" => Ok(Self::Github),
            "cilogon" => Ok(Self::Cilogon),
            "jwt" => Ok(Self::Jwt),
            _ => Err(DeployError::InvalidParameter(vec![format!(
                "oauth_provider '{s}' must be one of github, cilogon, jwt"
            )])),
        }
    }
}

fn provider_of(record: &ParameterRecord) -> Result<OAuthProvider> {
    text(record, "oauth_provider").map_or(Ok(OAuthProvider::default()), |p| p.parse())
}

/// Load a YAML parameter file.
///
/// Unknown names are logged, not rejected.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a YAML mapping.
pub fn load_file(path: &Path) -> Result<ParameterRecord> {
    let text = std::fs::read_to_string(path)?;
    let doc: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(&text)?;
    let mut record = ParameterRecord::new();
    for (key, value) in &doc {
        if !PARAMETER_NAMES.contains(&key.as_str()) {
            warn!(parameter = %key, "Unknown parameter");
        }
        if let Some(v) = ParamValue::from_yaml(value) {
            record.insert(key.clone(), v);
        }
    }
    info!(path = %path.display(), count = record.len(), "Loaded parameter file");
    Ok(record)
}

/// Read parameters from the process environment.
#[must_use]
pub fn from_env() -> ParameterRecord {
    from_lookup(|name| std::env::var(name).ok())
}

/// Read parameters through an arbitrary variable lookup.
///
/// A certificate directory fills in TLS material when `tls_cert` is unset.
pub fn from_lookup<F>(lookup: F) -> ParameterRecord
where
    F: Fn(&str) -> Option<String>,
{
    let mut record = ParameterRecord::new();
    for name in PARAMETER_NAMES {
        let var = format!("{ENV_PREFIX}{}", name.to_uppercase());
        if let Some(value) = lookup(&var).filter(|v| !v.is_empty()) {
            record.insert((*name).to_string(), ParamValue::Str(value));
        }
    }
    if present(&record, "tls_cert").is_none() {
        if let Some(dir) = lookup(&format!("{ENV_PREFIX}CERTIFICATE_DIRECTORY")) {
            let logging = present(&record, "beats_cert").is_none();
            record.extend(certs_from_dir(Path::new(&dir), logging));
        }
    }
    record
}

/// TLS (and optionally logging) certificate paths from a single directory.
#[must_use]
pub fn certs_from_dir(dir: &Path, include_logging: bool) -> ParameterRecord {
    let path = |name: &str| ParamValue::Str(dir.join(name).display().to_string());
    let mut record = ParameterRecord::new();
    record.insert("tls_cert".into(), path("cert.pem"));
    record.insert("tls_key".into(), path("key.pem"));
    record.insert("tls_root_chain".into(), path("chain.pem"));
    if dir.join("dhparam.pem").exists() {
        record.insert("tls_dhparam".into(), path("dhparam.pem"));
    }
    if include_logging && dir.join("beats_cert.pem").exists() {
        record.insert("beats_cert".into(), path("beats_cert.pem"));
        record.insert("beats_key".into(), path("beats_key.pem"));
        record.insert("beats_ca".into(), path("beats_ca.pem"));
    }
    if dir.join("signing-certificate.pem").exists() {
        record.insert("jwt_signing_certificate".into(), path("signing-certificate.pem"));
    }
    record
}

/// Turn environment strings into lists and integers.
///
/// # Errors
///
/// Returns [`DeployError::InvalidParameter`] naming every integer parameter
/// that does not parse.
pub fn canonicalize(mut record: ParameterRecord) -> Result<ParameterRecord> {
    let mut invalid = Vec::new();
    for key in INTEGER_PARAMETERS {
        if let Some(ParamValue::Str(s)) = record.get(*key) {
            match s.trim().parse::<i64>() {
                Ok(n) => {
                    record.insert((*key).to_string(), ParamValue::Int(n));
                }
                Err(_) => invalid.push(format!("{key} '{s}' is not an integer")),
            }
        }
    }
    for key in LIST_PARAMETERS {
        if let Some(ParamValue::Str(s)) = record.get(*key) {
            let items = split_list(s);
            record.insert((*key).to_string(), ParamValue::List(items));
        }
    }
    if invalid.is_empty() {
        Ok(record)
    } else {
        Err(DeployError::InvalidParameter(invalid))
    }
}

/// Names of required parameters absent from `record`, in declaration order.
#[must_use]
pub fn missing_parameters(record: &ParameterRecord, operation: Operation) -> Vec<String> {
    let has = |key: &str| present(record, key).is_some();
    let mut missing = Vec::new();
    if !has("hostname") {
        missing.push("hostname".to_string());
        // The cluster name is derivable from the hostname only.
        if !has("kubernetes_cluster_name") {
            missing.push("kubernetes_cluster_name".to_string());
        }
    }
    if operation == Operation::Undeploy {
        return missing;
    }
    for key in ["tls_cert", "tls_key", "tls_root_chain"] {
        if !has(key) {
            missing.push(key.to_string());
        }
    }
    let provider = provider_of(record).unwrap_or_default();
    let whitelist = if provider.uses_cilogon_groups() {
        "cilogon_group_whitelist"
    } else {
        "github_organization_whitelist"
    };
    if !has("allowed_groups") && !has(whitelist) {
        missing.push("allowed_groups".to_string());
    }
    if provider != OAuthProvider::Jwt {
        for key in ["oauth_client_id", "oauth_secret"] {
            if !has(key) {
                missing.push(key.to_string());
            }
        }
    }
    missing
}

/// Check that every required parameter for `operation` is present.
///
/// # Errors
///
/// Returns [`DeployError::MissingParameter`] listing every absent key, or
/// [`DeployError::InvalidParameter`] for an unknown OAuth provider.
pub fn validate(record: &ParameterRecord, operation: Operation) -> Result<()> {
    let missing = missing_parameters(record, operation);
    if !missing.is_empty() {
        return Err(DeployError::MissingParameter(missing));
    }
    provider_of(record)?;
    Ok(())
}

/// Persistent volume quantities derived from the requested size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSizes {
    pub gigabytes: u32,
    /// Size of the physical claim backing the file server.
    pub physical: String,
    /// Size of each exported volume; leaves headroom for filesystem overhead.
    pub export: String,
}

impl VolumeSizes {
    fn from_gigabytes(gigabytes: u32) -> Self {
        let export = if gigabytes > 1 {
            format!("{}Gi", u64::from(gigabytes) * 95 / 100)
        } else {
            "950Mi".to_string()
        };
        Self {
            gigabytes,
            physical: format!("{gigabytes}Gi"),
            export,
        }
    }
}

/// Optional platform components switched on by their parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Features {
    pub logging: bool,
    pub firefly: bool,
    pub landing_page: bool,
}

/// Validated, defaulted and derived deployment parameters.
#[derive(Debug, Clone)]
pub struct Params {
    pub hostname: String,
    pub cluster_name: String,
    pub namespace: String,
    pub oauth_provider: OAuthProvider,
    pub oauth_client_id: String,
    pub oauth_secret: String,
    pub zone: String,
    pub region: String,
    pub project: Option<String>,
    pub machine_type: String,
    pub node_count: u32,
    pub node_disk_gigabytes: u32,
    pub volume: VolumeSizes,
    pub hub_route: String,
    pub firefly_route: String,
    pub external_instance_url: String,
    pub callback_url: String,
    pub github_whitelist: Vec<String>,
    pub cilogon_whitelist: Vec<String>,
    pub github_denylist: Vec<String>,
    pub cilogon_denylist: Vec<String>,
    pub max_http_header_size: u32,
    pub session_db_url: String,
    pub session_db_password: Option<String>,
    pub external_fileserver_ip: Option<String>,
    pub database_instance: Option<String>,
    pub features: Features,
    pub prepuller_minute: u32,
    /// Hosted DNS zone for the hostname's parent domain, set at pre-flight.
    pub zone_id: Option<String>,
    paths: BTreeMap<String, PathBuf>,
    secrets: BTreeMap<String, String>,
    settings: BTreeMap<String, String>,
    effective: ParameterRecord,
}

fn positive(
    record: &ParameterRecord,
    key: &str,
    default: i64,
    invalid: &mut Vec<String>,
) -> u32 {
    let value = match record.get(key) {
        Some(ParamValue::Int(n)) => *n,
        Some(v) if !v.is_empty() => match v.as_text().trim().parse::<i64>() {
            Ok(n) => n,
            Err(_) => {
                invalid.push(format!("{key} '{}' is not an integer", v.as_text()));
                return 0;
            }
        },
        _ => default,
    };
    match u32::try_from(value) {
        Ok(n) if n > 0 => n,
        _ => {
            invalid.push(format!("{key} must be positive, not {value}"));
            0
        }
    }
}

/// Make a route start and end with `/`.
#[must_use]
pub fn normalize_route(route: &str, default: &str) -> String {
    let trimmed = route.trim().trim_matches('/');
    if route.trim().is_empty() {
        return default.to_string();
    }
    if trimmed.is_empty() {
        return "/".to_string();
    }
    format!("/{trimmed}/")
}

fn generate_password(len: usize) -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Fill defaults and compute derived values, using the current time for the
/// prepuller schedule.
///
/// # Errors
///
/// See [`normalize_at`].
pub fn normalize(record: &ParameterRecord) -> Result<Params> {
    normalize_at(record, Local::now())
}

/// Fill defaults and compute derived values.
///
/// # Errors
///
/// Returns [`DeployError::MissingParameter`] without a hostname, and
/// [`DeployError::InvalidParameter`] for non-positive sizes or counts and
/// unknown OAuth providers.
#[allow(clippy::too_many_lines)]
pub fn normalize_at<Tz: chrono::TimeZone>(
    record: &ParameterRecord,
    now: DateTime<Tz>,
) -> Result<Params> {
    let hostname = text(record, "hostname")
        .ok_or_else(|| DeployError::MissingParameter(vec!["hostname".into()]))?;
    let mut effective = record.clone();
    let mut invalid = Vec::new();

    let cluster_name = text(record, "kubernetes_cluster_name").unwrap_or_else(|| {
        let derived = hostname.replace('.', "-");
        warn!(cluster = %derived, "Using default derived cluster name");
        derived
    });
    let namespace = text(record, "kubernetes_cluster_namespace").unwrap_or_else(|| {
        let derived = hostname.split('.').next().unwrap_or_default().to_string();
        info!(namespace = %derived, "Using default cluster namespace");
        derived
    });

    let oauth_provider = provider_of(record)?;
    let zone = text(record, "gke_zone").unwrap_or_else(|| DEFAULT_GKE_ZONE.to_string());
    let region = zone.rsplit_once('-').map_or_else(|| zone.clone(), |(r, _)| r.to_string());

    let volume_gb = positive(record, "volume_size_gigabytes", DEFAULT_VOLUME_SIZE_GB, &mut invalid);
    let node_count = positive(record, "gke_node_count", DEFAULT_GKE_NODE_COUNT, &mut invalid);
    let node_disk_gigabytes = positive(
        record,
        "gke_local_volume_size_gigabytes",
        DEFAULT_GKE_LOCAL_VOLUME_SIZE_GB,
        &mut invalid,
    );
    let max_http_header_size = match present(record, "max_http_header_size") {
        Some(v) => v.as_text().trim().parse::<u32>().unwrap_or_else(|_| {
            invalid.push(format!("max_http_header_size '{}' is not an integer", v.as_text()));
            0
        }),
        None if oauth_provider == OAuthProvider::Jwt => 16384,
        None => 8192,
    };
    if !invalid.is_empty() {
        return Err(DeployError::InvalidParameter(invalid));
    }

    // allowed_groups and the provider's whitelist stand in for each other.
    let allowed = list(record, "allowed_groups");
    let mut github_whitelist = list(record, "github_organization_whitelist");
    let mut cilogon_whitelist = list(record, "cilogon_group_whitelist");
    let provider_whitelist = if oauth_provider.uses_cilogon_groups() {
        &mut cilogon_whitelist
    } else {
        &mut github_whitelist
    };
    if provider_whitelist.is_empty() {
        provider_whitelist.clone_from(&allowed);
    } else if allowed.is_empty() {
        effective.insert(
            "allowed_groups".into(),
            ParamValue::List(provider_whitelist.clone()),
        );
    }
    for unused in [&mut github_whitelist, &mut cilogon_whitelist] {
        if unused.is_empty() {
            unused.push("dummy".into());
        }
    }
    let mut github_denylist = list(record, "github_organization_denylist");
    let mut cilogon_denylist = list(record, "cilogon_group_denylist");
    let forbidden = list(record, "forbidden_groups");
    if !forbidden.is_empty() {
        if oauth_provider.uses_cilogon_groups() {
            cilogon_denylist = forbidden;
        } else {
            github_denylist = forbidden;
        }
    }

    let hub_route = normalize_route(&text(record, "hub_route").unwrap_or_default(), "/nb/");
    let firefly_route =
        normalize_route(&text(record, "firefly_route").unwrap_or_default(), "/firefly/");
    let external_instance_url = text(record, "external_instance_url")
        .map_or_else(|| format!("https://{hostname}"), |u| u.trim_end_matches('/').to_string());
    let callback_url = format!("https://{hostname}{hub_route}hub/oauth_callback");

    let (session_db_url, session_db_password) = match text(record, "session_db_url") {
        Some(url) => (url, None),
        None => (DEFAULT_SESSION_DB_URL.to_string(), Some(generate_password(16))),
    };

    let logging = LOGGING_PARAMETERS.iter().all(|k| present(record, k).is_some());
    if !logging && LOGGING_PARAMETERS.iter().any(|k| present(record, k).is_some()) {
        warn!("Logging parameters incomplete; logging pipeline disabled");
    }
    let features = Features {
        logging,
        firefly: present(record, "firefly_admin_password").is_some(),
        landing_page: hub_route != "/",
    };

    let mut settings: BTreeMap<String, String> = PASSTHROUGH_PARAMETERS
        .iter()
        .map(|k| ((*k).to_string(), text(record, k).unwrap_or_default()))
        .collect();
    for (key, default) in PASSTHROUGH_DEFAULTS {
        if settings.get(*key).is_none_or(String::is_empty) {
            settings.insert((*key).to_string(), (*default).to_string());
        }
    }
    for (lab, prepuller) in [
        ("lab_repo_owner", "prepuller_owner"),
        ("lab_repo_name", "prepuller_image_name"),
        ("lab_repo_host", "prepuller_repo"),
    ] {
        if settings.get(lab).is_none_or(String::is_empty) {
            let value = settings.get(prepuller).cloned().unwrap_or_default();
            settings.insert(lab.to_string(), value);
        }
    }
    if !logging {
        for key in LOGGING_PARAMETERS {
            settings.remove(*key);
        }
    }

    let mut secret_keys = vec!["oauth_client_id", "oauth_secret", "firefly_admin_password"];
    if logging {
        secret_keys.extend(["rabbitmq_pan_password", "log_shipper_name"]);
    }
    let secrets = secret_keys
        .into_iter()
        .filter_map(|key| text(record, key).map(|v| (key.to_string(), v)))
        .collect();
    let paths = PATH_PARAMETERS
        .iter()
        .copied()
        .filter(|key| logging || !LOGGING_PARAMETERS.contains(key))
        .filter_map(|key| text(record, key).map(|v| (key.to_string(), PathBuf::from(v))))
        .collect();

    Ok(Params {
        oauth_client_id: text(record, "oauth_client_id").unwrap_or_default(),
        oauth_secret: text(record, "oauth_secret").unwrap_or_default(),
        hostname,
        cluster_name,
        namespace,
        oauth_provider,
        zone,
        region,
        project: text(record, "gke_project"),
        machine_type: text(record, "gke_machine_type")
            .unwrap_or_else(|| DEFAULT_GKE_MACHINE_TYPE.to_string()),
        node_count,
        node_disk_gigabytes,
        volume: VolumeSizes::from_gigabytes(volume_gb),
        hub_route,
        firefly_route,
        external_instance_url,
        callback_url,
        github_whitelist,
        cilogon_whitelist,
        github_denylist,
        cilogon_denylist,
        max_http_header_size,
        session_db_url,
        session_db_password,
        external_fileserver_ip: text(record, "external_fileserver_ip"),
        database_instance: text(record, "database_instance_name"),
        features,
        // First prepuller run a quarter hour out, giving the deploy time to finish.
        prepuller_minute: (now.minute() + 15) % 60,
        zone_id: None,
        paths,
        secrets,
        settings,
        effective,
    })
}

impl Params {
    /// A passthrough setting, or `""`.
    #[must_use]
    pub fn setting(&self, key: &str) -> &str {
        self.settings.get(key).map_or("", String::as_str)
    }

    /// Filesystem path parameter, if given.
    #[must_use]
    pub fn path(&self, key: &str) -> Option<&Path> {
        self.paths.get(key).map(PathBuf::as_path)
    }

    /// Scalar secret input (OAuth, logging and Firefly credentials).
    #[must_use]
    pub fn secret(&self, key: &str) -> &str {
        self.secrets.get(key).map_or("", String::as_str)
    }

    /// Cloud project, or the placeholder when none could be determined.
    #[must_use]
    pub fn project_or_placeholder(&self) -> &str {
        self.project.as_deref().unwrap_or(CONFIG_PLACEHOLDER)
    }

    /// Cloud SQL style connection identifier for the hub.
    #[must_use]
    pub fn db_identifier(&self) -> String {
        format!(
            "{}:{}:{}",
            self.project_or_placeholder(),
            self.region,
            self.database_instance.as_deref().unwrap_or("dummy")
        )
    }

    /// Plain (unencoded) template bindings.
    #[must_use]
    pub fn bindings(&self) -> BTreeMap<String, String> {
        let mut b: BTreeMap<String, String> = self
            .settings
            .iter()
            .map(|(k, v)| (k.to_uppercase(), v.clone()))
            .collect();
        let mut set = |k: &str, v: String| {
            b.insert(k.to_string(), v);
        };
        set("CLUSTERNAME", self.cluster_name.clone());
        set("CLUSTER_IDENTIFIER", self.namespace.clone());
        set("HOSTNAME", self.hostname.clone());
        set("FQDN", self.hostname.clone());
        set("PHYSICAL_SHARED_VOLUME_SIZE", self.volume.physical.clone());
        set("SHARED_VOLUME_SIZE", self.volume.export.clone());
        set("SHIPPER_NAME", self.secret("log_shipper_name").to_string());
        set("PREPULLER_MINUTE", self.prepuller_minute.to_string());
        set("HUB_ROUTE", self.hub_route.clone());
        set("FIREFLY_ROUTE", self.firefly_route.clone());
        set("EXTERNAL_INSTANCE_URL", self.external_instance_url.clone());
        set(
            "EXTERNAL_FIREFLY_URL",
            format!("{}{}", self.external_instance_url, self.firefly_route),
        );
        set(
            "EXTERNAL_URL",
            format!("{}{}", self.external_instance_url, self.hub_route),
        );
        set("MAX_HTTP_HEADER_SIZE", self.max_http_header_size.to_string());
        b
    }

    /// Scalar values that are base64-encoded into secrets, keyed by name.
    #[must_use]
    pub fn secret_inputs(&self) -> BTreeMap<String, String> {
        let mut inputs = self.secrets.clone();
        for (k, v) in &self.paths {
            inputs.insert(k.clone(), v.display().to_string());
        }
        inputs.insert("oauth_provider".into(), self.oauth_provider.to_string());
        inputs.insert("oauth_callback_url".into(), self.callback_url.clone());
        inputs.insert(
            "github_organization_whitelist".into(),
            self.github_whitelist.join(","),
        );
        inputs.insert(
            "cilogon_group_whitelist".into(),
            self.cilogon_whitelist.join(","),
        );
        inputs.insert(
            "github_organization_denylist".into(),
            self.github_denylist.join(","),
        );
        inputs.insert(
            "cilogon_group_denylist".into(),
            self.cilogon_denylist.join(","),
        );
        inputs.insert("session_db_url".into(), self.session_db_url.clone());
        inputs
    }

    /// The effective input parameters for a reusable snapshot: no empty
    /// values and no filesystem paths. Derived values never appear here.
    #[must_use]
    pub fn snapshot_record(&self) -> ParameterRecord {
        self.effective
            .iter()
            .filter(|(k, v)| !v.is_empty() && !PATH_PARAMETERS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
