//! Checks run before any cluster mutation.

use tracing::info;

use crate::error::{DeployError, Result};
use crate::runner::CommandRunner;
use crate::tools::{self, MIN_KUBERNETES};
use crate::ui;

/// What pre-flight learned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preflight {
    pub account: String,
    pub zone_id: String,
}

/// Verify the cloud login, the kubectl version and the DNS zone.
///
/// Each check prints its result; the first failure stops the run before
/// anything is created.
///
/// # Errors
///
/// Returns [`DeployError::Other`] when not logged in,
/// [`DeployError::UnsupportedVersion`] for an old kubectl and
/// [`DeployError::DnsZoneNotFound`] for an unknown domain.
pub fn run(runner: &dyn CommandRunner, hostname: &str) -> Result<Preflight> {
    let account = check("Cloud authentication", || {
        tools::authenticated_account(runner)?
            .ok_or_else(|| DeployError::Other("gcloud is not authenticated".into()))
    })?;

    check("kubectl version", || {
        let version = tools::kubectl_client_version(runner)?;
        if version < MIN_KUBERNETES {
            return Err(DeployError::UnsupportedVersion {
                tool: "kubectl".into(),
                found: version.to_string(),
                required: MIN_KUBERNETES.to_string(),
            });
        }
        Ok(version.to_string())
    })?;

    let zone_id = check("DNS zone", || tools::dns_zone_id(runner, hostname))?;
    info!(account = %account, zone_id = %zone_id, "Pre-flight checks passed");
    Ok(Preflight { account, zone_id })
}

fn check<F>(name: &str, f: F) -> Result<String>
where
    F: FnOnce() -> Result<String>,
{
    match f() {
        Ok(detail) => {
            ui::print_check_result(name, true, Some(&detail));
            Ok(detail)
        }
        Err(e) => {
            ui::print_check_result(name, false, Some(&e.to_string()));
            Err(e)
        }
    }
}
