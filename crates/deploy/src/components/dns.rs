//! External DNS A record for the platform hostname.

use serde::Serialize;
use tracing::{info, warn};

use super::{Component, Ctx};
use crate::error::{DeployError, Result};
use crate::poll::{wait_for, Patience};
use crate::runner::{CommandOutput, CommandRunner};
use crate::tools;

const RECORD_TTL: u64 = 60;

/// Route 53 change batch document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChangeBatch {
    pub comment: String,
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Change {
    pub action: String,
    pub resource_record_set: RecordSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecordSet {
    pub name: String,
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "TTL")]
    pub ttl: u64,
    pub resource_records: Vec<RecordValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecordValue {
    pub value: String,
}

impl ChangeBatch {
    /// A single change to the A record for `hostname`.
    #[must_use]
    pub fn a_record(action: &str, comment: String, hostname: &str, ip: &str, ttl: u64) -> Self {
        Self {
            comment,
            changes: vec![Change {
                action: action.to_string(),
                resource_record_set: RecordSet {
                    name: hostname.to_string(),
                    kind: "A".to_string(),
                    ttl,
                    resource_records: vec![RecordValue {
                        value: ip.to_string(),
                    }],
                },
            }],
        }
    }

    /// Write the batch to a scratch file and hand it to the DNS CLI.
    ///
    /// # Errors
    ///
    /// Returns I/O or serialization errors, or the CLI failure when
    /// `best_effort` is not set.
    pub fn submit(
        &self,
        runner: &dyn CommandRunner,
        zone_id: &str,
        best_effort: bool,
    ) -> Result<CommandOutput> {
        let scratch = tempfile::tempdir()?;
        let path = scratch.path().join("rr-changeset.txt");
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        let mut invocation = tools::aws([
            "route53".to_string(),
            "change-resource-record-sets".to_string(),
            "--hosted-zone-id".to_string(),
            zone_id.to_string(),
            "--change-batch".to_string(),
            format!("file://{}", path.display()),
            "--output".to_string(),
            "json".to_string(),
        ]);
        if best_effort {
            invocation = invocation.best_effort();
        }
        runner.run(&invocation)
    }
}

/// Current A record value and TTL for `hostname`, if one exists.
fn current_record(
    runner: &dyn CommandRunner,
    zone_id: &str,
    hostname: &str,
) -> Result<Option<(String, u64)>> {
    let out = runner.run(
        &tools::aws([
            "route53",
            "list-resource-record-sets",
            "--hosted-zone-id",
            zone_id,
            "--output",
            "json",
        ])
        .capture()
        .best_effort(),
    )?;
    if !out.success() {
        return Ok(None);
    }
    let listing: serde_json::Value = match serde_json::from_str(out.stdout_trimmed().unwrap_or("{}")) {
        Ok(listing) => listing,
        Err(e) => {
            warn!(zone_id, error = %e, "Unreadable DNS record listing");
            return Ok(None);
        }
    };
    let record = listing["ResourceRecordSets"]
        .as_array()
        .into_iter()
        .flatten()
        .find(|r| {
            r["Type"].as_str() == Some("A")
                && r["Name"].as_str().map(|n| n.trim_end_matches('.')) == Some(hostname)
        })
        .and_then(|r| {
            let value = r["ResourceRecords"][0]["Value"].as_str()?;
            Some((value.to_string(), r["TTL"].as_u64().unwrap_or(RECORD_TTL)))
        });
    Ok(record)
}

/// DNS A record pointing at the ingress load balancer.
pub struct Dns;

impl Dns {
    fn comment(ctx: &Ctx<'_>) -> String {
        format!(
            "Notebook platform {} / {}",
            ctx.params.cluster_name,
            ctx.namespace()
        )
    }
}

impl Component for Dns {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn create(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        let zone_id = ctx.params.zone_id.clone().ok_or_else(|| {
            DeployError::DnsZoneNotFound(tools::parent_domain(&ctx.params.hostname).to_string())
        })?;
        let ip = wait_for(
            "ingress load balancer address",
            ctx.patience(Patience::load_balancer()),
            || tools::load_balancer_ip(ctx.runner),
        )?;
        info!(hostname = %ctx.params.hostname, ip = %ip, "Creating DNS record");
        ChangeBatch::a_record(
            "UPSERT",
            Self::comment(ctx),
            &ctx.params.hostname,
            &ip,
            RECORD_TTL,
        )
        .submit(ctx.runner, &zone_id, false)?;
        Ok(())
    }

    fn destroy(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        let Some(zone_id) = ctx.params.zone_id.clone() else {
            warn!(hostname = %ctx.params.hostname, "No DNS zone; leaving record alone");
            return Ok(());
        };
        let Some((ip, ttl)) = current_record(ctx.runner, &zone_id, &ctx.params.hostname)? else {
            info!(hostname = %ctx.params.hostname, "No DNS record to delete");
            return Ok(());
        };
        info!(hostname = %ctx.params.hostname, ip = %ip, "Deleting DNS record");
        let batch =
            ChangeBatch::a_record("DELETE", Self::comment(ctx), &ctx.params.hostname, &ip, ttl);
        match batch.submit(ctx.runner, &zone_id, true) {
            Ok(out) if out.success() => {}
            Ok(_) => warn!(hostname = %ctx.params.hostname, "DNS record deletion failed; continuing"),
            Err(e) => {
                warn!(hostname = %ctx.params.hostname, error = %e, "DNS record deletion failed; continuing");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::components::testing::{params, scratch_ctx};
    use crate::components::PlatformOptions;
    use crate::runner::testing::RecordingRunner;

    const LISTING: &str = r#"{"ResourceRecordSets":[{"Name":"kremvax.ru.","Type":"A","TTL":300,"ResourceRecords":[{"Value":"35.1.2.3"}]}]}"#;

    fn destroy(runner: &RecordingRunner) -> Result<()> {
        let params = params();
        let mut ctx = scratch_ctx(runner, &params, PlatformOptions::default(), Path::new("/nonexistent"));
        Dns.destroy(&mut ctx)
    }

    #[test]
    fn test_destroy_deletes_current_record() {
        let runner = RecordingRunner::new();
        runner.reply("aws route53 list-resource-record-sets", 0, LISTING);
        destroy(&runner).unwrap();
        assert_eq!(runner.count("aws route53 change-resource-record-sets --hosted-zone-id Z9"), 1);
    }

    #[test]
    fn test_destroy_without_record_is_noop() {
        let runner = RecordingRunner::new();
        runner.reply(
            "aws route53 list-resource-record-sets",
            0,
            r#"{"ResourceRecordSets":[]}"#,
        );
        destroy(&runner).unwrap();
        assert_eq!(runner.count("aws route53 change-resource-record-sets"), 0);
    }

    #[test]
    fn test_destroy_tolerates_unreadable_listing() {
        let runner = RecordingRunner::new();
        runner.reply(
            "aws route53 list-resource-record-sets",
            0,
            "<html>throttled</html>",
        );
        destroy(&runner).unwrap();
        assert_eq!(runner.count("aws route53 change-resource-record-sets"), 0);
    }

    #[test]
    fn test_failed_delete_is_not_fatal() {
        let runner = RecordingRunner::new();
        runner
            .reply("aws route53 list-resource-record-sets", 0, LISTING)
            .reply("aws route53 change-resource-record-sets", 254, "");
        destroy(&runner).unwrap();
        assert_eq!(runner.count("aws route53 change-resource-record-sets"), 1);
    }

    #[test]
    fn test_failed_upsert_is_fatal() {
        let runner = RecordingRunner::new();
        runner
            .reply(
                "kubectl get svc ingress-nginx",
                0,
                "status:\n  loadBalancer:\n    ingress:\n    - ip: 35.1.2.3\n",
            )
            .reply("aws route53 change-resource-record-sets", 254, "");
        let params = params();
        let mut ctx = scratch_ctx(&runner, &params, PlatformOptions::default(), Path::new("/nonexistent"));
        let err = Dns.create(&mut ctx).unwrap_err();
        assert!(matches!(err, DeployError::CommandFailed { code: 254, .. }));
    }

    #[test]
    fn test_change_batch_document() {
        let batch = ChangeBatch::a_record(
            "UPSERT",
            "Notebook platform kremvax-ru / kremvax".into(),
            "kremvax.ru",
            "35.1.2.3",
            60,
        );
        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["Comment"], "Notebook platform kremvax-ru / kremvax");
        let change = &json["Changes"][0];
        assert_eq!(change["Action"], "UPSERT");
        assert_eq!(change["ResourceRecordSet"]["Name"], "kremvax.ru");
        assert_eq!(change["ResourceRecordSet"]["Type"], "A");
        assert_eq!(change["ResourceRecordSet"]["TTL"], 60);
        assert_eq!(
            change["ResourceRecordSet"]["ResourceRecords"][0]["Value"],
            "35.1.2.3"
        );
    }
}
