//! Timestamped record of the parameters a deployment used.
//!
//! The snapshot can be fed back with `-f` to reproduce or tear down the
//! same instance.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::Result;
use crate::params::Params;

/// Snapshot file name for a run started at `at`.
#[must_use]
pub fn file_name(at: DateTime<Utc>) -> String {
    format!("deploy.{}-UTC.yml", at.format("%Y-%m-%d-%H-%M-%S-%6f"))
}

/// Write the snapshot into `dir`.
///
/// A parameter file given on the command line is copied verbatim. Otherwise
/// the effective record is written as YAML, without empty values, derived
/// values or certificate paths.
///
/// # Errors
///
/// Returns I/O or serialization errors.
pub fn write(dir: &Path, params: &Params, source: Option<&Path>, at: DateTime<Utc>) -> Result<PathBuf> {
    let path = dir.join(file_name(at));
    if let Some(source) = source {
        std::fs::copy(source, &path)?;
    } else {
        let header = format!(
            "# Notebook platform deployment\n# Created at {}\n",
            at.to_rfc3339()
        );
        let body = serde_yaml::to_string(&params.snapshot_record())?;
        std::fs::write(&path, header + &body)?;
    }
    info!(snapshot = %path.display(), "Wrote parameter snapshot");
    Ok(path)
}
