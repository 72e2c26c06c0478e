//! Error types for deployment and teardown.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while validating parameters or driving the platform
/// lifecycle.
#[derive(Debug, Error)]
pub enum DeployError {
    /// One or more required parameters are absent or empty.
    #[error("Missing required parameters: {}", .0.join(", "))]
    MissingParameter(Vec<String>),

    /// One or more parameters have unusable values.
    #[error("Invalid parameters: {}", .0.join("; "))]
    InvalidParameter(Vec<String>),

    /// A required executable is not on the search path.
    #[error("{0} not on search path")]
    ToolNotFound(String),

    /// An external command exited non-zero under a must-succeed policy.
    #[error("Command '{command}' failed with exit code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    /// A readiness probe never succeeded.
    #[error("{what} did not succeed after {tries} tries at {delay_secs}s intervals")]
    Timeout {
        what: String,
        tries: u32,
        delay_secs: u64,
    },

    /// A template or partial manifest was expected but is gone.
    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The hostname's parent domain has no hosted DNS zone.
    #[error("Could not determine DNS zone id for {0}")]
    DnsZoneNotFound(String),

    /// No kubectl context matches the cluster name.
    #[error("Could not find context for cluster '{0}'")]
    ContextNotFound(String),

    /// A tool or cluster reports a version that is too old.
    #[error("{tool} {required} required; {found} present")]
    UnsupportedVersion {
        tool: String,
        found: String,
        required: String,
    },

    /// Anything else that stops the current phase.
    #[error("{0}")]
    Other(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Template error: {0}")]
    Template(#[from] handlebars::RenderError),
}

impl DeployError {
    /// True for poll exhaustion, which teardown may tolerate.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = DeployError> = std::result::Result<T, E>;
