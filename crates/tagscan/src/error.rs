//! Registry scan errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The registry answered with a non-success status.
    #[error("Registry returned {status} for {url}")]
    Api { status: u16, url: String },

    #[error("Could not decode registry response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A tag's `last_updated` is not an RFC 3339 timestamp.
    #[error("Bad timestamp '{value}': {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    /// Token negotiation with the registry failed.
    #[error("Registry authentication failed: {0}")]
    Auth(String),

    /// A manifest response carried no content digest.
    #[error("No digest for tag {0}")]
    MissingDigest(String),
}

pub type Result<T, E = ScanError> = std::result::Result<T, E>;
