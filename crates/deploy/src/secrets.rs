//! Base64 encoding of values and files for cluster secret manifests.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, warn};

use crate::params::CONFIG_PLACEHOLDER;

/// Where file contents come from.
pub trait ContentSource {
    /// Read the whole file as text.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn read(&self, path: &Path) -> io::Result<String>;
}

/// Reads from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSource;

impl ContentSource for FsSource {
    fn read(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// Encodes named values and the files they point at, caching each result
/// for the rest of the run.
pub struct SecretEncoder<S: ContentSource = FsSource> {
    values: BTreeMap<String, String>,
    cache: HashMap<String, String>,
    config_only: bool,
    source: S,
}

impl SecretEncoder<FsSource> {
    #[must_use]
    pub fn new(values: BTreeMap<String, String>, config_only: bool) -> Self {
        Self::with_source(values, config_only, FsSource)
    }
}

impl<S: ContentSource> SecretEncoder<S> {
    pub fn with_source(values: BTreeMap<String, String>, config_only: bool, source: S) -> Self {
        Self {
            values,
            cache: HashMap::new(),
            config_only,
            source,
        }
    }

    /// Add or replace a value before it is first encoded.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Base64 of the value stored under `key`.
    ///
    /// An empty value encodes to `""`, or to the placeholder in a
    /// configuration-only run.
    pub fn encode_value(&mut self, key: &str) -> String {
        if let Some(hit) = self.cache.get(key) {
            return hit.clone();
        }
        let mut value = self.values.get(key).cloned().unwrap_or_default();
        if value.is_empty() && self.config_only {
            warn!(key, "No value; using placeholder for configuration");
            value = CONFIG_PLACEHOLDER.to_string();
        }
        let encoded = STANDARD.encode(value.as_bytes());
        self.cache.insert(key.to_string(), encoded.clone());
        encoded
    }

    /// Base64 of the contents of the file whose path is stored under `key`.
    ///
    /// A missing or unreadable file encodes to `""`.
    pub fn encode_file(&mut self, key: &str) -> String {
        let path = self.values.get(key).cloned().unwrap_or_default();
        let cache_key = format!("{path}_contents");
        if let Some(hit) = self.cache.get(&cache_key) {
            return hit.clone();
        }
        let encoded = if path.is_empty() {
            String::new()
        } else {
            match self.source.read(Path::new(&path)) {
                Ok(contents) => STANDARD.encode(contents.as_bytes()),
                Err(e) => {
                    debug!(key, path = %path, error = %e, "Secret file unreadable; encoding empty");
                    String::new()
                }
            }
        };
        self.cache.insert(cache_key, encoded.clone());
        encoded
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::io::Write;

    use super::*;

    struct CountingSource {
        reads: Cell<usize>,
    }

    impl ContentSource for CountingSource {
        fn read(&self, path: &Path) -> io::Result<String> {
            self.reads.set(self.reads.get() + 1);
            std::fs::read_to_string(path)
        }
    }

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_encode_value() {
        let mut enc = SecretEncoder::new(values(&[("oauth_secret", "hunter2")]), false);
        assert_eq!(enc.encode_value("oauth_secret"), "aHVudGVyMg==");
        assert_eq!(enc.encode_value("absent"), "");
    }

    #[test]
    fn test_placeholder_in_config_only_mode() {
        let mut enc = SecretEncoder::new(BTreeMap::new(), true);
        assert_eq!(
            enc.encode_value("oauth_secret"),
            STANDARD.encode(CONFIG_PLACEHOLDER)
        );
    }

    #[test]
    fn test_encode_file_reads_once() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "-----BEGIN CERTIFICATE-----").unwrap();
        let path = file.path().display().to_string();
        let source = CountingSource {
            reads: Cell::new(0),
        };
        let mut enc = SecretEncoder::with_source(values(&[("tls_cert", &path)]), false, source);

        let first = enc.encode_file("tls_cert");
        let second = enc.encode_file("tls_cert");
        assert_eq!(first, second);
        assert_eq!(first, STANDARD.encode("-----BEGIN CERTIFICATE-----"));
        assert_eq!(enc.source.reads.get(), 1);
    }

    #[test]
    fn test_missing_file_encodes_empty() {
        let mut enc = SecretEncoder::new(
            values(&[("beats_ca", "/nonexistent/beats_ca.pem")]),
            false,
        );
        assert_eq!(enc.encode_file("beats_ca"), "");
        assert_eq!(enc.encode_file("unset"), "");
    }
}
