//! Configuration for attestation-verifier.
//!
//! Loaded once at startup and never mutated afterwards; each component takes
//! the section it needs by reference or clone.

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level verifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Web2Json settings.
    #[serde(default)]
    pub web2json: Web2JsonConfig,

    /// Filter sandbox settings.
    #[serde(default)]
    pub filter: FilterConfig,

    /// Indexer settings for the payment non-existence path.
    #[serde(default)]
    pub indexer: IndexerConfig,

    /// Source this instance verifies payment non-existence for.
    #[serde(default = "default_source_id")]
    pub source_id: B256,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Limits and lists for fetching web sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Web2JsonConfig {
    /// Maximum URL length, before and after sanitizing.
    #[serde(default = "default_max_url_length")]
    pub max_url_length: usize,

    /// Maximum filter expression length.
    #[serde(default = "default_max_filter_length")]
    pub max_filter_length: usize,

    /// Maximum ABI signature length.
    #[serde(default = "default_max_abi_signature_length")]
    pub max_abi_signature_length: usize,

    /// Maximum response body size in bytes.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,

    /// Whole-request fetch timeout in milliseconds.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// HTTP methods a request may use.
    #[serde(default = "default_allowed_http_methods")]
    pub allowed_http_methods: Vec<String>,

    /// Hostnames that are always rejected (subdomains included).
    #[serde(default)]
    pub blocked_hostnames: Vec<String>,

    /// If non-empty, only these hostnames (and their subdomains) are allowed.
    #[serde(default)]
    pub allowed_hostnames: Vec<String>,

    /// User agent sent with every fetch.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Filter sandbox configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Wall-clock budget of one filter run in milliseconds.
    #[serde(default = "default_filter_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum size of the worker's output in bytes.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Path to the `jq-sandbox` worker. Defaults to the binary next to the
    /// current executable.
    #[serde(default)]
    pub worker_path: Option<PathBuf>,
}

/// Indexer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Timeout for a single indexer query in milliseconds.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// JSON snapshot served by the in-memory indexer.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            web2json: Web2JsonConfig::default(),
            filter: FilterConfig::default(),
            indexer: IndexerConfig::default(),
            source_id: default_source_id(),
            log_level: default_log_level(),
        }
    }
}

impl Default for Web2JsonConfig {
    fn default() -> Self {
        Self {
            max_url_length: default_max_url_length(),
            max_filter_length: default_max_filter_length(),
            max_abi_signature_length: default_max_abi_signature_length(),
            max_response_bytes: default_max_response_bytes(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            allowed_http_methods: default_allowed_http_methods(),
            blocked_hostnames: Vec::new(),
            allowed_hostnames: Vec::new(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_filter_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
            worker_path: None,
        }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: default_query_timeout_ms(),
            snapshot_path: None,
        }
    }
}

impl Web2JsonConfig {
    /// Fetch timeout as a `Duration`.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl FilterConfig {
    /// Filter timeout as a `Duration`.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl IndexerConfig {
    /// Query timeout as a `Duration`.
    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

fn default_source_id() -> B256 {
    crate::types::source::test_btc()
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_max_url_length() -> usize {
    4096
}

const fn default_max_filter_length() -> usize {
    5000
}

const fn default_max_abi_signature_length() -> usize {
    5000
}

const fn default_max_response_bytes() -> usize {
    1024 * 1024 // 1 MiB
}

const fn default_fetch_timeout_ms() -> u64 {
    1000
}

fn default_allowed_http_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "PATCH", "DELETE"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_user_agent() -> String {
    format!("attestation-verifier/{}", env!("CARGO_PKG_VERSION"))
}

const fn default_filter_timeout_ms() -> u64 {
    300
}

const fn default_max_output_bytes() -> usize {
    1024 * 1024
}

const fn default_query_timeout_ms() -> u64 {
    5000
}

/// Default location of the configuration file.
#[must_use]
pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "attestation-verifier")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("attestation-verifier.toml"))
}

impl VerifierConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VerifierConfig::default();
        assert_eq!(config.web2json.max_response_bytes, 1_048_576);
        assert_eq!(config.web2json.fetch_timeout(), Duration::from_secs(1));
        assert_eq!(config.filter.timeout(), Duration::from_millis(300));
        assert!(config.web2json.allowed_hostnames.is_empty());
        assert!(config
            .web2json
            .allowed_http_methods
            .contains(&"GET".to_string()));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[web2json]\nblocked_hostnames = [\"metadata.google.internal\"]\n\n[filter]\ntimeout_ms = 50\n",
        )
        .unwrap();

        let config = VerifierConfig::from_file(&path).unwrap();
        assert_eq!(
            config.web2json.blocked_hostnames,
            vec!["metadata.google.internal".to_string()]
        );
        assert_eq!(config.filter.timeout_ms, 50);
        assert_eq!(config.web2json.max_url_length, 4096);
        assert_eq!(config.source_id, crate::types::source::test_btc());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = VerifierConfig::default();
        config.web2json.allowed_hostnames = vec!["example.com".to_string()];
        config.to_file(&path).unwrap();

        let loaded = VerifierConfig::from_file(&path).unwrap();
        assert_eq!(loaded.web2json.allowed_hostnames, config.web2json.allowed_hostnames);
        assert_eq!(loaded.source_id, config.source_id);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "web2json = 3").unwrap();
        assert!(matches!(
            VerifierConfig::from_file(&path),
            Err(crate::Error::Config(_))
        ));
    }
}
