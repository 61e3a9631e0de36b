//! Command-line interface definition.

use attestation_verifier::config::default_config_path;
use attestation_verifier::VerifierConfig;
use clap::Parser;
use std::path::PathBuf;

/// Verify one attestation request and print the outcome as JSON.
#[derive(Parser, Debug)]
#[command(name = "attestation-verifier")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Request file (JSON). Reads stdin when absent or `-`.
    pub request: Option<PathBuf>,

    /// Path to configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Indexer snapshot (JSON) serving payment non-existence requests.
    #[arg(long, env = "ATTESTATION_INDEXER_SNAPSHOT")]
    pub indexer_snapshot: Option<PathBuf>,

    /// Path to the jq-sandbox worker binary.
    #[arg(long, env = "ATTESTATION_JQ_WORKER")]
    pub jq_worker: Option<PathBuf>,

    /// Source fetch timeout in milliseconds.
    #[arg(long, env = "ATTESTATION_FETCH_TIMEOUT_MS")]
    pub fetch_timeout_ms: Option<u64>,

    /// Filter timeout in milliseconds.
    #[arg(long, env = "ATTESTATION_FILTER_TIMEOUT_MS")]
    pub filter_timeout_ms: Option<u64>,

    /// Only allow these hostnames and their subdomains.
    #[arg(long = "allow-host")]
    pub allowed_hostnames: Vec<String>,

    /// Reject these hostnames and their subdomains.
    #[arg(long = "block-host")]
    pub blocked_hostnames: Vec<String>,

    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, env = "ATTESTATION_LOG_JSON")]
    pub log_json: bool,

    /// Pretty-print the outcome.
    #[arg(long)]
    pub pretty: bool,

    /// Write the effective configuration to this path and exit.
    #[arg(long)]
    pub write_config: Option<PathBuf>,
}

impl Cli {
    /// Build the effective configuration.
    ///
    /// An explicit `--config` must exist; otherwise the default location is
    /// used when present.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file cannot be loaded.
    pub fn to_config(&self) -> color_eyre::Result<VerifierConfig> {
        // Start with default config or load from file
        let mut config = match &self.config {
            Some(path) => VerifierConfig::from_file(path)?,
            None => {
                let path = default_config_path();
                if path.is_file() {
                    VerifierConfig::from_file(&path)?
                } else {
                    VerifierConfig::default()
                }
            }
        };

        // Override with CLI arguments
        if let Some(path) = &self.indexer_snapshot {
            config.indexer.snapshot_path = Some(path.clone());
        }
        if let Some(path) = &self.jq_worker {
            config.filter.worker_path = Some(path.clone());
        }
        if let Some(ms) = self.fetch_timeout_ms {
            config.web2json.fetch_timeout_ms = ms;
        }
        if let Some(ms) = self.filter_timeout_ms {
            config.filter.timeout_ms = ms;
        }
        config
            .web2json
            .allowed_hostnames
            .extend(self.allowed_hostnames.iter().cloned());
        config
            .web2json
            .blocked_hostnames
            .extend(self.blocked_hostnames.iter().cloned());
        config.log_level.clone_from(&self.log_level);

        Ok(config)
    }
}
