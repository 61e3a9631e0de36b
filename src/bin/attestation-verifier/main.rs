//! attestation-verifier CLI entry point.

mod cli;

use attestation_verifier::payment::InMemoryIndexer;
use attestation_verifier::{AttestationVerifier, RawAttestationRequest};
use clap::Parser;
use cli::Cli;
use std::io::Read;
use std::path::Path;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for the outcome
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }

    info!("attestation-verifier v{}", env!("CARGO_PKG_VERSION"));

    // Build configuration
    let config = cli.to_config()?;
    if let Some(path) = &cli.write_config {
        config.to_file(path)?;
        info!("Configuration written to {}", path.display());
        return Ok(());
    }

    // Build the verifier
    let indexer = config
        .indexer
        .snapshot_path
        .as_deref()
        .map(InMemoryIndexer::from_file)
        .transpose()?;
    let verifier = AttestationVerifier::new(&config, indexer)?;

    // Verify
    let request = read_request(cli.request.as_deref())?;
    let outcome = verifier.verify_raw(&request).await?;

    let output = if cli.pretty {
        serde_json::to_string_pretty(&outcome)?
    } else {
        serde_json::to_string(&outcome)?
    };
    println!("{output}");
    Ok(())
}

fn read_request(path: Option<&Path>) -> color_eyre::Result<RawAttestationRequest> {
    let content = match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)?,
        _ => {
            let mut content = String::new();
            std::io::stdin().read_to_string(&mut content)?;
            content
        }
    };
    Ok(serde_json::from_str(&content)?)
}
