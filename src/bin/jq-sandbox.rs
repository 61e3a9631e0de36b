//! Filter worker process.
//!
//! Reads one job as JSON from stdin, evaluates it and writes one reply as
//! JSON to stdout. Diagnostics go to stderr. The supervising process kills
//! the worker when its time budget runs out.

use attestation_verifier::filter::{engine, WorkerJob};
use std::io::{Read, Write};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    // stdout carries the reply, so logs go to stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let job: WorkerJob = serde_json::from_str(&input)?;
    debug!("Evaluating filter of {} bytes", job.filter.len());

    let reply = engine::evaluate(&job.filter, job.input);

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, &reply)?;
    stdout.flush()?;
    Ok(())
}
