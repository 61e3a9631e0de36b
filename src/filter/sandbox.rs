//! Subprocess filter runner.
//!
//! Every run spawns a fresh `jq-sandbox` worker, writes one [`WorkerJob`] to
//! its stdin and reads one [`WorkerReply`] from its stdout. The worker is
//! killed when the time budget expires or when the run future is dropped, so
//! a runaway filter never outlives the call that started it.

use crate::config::FilterConfig;
use crate::error::{Error, Result};
use crate::filter::{FilterOutcome, FilterRunner, WorkerJob, WorkerReply};
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// File name of the worker binary.
pub const WORKER_BINARY: &str = "jq-sandbox";

/// Runs each filter in its own short-lived worker process.
#[derive(Debug, Clone)]
pub struct SandboxedFilterRunner {
    worker: PathBuf,
    timeout: Duration,
    max_output_bytes: usize,
}

impl SandboxedFilterRunner {
    /// Create a runner from configuration.
    ///
    /// Uses `worker_path` when set, otherwise looks for the worker next to
    /// the current executable.
    ///
    /// # Errors
    ///
    /// Returns an error if no worker binary can be found.
    pub fn new(config: &FilterConfig) -> Result<Self> {
        let worker = match &config.worker_path {
            Some(path) => path.clone(),
            None => locate_worker()?,
        };
        Ok(Self::with_worker(worker, config))
    }

    /// Create a runner using an explicit worker binary.
    #[must_use]
    pub fn with_worker(worker: impl Into<PathBuf>, config: &FilterConfig) -> Self {
        Self {
            worker: worker.into(),
            timeout: config.timeout(),
            max_output_bytes: config.max_output_bytes,
        }
    }

    /// Path of the worker binary.
    #[must_use]
    pub fn worker(&self) -> &Path {
        &self.worker
    }

    fn spawn(&self) -> io::Result<Child> {
        Command::new(&self.worker)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
    }

    fn decode(&self, status: ExitStatus, output: &[u8]) -> FilterOutcome {
        if output.len() > self.max_output_bytes {
            return FilterOutcome::RuntimeError(format!(
                "filter output exceeds {} bytes",
                self.max_output_bytes
            ));
        }
        match serde_json::from_slice::<WorkerReply>(output) {
            Ok(reply) => reply.into(),
            Err(_) => FilterOutcome::Crashed(format!("worker exited with {status}")),
        }
    }
}

impl FilterRunner for SandboxedFilterRunner {
    async fn run(&self, input: &Value, filter: &str) -> FilterOutcome {
        let job = WorkerJob {
            filter: filter.to_string(),
            input: input.clone(),
        };
        let job = match serde_json::to_vec(&job) {
            Ok(job) => job,
            Err(e) => return FilterOutcome::Crashed(format!("failed to encode job: {e}")),
        };

        let child = match self.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn filter worker {}: {e}", self.worker.display());
                return FilterOutcome::Crashed(format!("failed to spawn worker: {e}"));
            }
        };

        // Dropping the exchange on timeout drops the child, which kills it.
        match tokio::time::timeout(self.timeout, exchange(child, job, self.max_output_bytes))
            .await
        {
            Ok(Ok((status, output))) => {
                let outcome = self.decode(status, &output);
                debug!("Filter finished: {outcome}");
                outcome
            }
            Ok(Err(e)) => {
                warn!("Filter worker I/O failed: {e}");
                FilterOutcome::Crashed(e.to_string())
            }
            Err(_) => {
                warn!("Filter worker killed after {:?}", self.timeout);
                FilterOutcome::Timeout
            }
        }
    }
}

/// Feed the job to the worker and collect at most `limit + 1` bytes of its
/// output.
async fn exchange(
    mut child: Child,
    job: Vec<u8>,
    limit: usize,
) -> io::Result<(ExitStatus, Vec<u8>)> {
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::other("worker stdin unavailable"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("worker stdout unavailable"))?;

    let write = async move {
        stdin.write_all(&job).await?;
        stdin.shutdown().await
    };
    let mut output = Vec::new();
    let read_limit = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let read = async { stdout.take(read_limit).read_to_end(&mut output).await };

    let (written, read) = tokio::join!(write, read);
    if let Err(e) = written {
        // A worker that exits early closes its stdin; its output decides.
        debug!("Filter worker closed stdin early: {e}");
    }
    read?;

    let status = child.wait().await?;
    Ok((status, output))
}

/// Find the worker binary next to the running executable.
///
/// Test binaries live one level deeper (`target/<profile>/deps`), so the
/// parent directory is tried as well.
fn locate_worker() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let name = format!("{WORKER_BINARY}{}", std::env::consts::EXE_SUFFIX);
    exe.ancestors()
        .skip(1)
        .take(2)
        .map(|dir| dir.join(&name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| Error::Sandbox(format!("{name} not found next to {}", exe.display())))
}
