//! Post-processing filters.
//!
//! Filters are untrusted jq programs. They are only ever evaluated inside the
//! `jq-sandbox` worker process; the host talks to the worker through
//! [`WorkerJob`] and [`WorkerReply`] over stdin/stdout and kills it when the
//! time budget runs out.
//!
//! - [`engine`]: the evaluator, linked into the worker binary
//! - [`sandbox`]: the host-side runner that spawns and supervises workers

pub mod engine;
pub mod sandbox;

pub use sandbox::SandboxedFilterRunner;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;

/// One filter job sent to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerJob {
    /// jq program text.
    pub filter: String,
    /// Input document.
    pub input: Value,
}

/// What a worker reports back for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerReply {
    /// Exactly one non-null output.
    Success {
        /// The output value.
        value: Value,
    },
    /// No output, or a single `null`.
    NoResult,
    /// More than one output.
    MultipleResults,
    /// The program failed to parse or compile.
    Malformed {
        /// Number of load or compile errors.
        errors: usize,
    },
    /// The program raised an error while running.
    RuntimeError {
        /// Error description.
        message: String,
    },
}

/// Outcome of running a filter under supervision.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    /// The transformed value.
    Success(Value),
    /// The filter legitimately produced nothing.
    NoResult,
    /// The filter produced more than one value.
    MultipleResults,
    /// The filter text is not a valid program.
    Malformed(String),
    /// The filter failed at runtime.
    RuntimeError(String),
    /// The worker was killed after exceeding its time budget.
    Timeout,
    /// The worker died or answered with garbage.
    Crashed(String),
}

impl From<WorkerReply> for FilterOutcome {
    fn from(reply: WorkerReply) -> Self {
        match reply {
            WorkerReply::Success { value } => Self::Success(value),
            WorkerReply::NoResult => Self::NoResult,
            WorkerReply::MultipleResults => Self::MultipleResults,
            WorkerReply::Malformed { errors } => {
                Self::Malformed(format!("{errors} error(s) in filter"))
            }
            WorkerReply::RuntimeError { message } => Self::RuntimeError(message),
        }
    }
}

impl fmt::Display for FilterOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(_) => write!(f, "success"),
            Self::NoResult => write!(f, "no result"),
            Self::MultipleResults => write!(f, "multiple results"),
            Self::Malformed(reason) => write!(f, "malformed filter: {reason}"),
            Self::RuntimeError(reason) => write!(f, "runtime error: {reason}"),
            Self::Timeout => write!(f, "timed out"),
            Self::Crashed(reason) => write!(f, "worker crashed: {reason}"),
        }
    }
}

/// Runs filters against JSON input.
pub trait FilterRunner: Send + Sync {
    /// Apply `filter` to `input`.
    ///
    /// Never fails: every problem is a [`FilterOutcome`] variant.
    fn run(&self, input: &Value, filter: &str) -> impl Future<Output = FilterOutcome> + Send;
}
