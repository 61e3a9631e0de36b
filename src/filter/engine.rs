//! In-process jq evaluation.
//!
//! Only the `jq-sandbox` worker calls [`evaluate`]. Nothing here bounds CPU
//! time or memory; the supervising process does that by killing the worker.

use crate::filter::WorkerReply;
use jaq_core::load::{Arena, File, Loader};
use jaq_core::{Compiler, Ctx, RcIter};
use jaq_json::Val;
use serde_json::Value;

/// Evaluate `filter` against `input`.
///
/// At most two outputs are pulled from the program: one to return and one to
/// detect ambiguity.
#[must_use]
pub fn evaluate(filter: &str, input: Value) -> WorkerReply {
    let loader = Loader::new(jaq_std::defs().chain(jaq_json::defs()));
    let arena = Arena::default();
    let program = File {
        code: filter,
        path: (),
    };

    let modules = match loader.load(&arena, program) {
        Ok(modules) => modules,
        Err(errors) => return WorkerReply::Malformed {
            errors: errors.len(),
        },
    };
    let compiled = match Compiler::default()
        .with_funs(jaq_std::funs().chain(jaq_json::funs()))
        .compile(modules)
    {
        Ok(compiled) => compiled,
        Err(errors) => return WorkerReply::Malformed {
            errors: errors.len(),
        },
    };

    let inputs = RcIter::new(core::iter::empty());
    let mut outputs = compiled.run((Ctx::new([], &inputs), Val::from(input)));

    let first = match outputs.next() {
        None => return WorkerReply::NoResult,
        Some(Err(_)) => return runtime_error("filter raised an error"),
        Some(Ok(val)) => val,
    };
    match outputs.next() {
        None => {}
        Some(Ok(_)) => return WorkerReply::MultipleResults,
        Some(Err(_)) => return runtime_error("filter raised an error"),
    }

    // Values that are not representable as JSON (NaN, infinities) fail here.
    match serde_json::from_str::<Value>(&first.to_string()) {
        Ok(Value::Null) => WorkerReply::NoResult,
        Ok(value) => WorkerReply::Success { value },
        Err(_) => runtime_error("filter output is not representable as JSON"),
    }
}

fn runtime_error(message: &str) -> WorkerReply {
    WorkerReply::RuntimeError {
        message: message.to_string(),
    }
}
