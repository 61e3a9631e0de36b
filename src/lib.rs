//! # attestation-verifier
//!
//! Deterministic verification of oracle attestation requests.
//!
//! Two attestation types are supported:
//!
//! - **Web2Json**: fetch JSON from a public HTTPS endpoint, transform it with
//!   a jq filter evaluated in a sandboxed worker process, and ABI-encode the
//!   result
//! - **`ReferencedPaymentNonexistence`**: prove, against a chain indexer, that
//!   no payment with a given reference reached a destination within a block
//!   window
//!
//! Every verification returns a [`VerificationOutcome`]: a status, and for
//! valid requests the typed response plus its message integrity code.
//!
//! ## Security
//!
//! Source URLs are checked for SSRF before any connection is made: only
//! `https`, no private, loopback or otherwise non-public addresses in any
//! textual encoding, and the fetch connects to the address that was checked.
//! Redirects are never followed. Filters run in a separate process that is
//! killed on timeout.
//!
//! ## Example
//!
//! ```rust,ignore
//! use attestation_verifier::{AttestationVerifier, VerifierConfig};
//!
//! let config = VerifierConfig::default();
//! let verifier = AttestationVerifier::new(&config, None)?;
//! let outcome = verifier.verify_raw(&raw_request).await?;
//! println!("{}", outcome.status);
//! ```

pub mod abi;
pub mod config;
pub mod error;
pub mod filter;
pub mod mic;
pub mod payment;
pub mod types;
pub mod validation;
pub mod verifier;
pub mod web2json;

pub use config::VerifierConfig;
pub use error::{Error, Result};
pub use types::{
    AttestationKind, AttestationRequest, AttestationResponse, AttestationStatus,
    VerificationOutcome,
};
pub use validation::{validate_request, FieldError, RawAttestationRequest};
pub use verifier::AttestationVerifier;
