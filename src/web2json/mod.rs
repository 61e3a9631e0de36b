//! Web2Json attestations.
//!
//! A Web2Json request names a public HTTPS endpoint, a jq filter and an ABI
//! signature. Verification fetches the endpoint, filters the JSON it returns
//! and ABI-encodes the result.
//!
//! - [`url_guard`]: SSRF checks on the source URL
//! - [`fetcher`]: bounded HTTP fetch pinned to the validated address
//! - [`verifier`]: the stage sequence and its status mapping

pub mod fetcher;
pub mod url_guard;
pub mod verifier;

pub use fetcher::{FetchError, FetchRequest, FetchedSource, HttpFetcher, SourceFetcher};
pub use url_guard::{HostResolver, StaticResolver, SystemResolver, UrlGuard, UrlRejection, ValidatedUrl};
pub use verifier::Web2JsonVerifier;
