//! Web2Json stage sequence.
//!
//! Stages run strictly in order and the first failure decides the status:
//!
//! ```text
//! URL ─► method ─► headers ─► query ─► body ─► filter length
//!   ─► fetch ─► parse JSON ─► filter ─► ABI signature ─► encode ─► VALID
//! ```
//!
//! Everything before the fetch is local, so a malformed request never causes
//! network traffic.

use crate::abi::{AbiError, AbiSignature};
use crate::config::{VerifierConfig, Web2JsonConfig};
use crate::error::Result;
use crate::filter::{FilterOutcome, FilterRunner, SandboxedFilterRunner};
use crate::types::{AttestationStatus, Web2JsonRequestBody, Web2JsonResponseBody};
use crate::web2json::fetcher::{FetchError, FetchRequest, HttpFetcher, SourceFetcher};
use crate::web2json::url_guard::{HostResolver, SystemResolver, UrlGuard};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

type StageResult<T> = std::result::Result<T, AttestationStatus>;

/// Verifies Web2Json request bodies.
pub struct Web2JsonVerifier<R = SystemResolver, F = HttpFetcher, J = SandboxedFilterRunner> {
    config: Web2JsonConfig,
    guard: UrlGuard<R>,
    fetcher: F,
    filter: J,
}

impl Web2JsonVerifier {
    /// Create a verifier with DNS resolution, a real HTTP client and the
    /// sandboxed filter runner.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter worker cannot be located.
    pub fn new(config: &VerifierConfig) -> Result<Self> {
        Ok(Self::with_components(
            &config.web2json,
            UrlGuard::new(&config.web2json),
            HttpFetcher::new(&config.web2json),
            SandboxedFilterRunner::new(&config.filter)?,
        ))
    }
}

impl<R: HostResolver, F: SourceFetcher, J: FilterRunner> Web2JsonVerifier<R, F, J> {
    /// Assemble a verifier from its parts.
    pub fn with_components(
        config: &Web2JsonConfig,
        guard: UrlGuard<R>,
        fetcher: F,
        filter: J,
    ) -> Self {
        Self {
            config: config.clone(),
            guard,
            fetcher,
            filter,
        }
    }

    /// Run every stage for `body`.
    ///
    /// # Errors
    ///
    /// Returns the status of the first failing stage.
    pub async fn verify(
        &self,
        body: &Web2JsonRequestBody,
    ) -> std::result::Result<Web2JsonResponseBody, AttestationStatus> {
        let url = self.guard.validate(&body.url).await.map_err(|rejection| {
            warn!("Rejected source URL: {rejection}");
            AttestationStatus::InvalidSourceUrl
        })?;

        let method = parse_method(&body.http_method, &self.config.allowed_http_methods)?;
        let headers = parse_headers(&body.headers)?;
        let query = parse_query(&body.query_params)?;
        let request_body = parse_body(&body.body)?;

        if body.post_process_jq.len() > self.config.max_filter_length {
            debug!(
                "Filter of {} bytes exceeds limit {}",
                body.post_process_jq.len(),
                self.config.max_filter_length
            );
            return Err(AttestationStatus::InvalidJqFilter);
        }

        let request = FetchRequest {
            url,
            body: if method == Method::GET {
                None
            } else {
                request_body
            },
            method,
            headers,
            query,
        };
        let source = self
            .fetcher
            .fetch(&request)
            .await
            .map_err(|e| fetch_status(&e))?;

        let document: Value = serde_json::from_slice(&source.body).map_err(|e| {
            debug!("Source declared {} but sent invalid JSON: {e}", source.content_type);
            AttestationStatus::InvalidResponseContentType
        })?;

        let filtered = match self.filter.run(&document, &body.post_process_jq).await {
            FilterOutcome::Success(value) => value,
            outcome @ (FilterOutcome::NoResult
            | FilterOutcome::MultipleResults
            | FilterOutcome::Malformed(_)
            | FilterOutcome::RuntimeError(_)
            | FilterOutcome::Timeout
            | FilterOutcome::Crashed(_)) => {
                debug!("Filter rejected: {outcome}");
                return Err(AttestationStatus::InvalidJqFilter);
            }
        };

        if body.abi_signature.len() > self.config.max_abi_signature_length {
            return Err(AttestationStatus::InvalidAbiSignature);
        }
        let signature = AbiSignature::parse(&body.abi_signature).map_err(|e| abi_status(&e))?;
        let abi_encoded_data = signature.encode(&filtered).map_err(|e| abi_status(&e))?;

        debug!(
            "Encoded {} bytes as {}",
            abi_encoded_data.len(),
            signature.type_name()
        );
        Ok(Web2JsonResponseBody { abi_encoded_data })
    }
}

fn fetch_status(error: &FetchError) -> AttestationStatus {
    match error {
        FetchError::ContentType(_) => AttestationStatus::InvalidResponseContentType,
        FetchError::Timeout(_)
        | FetchError::HttpStatus(_)
        | FetchError::TooLarge(_)
        | FetchError::Network(_) => AttestationStatus::InvalidFetchError,
    }
}

fn abi_status(error: &AbiError) -> AttestationStatus {
    debug!("{error}");
    match error {
        AbiError::Signature(_) => AttestationStatus::InvalidAbiSignature,
        AbiError::Encode(_) => AttestationStatus::InvalidEncodeError,
    }
}

/// Match `method` case-insensitively against the allowed set.
fn parse_method(method: &str, allowed: &[String]) -> StageResult<Method> {
    if !allowed.iter().any(|m| m.eq_ignore_ascii_case(method)) {
        return Err(AttestationStatus::InvalidHttpMethod);
    }
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| AttestationStatus::InvalidHttpMethod)
}

/// Headers are a JSON object of strings. Empty text means no headers.
fn parse_headers(text: &str) -> StageResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    if text.trim().is_empty() {
        return Ok(headers);
    }
    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(text) else {
        return Err(AttestationStatus::InvalidHeaders);
    };
    for (name, value) in fields {
        let Value::String(value) = value else {
            return Err(AttestationStatus::InvalidHeaders);
        };
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| AttestationStatus::InvalidHeaders)?;
        let value =
            HeaderValue::from_str(&value).map_err(|_| AttestationStatus::InvalidHeaders)?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// Query parameters are a JSON object of scalars. Empty text means none.
fn parse_query(text: &str) -> StageResult<Vec<(String, String)>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(text) else {
        return Err(AttestationStatus::InvalidQueryParams);
    };
    fields
        .into_iter()
        .map(|(name, value)| match value {
            Value::String(s) => Ok((name, s)),
            Value::Number(n) => Ok((name, n.to_string())),
            Value::Bool(b) => Ok((name, b.to_string())),
            _ => Err(AttestationStatus::InvalidQueryParams),
        })
        .collect()
}

/// Any JSON value. Empty text means no body.
fn parse_body(text: &str) -> StageResult<Option<Value>> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(text)
        .map(Some)
        .map_err(|_| AttestationStatus::InvalidBody)
}
