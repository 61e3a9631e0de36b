//! Bounded HTTP fetcher for Web2Json sources.
//!
//! A fetch never follows redirects, never reads more than the configured
//! number of bytes, and never outlives its timeout. The connection goes to
//! the address the URL guard validated, not to a fresh DNS answer.

use crate::config::Web2JsonConfig;
use crate::web2json::url_guard::ValidatedUrl;
use bytes::{Bytes, BytesMut};
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{redirect, Method};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Everything needed to issue one source request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Validated, normalized URL.
    pub url: ValidatedUrl,
    /// HTTP method.
    pub method: Method,
    /// Request headers.
    pub headers: HeaderMap,
    /// Query parameters appended to the URL.
    pub query: Vec<(String, String)>,
    /// JSON request body.
    pub body: Option<serde_json::Value>,
}

/// A response that passed status, content-type and size checks.
#[derive(Debug, Clone)]
pub struct FetchedSource {
    /// HTTP status code.
    pub status: u16,
    /// Declared content type.
    pub content_type: String,
    /// Raw body bytes; not parsed here.
    pub body: Bytes,
}

/// Why a fetch failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The whole request did not finish in time.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// Non-success status, redirects included.
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    /// Content type missing or not JSON.
    #[error("content type is not JSON: {}", .0.as_deref().unwrap_or("<none>"))]
    ContentType(Option<String>),

    /// Body exceeded the size cap.
    #[error("response larger than {0} bytes")]
    TooLarge(usize),

    /// Connection, TLS or protocol failure.
    #[error("network error: {0}")]
    Network(String),
}

/// Issues source requests.
pub trait SourceFetcher: Send + Sync {
    /// Fetch `request`, returning the raw JSON body on success.
    fn fetch(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<FetchedSource, FetchError>> + Send;
}

/// `reqwest`-backed fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    timeout: Duration,
    max_bytes: usize,
    user_agent: String,
}

impl HttpFetcher {
    /// Create a fetcher from configuration.
    #[must_use]
    pub fn new(config: &Web2JsonConfig) -> Self {
        Self {
            timeout: config.fetch_timeout(),
            max_bytes: config.max_response_bytes,
            user_agent: config.user_agent.clone(),
        }
    }

    fn client_for(&self, url: &ValidatedUrl) -> Result<reqwest::Client, FetchError> {
        let mut builder = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .no_proxy();
        if !url.is_ip_literal() {
            // Every lookup answers with the validated address.
            builder = builder.dns_resolver(Arc::new(PinnedResolver(url.address())));
        }
        builder
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build client: {e}")))
    }

    async fn fetch_inner(&self, request: &FetchRequest) -> Result<FetchedSource, FetchError> {
        let client = self.client_for(&request.url)?;

        let mut builder = client
            .request(request.method.clone(), request.url.url().clone())
            .headers(request.headers.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let mut response = builder.send().await.map_err(|e| self.map_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = match content_type {
            Some(ct) if is_json_content_type(&ct) => ct,
            other => return Err(FetchError::ContentType(other)),
        };

        let declared_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared_length.is_some_and(|len| len > self.max_bytes) {
            return Err(FetchError::TooLarge(self.max_bytes));
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.map_error(&e))? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(FetchError::TooLarge(self.max_bytes));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchedSource {
            status: status.as_u16(),
            content_type,
            body: body.freeze(),
        })
    }

    fn map_error(&self, error: &reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Network(error.to_string())
        }
    }
}

/// Resolver that only knows the address the URL guard accepted.
#[derive(Debug, Clone, Copy)]
struct PinnedResolver(SocketAddr);

impl Resolve for PinnedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let address = self.0;
        debug!("Resolving {} to pinned {address}", name.as_str());
        Box::pin(async move {
            let addrs: Addrs = Box::new(std::iter::once(address));
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedSource, FetchError> {
        debug!("Fetching {} {}", request.method, request.url.as_str());

        // The client timeout covers the request; this one also covers the
        // body stream and drops the connection when it fires.
        let result = match tokio::time::timeout(self.timeout, self.fetch_inner(request)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        };

        match &result {
            Ok(source) => debug!(
                "Fetched {} bytes from {}",
                source.body.len(),
                request.url.as_str()
            ),
            Err(e) => warn!("Fetch of {} failed: {e}", request.url.as_str()),
        }
        result
    }
}

/// True for `application/json` and any `+json` structured syntax suffix.
#[must_use]
pub fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json"
        || (essence.starts_with("application/") && essence.ends_with("+json"))
}
