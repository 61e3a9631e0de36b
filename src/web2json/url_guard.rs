//! Outbound URL validation for SSRF prevention.
//!
//! Every Web2Json source URL passes through [`UrlGuard::validate`] before any
//! network I/O. The guard:
//!
//! 1. bounds the raw length,
//! 2. requires `https`,
//! 3. sanitizes control and invisible characters and bounds the length again,
//! 4. classifies IP-literal hosts in any textual base (dotted decimal, octal,
//!    hex, single 32-bit integer, IPv6, IPv4-mapped IPv6) after normalizing
//!    them to their canonical address,
//! 5. resolves hostnames and rejects any non-public answer,
//! 6. applies the allowed and blocked hostname lists.
//!
//! The accepted [`ValidatedUrl`] carries the lower-cased URL and the address
//! that passed the checks. The fetcher connects to exactly that address, so a
//! second DNS answer (rebinding) is never consulted.

use crate::config::Web2JsonConfig;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use thiserror::Error;
use tracing::{debug, warn};
use url::{Host, Url};

/// Upper bound on resolved addresses inspected per host.
const MAX_RESOLVED_ADDRS: usize = 16;

/// Why a URL was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlRejection {
    /// Raw input longer than allowed.
    #[error("URL too long: {length} > {max}")]
    TooLong {
        /// Observed length.
        length: usize,
        /// Configured limit.
        max: usize,
    },

    /// Sanitized URL longer than allowed.
    #[error("sanitized URL too long: {length} > {max}")]
    SanitizedTooLong {
        /// Observed length.
        length: usize,
        /// Configured limit.
        max: usize,
    },

    /// Not a parseable URL.
    #[error("malformed URL: {0}")]
    Malformed(String),

    /// Scheme other than `https`.
    #[error("invalid protocol: {0}")]
    InvalidProtocol(String),

    /// URL carries a username or password.
    #[error("credentials in URL are not allowed")]
    Credentials,

    /// URL has no host.
    #[error("missing host")]
    MissingHost,

    /// Host is or resolves to a non-public address.
    #[error("blocked IP: {addr}{}", from_suffix(.host))]
    BlockedIp {
        /// Offending address.
        addr: IpAddr,
        /// Hostname it was resolved from, if any.
        host: Option<String>,
    },

    /// Hostname did not resolve.
    #[error("DNS resolution failed for {0}")]
    DnsResolutionFailed(String),

    /// Allowed list is set and the hostname is not on it.
    #[error("hostname not in allowed list: {0}")]
    HostnameNotAllowed(String),

    /// Hostname is on the blocked list.
    #[error("hostname blocked: {0}")]
    HostnameBlocked(String),
}

fn from_suffix(host: &Option<String>) -> String {
    host.as_ref().map(|h| format!(" from {h}")).unwrap_or_default()
}

/// A URL that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUrl {
    url: Url,
    normalized: String,
    host: String,
    address: SocketAddr,
    is_ip_literal: bool,
    sanitized_length: usize,
}

impl ValidatedUrl {
    /// The normalized (lower-cased, sanitized) URL string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    /// The parsed normalized URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Host as it appears in the URL (without IPv6 brackets).
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The address that was validated; the fetcher must connect to it.
    #[must_use]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// True if the host was an IP literal rather than a name.
    #[must_use]
    pub fn is_ip_literal(&self) -> bool {
        self.is_ip_literal
    }

    /// Length of the sanitized URL.
    #[must_use]
    pub fn sanitized_length(&self) -> usize {
        self.sanitized_length
    }

    /// Build a validated URL pointing at a local test server.
    #[cfg(test)]
    pub(crate) fn for_test(raw: &str, address: SocketAddr) -> Self {
        #[allow(clippy::unwrap_used)]
        let url = Url::parse(raw).unwrap();
        let is_ip_literal = !matches!(url.host(), Some(Host::Domain(_)));
        Self {
            normalized: url.to_string(),
            host: url.host_str().unwrap_or_default().to_string(),
            url,
            address,
            is_ip_literal,
            sanitized_length: raw.len(),
        }
    }
}

/// Resolves hostnames to addresses.
pub trait HostResolver: Send + Sync {
    /// Resolve `host` to socket addresses for `port`.
    fn resolve(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = io::Result<Vec<SocketAddr>>> + Send;
}

/// Resolver backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.take(MAX_RESOLVED_ADDRS).collect())
    }
}

/// Resolver answering from a fixed table. Unknown names fail to resolve.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    table: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an answer for `host`.
    #[must_use]
    pub fn with_host(mut self, host: &str, addrs: &[IpAddr]) -> Self {
        self.table
            .entry(host.to_ascii_lowercase())
            .or_default()
            .extend_from_slice(addrs);
        self
    }
}

impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        self.table
            .get(&host.to_ascii_lowercase())
            .map(|addrs| addrs.iter().map(|ip| SocketAddr::new(*ip, port)).collect())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such host"))
    }
}

/// URL security validator.
#[derive(Debug, Clone)]
pub struct UrlGuard<R = SystemResolver> {
    resolver: R,
    max_length: usize,
    allowed_hostnames: Vec<String>,
    blocked_hostnames: Vec<String>,
}

impl UrlGuard<SystemResolver> {
    /// Create a guard using the system resolver.
    #[must_use]
    pub fn new(config: &Web2JsonConfig) -> Self {
        Self::with_resolver(config, SystemResolver)
    }
}

impl<R: HostResolver> UrlGuard<R> {
    /// Create a guard with an explicit resolver.
    #[must_use]
    pub fn with_resolver(config: &Web2JsonConfig, resolver: R) -> Self {
        Self {
            resolver,
            max_length: config.max_url_length,
            allowed_hostnames: normalize_list(&config.allowed_hostnames),
            blocked_hostnames: normalize_list(&config.blocked_hostnames),
        }
    }

    /// Validate `raw` and return its normalized form.
    ///
    /// # Errors
    ///
    /// Returns the first [`UrlRejection`] that applies.
    pub async fn validate(&self, raw: &str) -> Result<ValidatedUrl, UrlRejection> {
        let result = self.validate_inner(raw).await;
        match &result {
            Ok(validated) => debug!(
                "URL accepted: {} -> {}",
                validated.as_str(),
                validated.address()
            ),
            Err(rejection) => warn!("URL rejected: {rejection}"),
        }
        result
    }

    async fn validate_inner(&self, raw: &str) -> Result<ValidatedUrl, UrlRejection> {
        if raw.len() > self.max_length {
            return Err(UrlRejection::TooLong {
                length: raw.len(),
                max: self.max_length,
            });
        }

        require_https(&parse(raw)?)?;

        let sanitized = sanitize(raw);
        if sanitized.len() > self.max_length {
            return Err(UrlRejection::SanitizedTooLong {
                length: sanitized.len(),
                max: self.max_length,
            });
        }

        // Lower-case the canonical serialization, then parse once more so
        // the string we return is exactly what the fetcher will use.
        let sanitized_url = parse(&sanitized)?;
        require_https(&sanitized_url)?;
        let mut normalized = sanitized_url.as_str().to_lowercase();
        let mut url = parse(&normalized)?;
        require_https(&url)?;

        if !url.username().is_empty() || url.password().is_some() {
            return Err(UrlRejection::Credentials);
        }

        let port = url.port_or_known_default().unwrap_or(443);
        let (host, address, is_ip_literal) = match url.host() {
            None => return Err(UrlRejection::MissingHost),
            Some(Host::Ipv4(ip)) => {
                let ip = IpAddr::V4(ip);
                check_ip(ip, None)?;
                (ip.to_string(), SocketAddr::new(ip, port), true)
            }
            Some(Host::Ipv6(ip)) => {
                let ip = IpAddr::V6(ip);
                check_ip(ip, None)?;
                (ip.to_string(), SocketAddr::new(ip, port), true)
            }
            Some(Host::Domain(name)) => {
                let name = name.trim_end_matches('.').to_string();
                if name.is_empty() {
                    return Err(UrlRejection::MissingHost);
                }
                if let Some(ip) = parse_ipv4_literal(&name) {
                    let ip = IpAddr::V4(ip);
                    check_ip(ip, None)?;
                    (name, SocketAddr::new(ip, port), true)
                } else {
                    let address = self.resolve_public(&name, port).await?;
                    (name, address, false)
                }
            }
        };

        // The URL must name exactly the host the address was checked for.
        if url.host_str().is_some_and(|h| h.ends_with('.')) {
            url.set_host(Some(&host))
                .map_err(|e| UrlRejection::Malformed(e.to_string()))?;
            normalized = url.as_str().to_string();
        }

        if !self.allowed_hostnames.is_empty()
            && !self
                .allowed_hostnames
                .iter()
                .any(|allowed| hostname_matches(&host, allowed))
        {
            return Err(UrlRejection::HostnameNotAllowed(host));
        }

        if self
            .blocked_hostnames
            .iter()
            .any(|blocked| hostname_matches(&host, blocked))
        {
            return Err(UrlRejection::HostnameBlocked(host));
        }

        Ok(ValidatedUrl {
            sanitized_length: sanitized.len(),
            normalized,
            url,
            host,
            address,
            is_ip_literal,
        })
    }

    /// Resolve a hostname and require every answer to be public.
    async fn resolve_public(&self, host: &str, port: u16) -> Result<SocketAddr, UrlRejection> {
        if is_localhost_name(host) {
            return Err(UrlRejection::BlockedIp {
                addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
                host: Some(host.to_string()),
            });
        }

        let addrs = self.resolver.resolve(host, port).await.map_err(|e| {
            debug!("DNS lookup for {host} failed: {e}");
            UrlRejection::DnsResolutionFailed(host.to_string())
        })?;

        let mut first = None;
        for addr in addrs.into_iter().take(MAX_RESOLVED_ADDRS) {
            check_ip(addr.ip(), Some(host))?;
            first.get_or_insert(addr);
        }
        first.ok_or_else(|| UrlRejection::DnsResolutionFailed(host.to_string()))
    }
}

fn parse(raw: &str) -> Result<Url, UrlRejection> {
    Url::parse(raw).map_err(|e| UrlRejection::Malformed(e.to_string()))
}

fn require_https(url: &Url) -> Result<(), UrlRejection> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(UrlRejection::InvalidProtocol(url.scheme().to_string()))
    }
}

fn check_ip(ip: IpAddr, host: Option<&str>) -> Result<(), UrlRejection> {
    if is_public_ip(ip) {
        Ok(())
    } else {
        Err(UrlRejection::BlockedIp {
            addr: ip,
            host: host.map(str::to_string),
        })
    }
}

fn normalize_list(list: &[String]) -> Vec<String> {
    list.iter()
        .map(|h| h.trim().trim_end_matches('.').to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect()
}

/// Exact match or subdomain match, case-insensitive.
fn hostname_matches(host: &str, pattern: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host == pattern
        || host
            .strip_suffix(pattern)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn is_localhost_name(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost") || host.to_ascii_lowercase().ends_with(".localhost")
}

/// Remove control characters, invisible formatting characters and
/// surrounding whitespace.
#[must_use]
pub fn sanitize(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !c.is_control() && !is_invisible(*c))
        .collect()
}

fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{FEFF}'
    )
}

/// Parse an IPv4 literal in any of the textual forms accepted by URL
/// parsers and `inet_aton`: one to four parts, each decimal, octal (leading
/// `0`) or hexadecimal (`0x`), with the last part filling the remaining
/// bytes. A single trailing dot is allowed.
#[must_use]
pub fn parse_ipv4_literal(input: &str) -> Option<Ipv4Addr> {
    let input = input.strip_suffix('.').unwrap_or(input);
    if input.is_empty() {
        return None;
    }
    let parts: Vec<&str> = input.split('.').collect();
    if parts.len() > 4 {
        return None;
    }
    let numbers = parts
        .iter()
        .map(|part| parse_ipv4_part(part))
        .collect::<Option<Vec<u64>>>()?;

    let (last, leading) = numbers.split_last()?;
    if leading.iter().any(|n| *n > 255) {
        return None;
    }
    let remaining_bytes = 4 - leading.len() as u32;
    if *last >= 1u64 << (8 * remaining_bytes) {
        return None;
    }

    let mut value = *last;
    for (i, n) in leading.iter().enumerate() {
        value += *n << (8 * (3 - i as u32));
    }
    u32::try_from(value).ok().map(Ipv4Addr::from)
}

fn parse_ipv4_part(part: &str) -> Option<u64> {
    if part.is_empty() {
        return None;
    }
    let (digits, radix) = if let Some(hex) = part
        .strip_prefix("0x")
        .or_else(|| part.strip_prefix("0X"))
    {
        (hex, 16)
    } else if part.len() > 1 && part.starts_with('0') {
        (&part[1..], 8)
    } else {
        (part, 10)
    };
    if digits.is_empty() {
        return (radix == 16).then_some(0);
    }
    if digits.len() > 12 {
        return None;
    }
    u64::from_str_radix(digits, radix).ok()
}

/// Returns true if `ip` is globally routable unicast space.
#[must_use]
pub fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_ipv4(v4),
        IpAddr::V6(v6) => is_public_ipv6(v6),
    }
}

fn is_public_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    let non_public = a == 0 // "this network"
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || (a == 100 && (b & 0xc0) == 64) // shared address space 100.64/10
        || (a == 192 && b == 0 && c == 0) // IETF protocol assignments
        || ip.is_documentation()
        || (a == 198 && (b & 0xfe) == 18) // benchmarking 198.18/15
        || ip.is_multicast()
        || a >= 240; // reserved and broadcast
    !non_public
}

fn is_public_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_public_ipv4(v4);
    }
    let segments = ip.segments();
    let embedded_v4 = |hi: u16, lo: u16| {
        Ipv4Addr::new(
            (hi >> 8) as u8,
            (hi & 0xff) as u8,
            (lo >> 8) as u8,
            (lo & 0xff) as u8,
        )
    };

    // NAT64 well-known prefix 64:ff9b::/96
    if segments[..6] == [0x64, 0xff9b, 0, 0, 0, 0] {
        return is_public_ipv4(embedded_v4(segments[6], segments[7]));
    }
    // 6to4 2002::/16 embeds the IPv4 address in the next 32 bits
    if segments[0] == 0x2002 {
        return is_public_ipv4(embedded_v4(segments[1], segments[2]));
    }

    let non_public = ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        || segments[..6] == [0, 0, 0, 0, 0, 0] // IPv4-compatible (deprecated)
        || (segments[0] & 0xfe00) == 0xfc00 // unique local fc00::/7
        || (segments[0] & 0xffc0) == 0xfe80 // link-local fe80::/10
        || (segments[0] & 0xffc0) == 0xfec0 // site-local fec0::/10
        || (segments[0] == 0x2001 && segments[1] == 0x0db8) // documentation
        || (segments[0] == 0x2001 && segments[1] == 0) // Teredo
        || segments[..4] == [0x100, 0, 0, 0]; // discard-only 100::/64
    !non_public
}
