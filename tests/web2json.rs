//! End-to-end Web2Json verification with the real filter worker.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use attestation_verifier::abi;
use attestation_verifier::config::{FilterConfig, Web2JsonConfig};
use attestation_verifier::filter::SandboxedFilterRunner;
use attestation_verifier::mic::message_integrity_code;
use attestation_verifier::payment::InMemoryIndexer;
use attestation_verifier::types::{source, ResponseBody, NO_CHAIN_TIMESTAMP};
use attestation_verifier::web2json::{
    FetchError, FetchRequest, FetchedSource, SourceFetcher, StaticResolver, UrlGuard,
    Web2JsonVerifier,
};
use attestation_verifier::{
    AttestationKind, AttestationStatus, AttestationVerifier, RawAttestationRequest,
};
use bytes::Bytes;
use serde_json::{json, Value};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const PRICE_SIGNATURE: &str = r#"{"components":[{"internalType":"string","name":"symbol","type":"string"},{"internalType":"uint256","name":"price","type":"uint256"},{"internalType":"uint8","name":"decimals","type":"uint8"}],"internalType":"struct PriceData","name":"priceData","type":"tuple"}"#;

const PRICE_FILTER: &str = "{symbol: .ticker, price: (.last * 100 | floor), decimals: 2}";

/// Answers every fetch with the same document.
struct FixedSource {
    content_type: &'static str,
    body: &'static str,
    fetches: Arc<AtomicUsize>,
}

impl SourceFetcher for FixedSource {
    async fn fetch(&self, _request: &FetchRequest) -> Result<FetchedSource, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !attestation_verifier::web2json::fetcher::is_json_content_type(self.content_type) {
            return Err(FetchError::ContentType(Some(self.content_type.to_string())));
        }
        Ok(FetchedSource {
            status: 200,
            content_type: self.content_type.to_string(),
            body: Bytes::from_static(self.body.as_bytes()),
        })
    }
}

type TestVerifier =
    AttestationVerifier<StaticResolver, FixedSource, SandboxedFilterRunner, InMemoryIndexer>;

fn verifier(content_type: &'static str, body: &'static str) -> (TestVerifier, Arc<AtomicUsize>) {
    let config = Web2JsonConfig::default();
    let resolver = StaticResolver::new()
        .with_host("api.exchange.test", &[IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))])
        .with_host("internal.exchange.test", &[IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))]);
    let fetches = Arc::new(AtomicUsize::new(0));
    let fixed = FixedSource {
        content_type,
        body,
        fetches: Arc::clone(&fetches),
    };
    let runner = SandboxedFilterRunner::with_worker(
        env!("CARGO_BIN_EXE_jq-sandbox"),
        &FilterConfig {
            timeout_ms: 300,
            ..FilterConfig::default()
        },
    );
    let web2json = Web2JsonVerifier::with_components(
        &config,
        UrlGuard::with_resolver(&config, resolver),
        fixed,
        runner,
    );
    (
        AttestationVerifier::with_components(web2json, None, source::test_btc()),
        fetches,
    )
}

fn request(url: &str, filter: &str, signature: &str) -> RawAttestationRequest {
    serde_json::from_value(json!({
        "attestationType": format!("0x{}", hex::encode(AttestationKind::Web2Json.tag())),
        "sourceId": format!("0x{}", hex::encode(source::public_web2())),
        "votingRound": 987_654,
        "requestBody": {
            "url": url,
            "httpMethod": "GET",
            "headers": "{\"Accept\":\"application/json\"}",
            "queryParams": "{\"pair\":\"BTCUSD\"}",
            "body": "",
            "postProcessJq": filter,
            "abiSignature": signature,
        }
    }))
    .unwrap()
}

const TICKER: &str = r#"{"ticker":"BTCUSD","last":68123.5,"volume":1200}"#;

#[tokio::test]
async fn test_valid_attestation() {
    let (verifier, fetches) = verifier("application/json", TICKER);
    let raw = request("https://api.exchange.test/v2/ticker", PRICE_FILTER, PRICE_SIGNATURE);

    let outcome = verifier.verify_raw(&raw).await.unwrap();
    assert_eq!(outcome.status, AttestationStatus::Valid);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    let response = outcome.response.clone().unwrap();
    assert_eq!(response.voting_round, 987_654);
    assert_eq!(response.lowest_used_timestamp, NO_CHAIN_TIMESTAMP);
    assert_eq!(outcome.mic.unwrap(), message_integrity_code(&response).unwrap());

    let ResponseBody::Web2Json(body) = &response.response_body else {
        unreachable!("web2json request produced another body kind");
    };
    let expected = abi::encode(
        PRICE_SIGNATURE,
        &json!({"symbol": "BTCUSD", "price": 6_812_350, "decimals": 2}),
    )
    .unwrap();
    assert_eq!(body.abi_encoded_data, expected);

    let wire: Value = serde_json::to_value(&outcome).unwrap();
    assert_eq!(wire["status"], "VALID");
    assert!(wire["messageIntegrityCode"].as_str().unwrap().starts_with("0x"));
    assert_eq!(wire["response"]["lowestUsedTimestamp"], json!(u64::MAX));
}

#[tokio::test]
async fn test_repeated_verification_agrees() {
    let (verifier, _) = verifier("application/json", TICKER);
    let raw = request("https://api.exchange.test/v2/ticker", PRICE_FILTER, PRICE_SIGNATURE);

    let first = verifier.verify_raw(&raw).await.unwrap();
    let second = verifier.verify_raw(&raw).await.unwrap();
    assert_eq!(first.mic, second.mic);
    assert_eq!(first.response, second.response);
}

#[tokio::test]
async fn test_localhost_rejected_by_scheme_and_by_host() {
    let (verifier, fetches) = verifier("application/json", TICKER);
    for url in [
        "http://localhost:3000",
        "https://localhost:3000",
        "http://api.exchange.test/v2/ticker",
        "https://2130706433/",
        "https://0x7f.0.0.1/",
        "https://[::ffff:127.0.0.1]/",
        "https://internal.exchange.test/",
    ] {
        let outcome = verifier
            .verify_raw(&request(url, ".", PRICE_SIGNATURE))
            .await
            .unwrap();
        assert_eq!(outcome.status, AttestationStatus::InvalidSourceUrl, "{url}");
        assert!(outcome.response.is_none());
        assert!(outcome.mic.is_none());
    }
    assert_eq!(fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_non_json_source() {
    let (verifier, _) = verifier("text/html; charset=utf-8", "<html></html>");
    let outcome = verifier
        .verify_raw(&request("https://api.exchange.test/", ".", PRICE_SIGNATURE))
        .await
        .unwrap();
    assert_eq!(outcome.status, AttestationStatus::InvalidResponseContentType);
}

#[tokio::test]
async fn test_filter_timeout_is_invalid_filter() {
    let (verifier, _) = verifier("application/json", TICKER);
    let started = Instant::now();
    let outcome = verifier
        .verify_raw(&request(
            "https://api.exchange.test/",
            "last(range(1e18))",
            r#"{"type":"uint256","name":"v"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(outcome.status, AttestationStatus::InvalidJqFilter);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_signature_and_encode_failures() {
    let (verifier, _) = verifier("application/json", TICKER);

    let outcome = verifier
        .verify_raw(&request("https://api.exchange.test/", ".ticker", r#"{"type":"strin"}"#))
        .await
        .unwrap();
    assert_eq!(outcome.status, AttestationStatus::InvalidAbiSignature);

    let outcome = verifier
        .verify_raw(&request(
            "https://api.exchange.test/",
            ".last",
            r#"{"type":"uint256","name":"v"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(outcome.status, AttestationStatus::InvalidEncodeError);
}

#[tokio::test]
async fn test_rejected_outcome_wire_shape() {
    let (verifier, _) = verifier("application/json", TICKER);
    let outcome = verifier
        .verify_raw(&request("https://api.exchange.test/", ".nothing", PRICE_SIGNATURE))
        .await
        .unwrap();
    let wire = serde_json::to_value(&outcome).unwrap();
    assert_eq!(wire, json!({"status": "INVALID_JQ_FILTER"}));
}
