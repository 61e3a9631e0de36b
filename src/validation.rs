//! Request-shape validation.
//!
//! Runs once, before the verification core, turning an untyped
//! [`RawAttestationRequest`] into a typed [`AttestationRequest`] or the first
//! [`FieldError`] found. The core never sees a request that failed here.

use crate::types::{
    AttestationKind, AttestationRequest, NonexistenceRequestBody, RequestBody,
    Web2JsonRequestBody,
};
use alloy_primitives::{B256, U256};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// A request as received from the transport layer, before shape checks.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAttestationRequest {
    /// Attestation type tag as hex.
    pub attestation_type: String,
    /// Source tag as hex.
    pub source_id: String,
    /// Optional voting round.
    #[serde(default)]
    pub voting_round: Option<u64>,
    /// Type-specific body.
    pub request_body: Value,
}

/// A single field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct FieldError {
    /// JSON name of the offending field.
    pub field: String,
    /// What is wrong with it.
    pub reason: String,
}

impl FieldError {
    fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Parse a 32-byte hex value.
///
/// Accepts an optional `0x`/`0X` prefix and case-insensitive digits; the
/// digit count must be exactly 64.
///
/// # Errors
///
/// Returns a [`FieldError`] naming `field` on any other input.
pub fn parse_bytes32(field: &str, input: &str) -> Result<B256, FieldError> {
    let digits = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);
    if digits.len() != 64 {
        return Err(FieldError::new(
            field,
            format!("expected 64 hex digits, got {}", digits.len()),
        ));
    }
    let mut out = [0u8; 32];
    hex::decode_to_slice(digits, &mut out)
        .map_err(|e| FieldError::new(field, format!("invalid hex: {e}")))?;
    Ok(B256::from(out))
}

/// Parse a payment reference: a 32-byte hex value that is not all zeros.
///
/// # Errors
///
/// Returns a [`FieldError`] if the value is malformed or zero.
pub fn parse_payment_reference(field: &str, input: &str) -> Result<B256, FieldError> {
    let reference = parse_bytes32(field, input)?;
    if reference == B256::ZERO {
        return Err(FieldError::new(field, "zero payment reference is reserved"));
    }
    Ok(reference)
}

/// Validate a raw request into its typed form.
///
/// # Errors
///
/// Returns the first [`FieldError`] encountered.
pub fn validate_request(raw: &RawAttestationRequest) -> Result<AttestationRequest, FieldError> {
    let attestation_type = parse_bytes32("attestationType", &raw.attestation_type)?;
    let source_id = parse_bytes32("sourceId", &raw.source_id)?;
    let kind = AttestationKind::from_tag(&attestation_type)
        .ok_or_else(|| FieldError::new("attestationType", "unknown attestation type"))?;

    let Value::Object(body) = &raw.request_body else {
        return Err(FieldError::new("requestBody", "expected an object"));
    };

    let request_body = match kind {
        AttestationKind::Web2Json => RequestBody::Web2Json(web2json_body(body)?),
        AttestationKind::ReferencedPaymentNonexistence => {
            RequestBody::ReferencedPaymentNonexistence(nonexistence_body(body)?)
        }
    };

    Ok(AttestationRequest {
        attestation_type,
        source_id,
        voting_round: raw.voting_round.unwrap_or(0),
        request_body,
    })
}

fn web2json_body(body: &Map<String, Value>) -> Result<Web2JsonRequestBody, FieldError> {
    Ok(Web2JsonRequestBody {
        url: required_string(body, "url")?,
        http_method: required_string(body, "httpMethod")?,
        headers: optional_string(body, "headers")?,
        query_params: optional_string(body, "queryParams")?,
        body: optional_string(body, "body")?,
        post_process_jq: required_string(body, "postProcessJq")?,
        abi_signature: required_string(body, "abiSignature")?,
    })
}

fn nonexistence_body(body: &Map<String, Value>) -> Result<NonexistenceRequestBody, FieldError> {
    Ok(NonexistenceRequestBody {
        minimal_block_number: required_u64(body, "minimalBlockNumber")?,
        deadline_block_number: required_u64(body, "deadlineBlockNumber")?,
        deadline_timestamp: required_u64(body, "deadlineTimestamp")?,
        destination_address_hash: parse_bytes32(
            "destinationAddressHash",
            &required_string(body, "destinationAddressHash")?,
        )?,
        amount: required_u256(body, "amount")?,
        standard_payment_reference: parse_payment_reference(
            "standardPaymentReference",
            &required_string(body, "standardPaymentReference")?,
        )?,
        check_source_addresses: required_bool(body, "checkSourceAddresses")?,
        source_addresses_root: parse_bytes32(
            "sourceAddressesRoot",
            &required_string(body, "sourceAddressesRoot")?,
        )?,
    })
}

fn required_string(body: &Map<String, Value>, field: &str) -> Result<String, FieldError> {
    match body.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(FieldError::new(field, "expected a string")),
        None => Err(FieldError::new(field, "missing")),
    }
}

fn optional_string(body: &Map<String, Value>, field: &str) -> Result<String, FieldError> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(FieldError::new(field, "expected a string")),
    }
}

fn required_bool(body: &Map<String, Value>, field: &str) -> Result<bool, FieldError> {
    match body.get(field) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(FieldError::new(field, "expected a boolean")),
        None => Err(FieldError::new(field, "missing")),
    }
}

/// Integers arrive either as JSON numbers or as decimal strings.
fn required_u64(body: &Map<String, Value>, field: &str) -> Result<u64, FieldError> {
    match body.get(field) {
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| FieldError::new(field, "expected a non-negative integer")),
        Some(Value::String(s)) if is_decimal(s) => s
            .parse::<u64>()
            .map_err(|_| FieldError::new(field, "integer out of range")),
        Some(_) => Err(FieldError::new(field, "expected a non-negative integer")),
        None => Err(FieldError::new(field, "missing")),
    }
}

fn required_u256(body: &Map<String, Value>, field: &str) -> Result<U256, FieldError> {
    match body.get(field) {
        Some(Value::Number(n)) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| FieldError::new(field, "expected a non-negative integer")),
        Some(Value::String(s)) if is_decimal(s) => U256::from_str_radix(s, 10)
            .map_err(|_| FieldError::new(field, "integer out of range")),
        Some(_) => Err(FieldError::new(field, "expected a non-negative integer")),
        None => Err(FieldError::new(field, "missing")),
    }
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
