//! Attestation request, response and verdict types.
//!
//! Everything here is created per request and dropped when the verification
//! call returns. Fixed-width identifiers are `B256`; once a request reaches
//! these types every identifier has already been shape-validated.

use alloy_primitives::{Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain-separation string appended to every MIC preimage.
pub const MIC_SALT: &str = "Flare";

/// `lowestUsedTimestamp` for attestations that read no chain data.
pub const NO_CHAIN_TIMESTAMP: u64 = u64::MAX;

/// Encode a short ASCII name as a 32-byte tag, right-padded with zeros.
///
/// Names longer than 32 bytes are truncated.
#[must_use]
pub fn encode_tag(name: &str) -> B256 {
    let mut tag = [0u8; 32];
    let bytes = name.as_bytes();
    let len = bytes.len().min(32);
    tag[..len].copy_from_slice(&bytes[..len]);
    B256::from(tag)
}

/// The attestation types this verifier understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttestationKind {
    /// JSON fetched from a public web endpoint, filtered and ABI-encoded.
    Web2Json,
    /// Proof that no matching payment happened within a block window.
    ReferencedPaymentNonexistence,
}

impl AttestationKind {
    /// Every known kind.
    pub const ALL: [Self; 2] = [Self::Web2Json, Self::ReferencedPaymentNonexistence];

    /// Human-readable name, also the preimage of the tag.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Web2Json => "Web2Json",
            Self::ReferencedPaymentNonexistence => "ReferencedPaymentNonexistence",
        }
    }

    /// The 32-byte `attestationType` tag.
    #[must_use]
    pub fn tag(self) -> B256 {
        encode_tag(self.name())
    }

    /// Look up a kind by its tag.
    #[must_use]
    pub fn from_tag(tag: &B256) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == *tag)
    }
}

impl fmt::Display for AttestationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Well-known source identifiers.
pub mod source {
    use super::encode_tag;
    use alloy_primitives::B256;

    /// Source tag for public web endpoints.
    #[must_use]
    pub fn public_web2() -> B256 {
        encode_tag("PublicWeb2")
    }

    /// Source tag for Bitcoin testnet.
    #[must_use]
    pub fn test_btc() -> B256 {
        encode_tag("testBTC")
    }

    /// Source tag for Bitcoin mainnet.
    #[must_use]
    pub fn btc() -> B256 {
        encode_tag("BTC")
    }
}

/// Public verdict of a verification call.
///
/// Serialized in `SCREAMING_SNAKE_CASE`, e.g. `INVALID_SOURCE_URL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttestationStatus {
    /// The claim holds.
    Valid,
    /// Not enough external data to decide yet; ask again later.
    Indeterminate,
    /// The claim does not hold.
    Invalid,
    /// URL rejected by the security validator.
    InvalidSourceUrl,
    /// HTTP method not in the allowed set.
    InvalidHttpMethod,
    /// Headers are not a JSON object of strings.
    InvalidHeaders,
    /// Query parameters are not a JSON object.
    InvalidQueryParams,
    /// Body is not valid JSON.
    InvalidBody,
    /// Filter malformed, timed out, failed or produced no result.
    InvalidJqFilter,
    /// ABI signature could not be parsed.
    InvalidAbiSignature,
    /// Filter output does not fit the ABI signature.
    InvalidEncodeError,
    /// Source did not answer with a JSON media type.
    InvalidResponseContentType,
    /// Source could not be fetched.
    InvalidFetchError,
}

impl AttestationStatus {
    /// Wire representation of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::Indeterminate => "INDETERMINATE",
            Self::Invalid => "INVALID",
            Self::InvalidSourceUrl => "INVALID_SOURCE_URL",
            Self::InvalidHttpMethod => "INVALID_HTTP_METHOD",
            Self::InvalidHeaders => "INVALID_HEADERS",
            Self::InvalidQueryParams => "INVALID_QUERY_PARAMS",
            Self::InvalidBody => "INVALID_BODY",
            Self::InvalidJqFilter => "INVALID_JQ_FILTER",
            Self::InvalidAbiSignature => "INVALID_ABI_SIGNATURE",
            Self::InvalidEncodeError => "INVALID_ENCODE_ERROR",
            Self::InvalidResponseContentType => "INVALID_RESPONSE_CONTENT_TYPE",
            Self::InvalidFetchError => "INVALID_FETCH_ERROR",
        }
    }

    /// Returns true if this status carries a response.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl fmt::Display for AttestationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body of a Web2Json attestation.
///
/// `headers`, `query_params` and `body` hold JSON text; an empty string means
/// the field is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Web2JsonRequestBody {
    /// Source URL (must be `https`).
    pub url: String,
    /// HTTP method.
    pub http_method: String,
    /// JSON object of header names to values.
    pub headers: String,
    /// JSON object of query parameters.
    pub query_params: String,
    /// JSON request body.
    pub body: String,
    /// Post-processing filter.
    pub post_process_jq: String,
    /// JSON ABI parameter describing the output type.
    pub abi_signature: String,
}

/// Response body of a Web2Json attestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Web2JsonResponseBody {
    /// Filter output, ABI-encoded against the request's signature.
    pub abi_encoded_data: Bytes,
}

/// Request body of a referenced-payment non-existence attestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonexistenceRequestBody {
    /// First block of the searched window.
    pub minimal_block_number: u64,
    /// Block number bound of the window.
    pub deadline_block_number: u64,
    /// Timestamp bound of the window.
    pub deadline_timestamp: u64,
    /// Hash of the destination address.
    pub destination_address_hash: B256,
    /// Minimal amount that would count as a payment.
    #[serde(with = "u256_decimal")]
    pub amount: U256,
    /// Payment reference that must not appear.
    pub standard_payment_reference: B256,
    /// Whether source addresses must match `source_addresses_root`.
    pub check_source_addresses: bool,
    /// Merkle root of the expected source addresses.
    pub source_addresses_root: B256,
}

/// Response body of a referenced-payment non-existence attestation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonexistenceResponseBody {
    /// Timestamp of the block at `minimalBlockNumber`.
    pub minimal_block_timestamp: u64,
    /// Last block of the searched window.
    pub upper_bound_block_number: u64,
    /// Timestamp of the last block of the searched window.
    pub upper_bound_block_timestamp: u64,
}

/// Request body, one variant per attestation kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestBody {
    /// Web2Json request.
    Web2Json(Web2JsonRequestBody),
    /// Payment non-existence request.
    ReferencedPaymentNonexistence(NonexistenceRequestBody),
}

impl RequestBody {
    /// The attestation kind this body belongs to.
    #[must_use]
    pub fn kind(&self) -> AttestationKind {
        match self {
            Self::Web2Json(_) => AttestationKind::Web2Json,
            Self::ReferencedPaymentNonexistence(_) => {
                AttestationKind::ReferencedPaymentNonexistence
            }
        }
    }
}

/// Response body, one variant per attestation kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    /// Web2Json response.
    Web2Json(Web2JsonResponseBody),
    /// Payment non-existence response.
    ReferencedPaymentNonexistence(NonexistenceResponseBody),
}

/// A shape-validated attestation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationRequest {
    /// Attestation type tag.
    pub attestation_type: B256,
    /// Source tag.
    pub source_id: B256,
    /// Voting round; echoed into the response.
    pub voting_round: u64,
    /// Type-specific body.
    pub request_body: RequestBody,
}

/// The typed response of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationResponse {
    /// Attestation type tag.
    pub attestation_type: B256,
    /// Source tag.
    pub source_id: B256,
    /// Voting round.
    pub voting_round: u64,
    /// Earliest chain timestamp the verdict depends on.
    pub lowest_used_timestamp: u64,
    /// Echo of the request body.
    pub request_body: RequestBody,
    /// Derived response body.
    pub response_body: ResponseBody,
}

/// The result handed back to the caller.
///
/// A response (and its MIC) is present exactly when the status is
/// [`AttestationStatus::Valid`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    /// Verdict.
    pub status: AttestationStatus,
    /// Response, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<AttestationResponse>,
    /// Message integrity code of `response`.
    #[serde(rename = "messageIntegrityCode", skip_serializing_if = "Option::is_none")]
    pub mic: Option<B256>,
}

impl VerificationOutcome {
    /// Build a failed outcome. Success statuses are downgraded to `INVALID`
    /// since they require a response.
    #[must_use]
    pub fn rejected(status: AttestationStatus) -> Self {
        let status = if status.is_success() {
            AttestationStatus::Invalid
        } else {
            status
        };
        Self {
            status,
            response: None,
            mic: None,
        }
    }

    /// Build a successful outcome and compute its MIC.
    ///
    /// # Errors
    ///
    /// Returns an error if the response cannot be ABI-encoded.
    pub fn valid(response: AttestationResponse) -> crate::Result<Self> {
        let mic = crate::mic::message_integrity_code(&response)?;
        Ok(Self {
            status: AttestationStatus::Valid,
            response: Some(response),
            mic: Some(mic),
        })
    }
}

/// Serde helper for `U256` as a decimal string.
pub(crate) mod u256_decimal {
    use alloy_primitives::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_str_radix(&s, 10).map_err(de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_roundtrip() {
        for kind in AttestationKind::ALL {
            assert_eq!(AttestationKind::from_tag(&kind.tag()), Some(kind));
        }
        assert_eq!(AttestationKind::from_tag(&B256::ZERO), None);
    }

    #[test]
    fn test_tag_padding() {
        let tag = encode_tag("Web2Json");
        assert_eq!(&tag[..8], b"Web2Json");
        assert!(tag[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_status_serialization_matches_wire_names() {
        for status in [
            AttestationStatus::Valid,
            AttestationStatus::InvalidSourceUrl,
            AttestationStatus::InvalidJqFilter,
            AttestationStatus::InvalidResponseContentType,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn test_rejected_never_carries_success() {
        let outcome = VerificationOutcome::rejected(AttestationStatus::Valid);
        assert_eq!(outcome.status, AttestationStatus::Invalid);
        assert!(outcome.response.is_none());
        assert!(outcome.mic.is_none());
    }

    #[test]
    fn test_amount_serializes_as_decimal() {
        let body = NonexistenceRequestBody {
            minimal_block_number: 1,
            deadline_block_number: 2,
            deadline_timestamp: 3,
            destination_address_hash: B256::ZERO,
            amount: U256::from(123_456_789u64),
            standard_payment_reference: B256::repeat_byte(1),
            check_source_addresses: false,
            source_addresses_root: B256::ZERO,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["amount"], "123456789");
        let back: NonexistenceRequestBody = serde_json::from_value(json).unwrap();
        assert_eq!(back, body);
    }
}
