//! Message integrity code.
//!
//! `MIC = keccak256(abi.encode(response, "Flare"))`, where `response` is the
//! full response tuple:
//!
//! ```text
//! (bytes32 attestationType, bytes32 sourceId, uint64 votingRound,
//!  uint64 lowestUsedTimestamp, RequestBody requestBody, ResponseBody responseBody)
//! ```

use crate::error::Result;
use crate::types::{
    AttestationResponse, NonexistenceRequestBody, NonexistenceResponseBody, RequestBody,
    ResponseBody, Web2JsonRequestBody, Web2JsonResponseBody, MIC_SALT,
};
use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{keccak256, B256, U256};

/// Compute the MIC of `response`.
///
/// # Errors
///
/// Returns [`crate::Error::Abi`] if the request and response bodies belong to
/// different attestation kinds.
pub fn message_integrity_code(response: &AttestationResponse) -> Result<B256> {
    let preimage = DynSolValue::Tuple(vec![
        response_tuple(response)?,
        DynSolValue::String(MIC_SALT.to_string()),
    ]);
    Ok(keccak256(preimage.abi_encode_params()))
}

/// The response as an ABI tuple.
///
/// # Errors
///
/// Returns [`crate::Error::Abi`] on mismatched body kinds.
pub fn response_tuple(response: &AttestationResponse) -> Result<DynSolValue> {
    let (request_body, response_body) = match (&response.request_body, &response.response_body) {
        (RequestBody::Web2Json(request), ResponseBody::Web2Json(body)) => {
            (web2json_request(request), web2json_response(body))
        }
        (
            RequestBody::ReferencedPaymentNonexistence(request),
            ResponseBody::ReferencedPaymentNonexistence(body),
        ) => (nonexistence_request(request), nonexistence_response(body)),
        _ => {
            return Err(crate::Error::Abi(
                "request and response bodies are of different kinds".to_string(),
            ))
        }
    };

    Ok(DynSolValue::Tuple(vec![
        bytes32(response.attestation_type),
        bytes32(response.source_id),
        uint64(response.voting_round),
        uint64(response.lowest_used_timestamp),
        request_body,
        response_body,
    ]))
}

fn web2json_request(body: &Web2JsonRequestBody) -> DynSolValue {
    DynSolValue::Tuple(
        [
            &body.url,
            &body.http_method,
            &body.headers,
            &body.query_params,
            &body.body,
            &body.post_process_jq,
            &body.abi_signature,
        ]
        .into_iter()
        .map(|s| DynSolValue::String(s.clone()))
        .collect(),
    )
}

fn web2json_response(body: &Web2JsonResponseBody) -> DynSolValue {
    DynSolValue::Tuple(vec![DynSolValue::Bytes(body.abi_encoded_data.to_vec())])
}

fn nonexistence_request(body: &NonexistenceRequestBody) -> DynSolValue {
    DynSolValue::Tuple(vec![
        uint64(body.minimal_block_number),
        uint64(body.deadline_block_number),
        uint64(body.deadline_timestamp),
        bytes32(body.destination_address_hash),
        DynSolValue::Uint(body.amount, 256),
        bytes32(body.standard_payment_reference),
        DynSolValue::Bool(body.check_source_addresses),
        bytes32(body.source_addresses_root),
    ])
}

fn nonexistence_response(body: &NonexistenceResponseBody) -> DynSolValue {
    DynSolValue::Tuple(vec![
        uint64(body.minimal_block_timestamp),
        uint64(body.upper_bound_block_number),
        uint64(body.upper_bound_block_timestamp),
    ])
}

fn bytes32(value: B256) -> DynSolValue {
    DynSolValue::FixedBytes(value, 32)
}

fn uint64(value: u64) -> DynSolValue {
    DynSolValue::Uint(U256::from(value), 64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{source, AttestationKind, NO_CHAIN_TIMESTAMP};
    use alloy_primitives::Bytes;

    fn web2json_response_fixture() -> AttestationResponse {
        AttestationResponse {
            attestation_type: AttestationKind::Web2Json.tag(),
            source_id: source::public_web2(),
            voting_round: 1_024,
            lowest_used_timestamp: NO_CHAIN_TIMESTAMP,
            request_body: RequestBody::Web2Json(Web2JsonRequestBody {
                url: "https://api.example.com/price".to_string(),
                http_method: "GET".to_string(),
                headers: String::new(),
                query_params: String::new(),
                body: String::new(),
                post_process_jq: ".price".to_string(),
                abi_signature: r#"{"type":"uint256","name":"price"}"#.to_string(),
            }),
            response_body: ResponseBody::Web2Json(Web2JsonResponseBody {
                abi_encoded_data: Bytes::from(U256::from(42u64).to_be_bytes::<32>().to_vec()),
            }),
        }
    }

    fn nonexistence_response_fixture() -> AttestationResponse {
        AttestationResponse {
            attestation_type: AttestationKind::ReferencedPaymentNonexistence.tag(),
            source_id: source::test_btc(),
            voting_round: 0,
            lowest_used_timestamp: 1_732_779_000,
            request_body: RequestBody::ReferencedPaymentNonexistence(NonexistenceRequestBody {
                minimal_block_number: 3_490_151,
                deadline_block_number: 3_490_154,
                deadline_timestamp: 1_732_779_897,
                destination_address_hash: B256::repeat_byte(0xab),
                amount: U256::from(100_000u64),
                standard_payment_reference: B256::repeat_byte(0x11),
                check_source_addresses: false,
                source_addresses_root: B256::ZERO,
            }),
            response_body: ResponseBody::ReferencedPaymentNonexistence(
                NonexistenceResponseBody {
                    minimal_block_timestamp: 1_732_779_000,
                    upper_bound_block_number: 3_490_155,
                    upper_bound_block_timestamp: 1_732_779_900,
                },
            ),
        }
    }

    #[test]
    fn test_stable() {
        for response in [web2json_response_fixture(), nonexistence_response_fixture()] {
            let first = message_integrity_code(&response).unwrap();
            assert_eq!(message_integrity_code(&response).unwrap(), first);
            assert_eq!(message_integrity_code(&response.clone()).unwrap(), first);
        }
    }

    #[test]
    fn test_sensitive_to_every_envelope_field() {
        let base = web2json_response_fixture();
        let mic = message_integrity_code(&base).unwrap();

        let mut changed = base.clone();
        changed.voting_round += 1;
        assert_ne!(message_integrity_code(&changed).unwrap(), mic);

        let mut changed = base.clone();
        changed.lowest_used_timestamp = 0;
        assert_ne!(message_integrity_code(&changed).unwrap(), mic);

        let mut changed = base.clone();
        changed.source_id = source::btc();
        assert_ne!(message_integrity_code(&changed).unwrap(), mic);

        let mut changed = base;
        if let RequestBody::Web2Json(body) = &mut changed.request_body {
            body.post_process_jq = ".price | tostring".to_string();
        }
        assert_ne!(message_integrity_code(&changed).unwrap(), mic);
    }

    #[test]
    fn test_sensitive_to_response_body() {
        let base = nonexistence_response_fixture();
        let mic = message_integrity_code(&base).unwrap();

        let mut changed = base;
        if let ResponseBody::ReferencedPaymentNonexistence(body) = &mut changed.response_body {
            body.upper_bound_block_number += 1;
        }
        assert_ne!(message_integrity_code(&changed).unwrap(), mic);
    }

    #[test]
    fn test_salt_is_part_of_preimage() {
        let response = nonexistence_response_fixture();
        let unsalted = keccak256(response_tuple(&response).unwrap().abi_encode());
        assert_ne!(message_integrity_code(&response).unwrap(), unsalted);
    }

    #[test]
    fn test_mismatched_bodies_are_rejected() {
        let mut response = web2json_response_fixture();
        response.response_body = nonexistence_response_fixture().response_body;
        assert!(matches!(
            message_integrity_code(&response),
            Err(crate::Error::Abi(_))
        ));
    }
}
