//! Top-level attestation verifier.
//!
//! Dispatches a validated request to the Web2Json or the payment
//! non-existence path, assembles the response and computes its MIC.

use crate::config::VerifierConfig;
use crate::error::Result;
use crate::filter::{FilterRunner, SandboxedFilterRunner};
use crate::payment::{InMemoryIndexer, IndexerClient, NonexistenceChecker, NonexistenceVerdict};
use crate::types::{
    source, AttestationKind, AttestationRequest, AttestationResponse, AttestationStatus,
    RequestBody, ResponseBody, VerificationOutcome, NO_CHAIN_TIMESTAMP,
};
use crate::validation::{validate_request, RawAttestationRequest};
use crate::web2json::{HostResolver, HttpFetcher, SourceFetcher, SystemResolver, Web2JsonVerifier};
use alloy_primitives::B256;
use tracing::{info, warn};

/// Verifies attestation requests of every supported kind.
///
/// Holds no per-request state; one instance can serve concurrent calls.
pub struct AttestationVerifier<
    R = SystemResolver,
    F = HttpFetcher,
    J = SandboxedFilterRunner,
    I = InMemoryIndexer,
> {
    web2json: Web2JsonVerifier<R, F, J>,
    nonexistence: Option<NonexistenceChecker<I>>,
    nonexistence_source: B256,
}

impl AttestationVerifier {
    /// Create a verifier from configuration.
    ///
    /// Without an indexer, non-existence requests are not served.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter worker cannot be located.
    pub fn new(config: &VerifierConfig, indexer: Option<InMemoryIndexer>) -> Result<Self> {
        let web2json = Web2JsonVerifier::new(config)?;
        let nonexistence = indexer
            .map(|indexer| NonexistenceChecker::new(indexer, config.indexer.query_timeout()));

        info!(
            "Attestation verifier initialized (non-existence source={}, indexer={})",
            hex::encode(config.source_id),
            nonexistence.is_some()
        );

        Ok(Self::with_components(
            web2json,
            nonexistence,
            config.source_id,
        ))
    }
}

impl<R, F, J, I> AttestationVerifier<R, F, J, I>
where
    R: HostResolver,
    F: SourceFetcher,
    J: FilterRunner,
    I: IndexerClient,
{
    /// Assemble a verifier from its parts.
    pub fn with_components(
        web2json: Web2JsonVerifier<R, F, J>,
        nonexistence: Option<NonexistenceChecker<I>>,
        nonexistence_source: B256,
    ) -> Self {
        Self {
            web2json,
            nonexistence,
            nonexistence_source,
        }
    }

    /// Validate the shape of `raw` and verify it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidRequest`] if the request is malformed.
    /// Verification failures are statuses in the outcome, not errors.
    pub async fn verify_raw(&self, raw: &RawAttestationRequest) -> Result<VerificationOutcome> {
        let request = validate_request(raw)?;
        Ok(self.verify(&request).await)
    }

    /// Verify a shape-validated request.
    pub async fn verify(&self, request: &AttestationRequest) -> VerificationOutcome {
        let kind = request.request_body.kind();
        let outcome = match self.verify_inner(request).await {
            Ok(response) => VerificationOutcome::valid(response).unwrap_or_else(|e| {
                warn!("Failed to compute MIC: {e}");
                VerificationOutcome::rejected(AttestationStatus::Invalid)
            }),
            Err(status) => VerificationOutcome::rejected(status),
        };

        info!(
            "{kind} attestation from source {}: {}",
            hex::encode(request.source_id),
            outcome.status
        );
        outcome
    }

    async fn verify_inner(
        &self,
        request: &AttestationRequest,
    ) -> std::result::Result<AttestationResponse, AttestationStatus> {
        if AttestationKind::from_tag(&request.attestation_type) != Some(request.request_body.kind())
        {
            warn!("Request body does not match attestation type");
            return Err(AttestationStatus::Invalid);
        }

        let (lowest_used_timestamp, response_body) = match &request.request_body {
            RequestBody::Web2Json(body) => {
                if request.source_id != source::public_web2() {
                    warn!("Unsupported Web2Json source {}", hex::encode(request.source_id));
                    return Err(AttestationStatus::Invalid);
                }
                let response = self.web2json.verify(body).await?;
                (NO_CHAIN_TIMESTAMP, ResponseBody::Web2Json(response))
            }
            RequestBody::ReferencedPaymentNonexistence(body) => {
                let Some(checker) = self
                    .nonexistence
                    .as_ref()
                    .filter(|_| request.source_id == self.nonexistence_source)
                else {
                    warn!(
                        "Non-existence source {} is not served",
                        hex::encode(request.source_id)
                    );
                    return Err(AttestationStatus::Invalid);
                };
                match checker.check(body).await {
                    NonexistenceVerdict::Proven(response) => (
                        response.minimal_block_timestamp,
                        ResponseBody::ReferencedPaymentNonexistence(response),
                    ),
                    verdict => return Err(verdict.status()),
                }
            }
        };

        Ok(AttestationResponse {
            attestation_type: request.attestation_type,
            source_id: request.source_id,
            voting_round: request.voting_round,
            lowest_used_timestamp,
            request_body: request.request_body.clone(),
            response_body,
        })
    }
}
