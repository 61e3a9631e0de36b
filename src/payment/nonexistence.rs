//! Referenced-payment non-existence checker.

use crate::error::{Error, Result};
use crate::payment::indexer::{BlockInfo, IndexedTransaction, IndexerClient};
use crate::payment::merkle::source_addresses_root;
use crate::types::{AttestationStatus, NonexistenceRequestBody, NonexistenceResponseBody};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of a non-existence check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NonexistenceVerdict {
    /// No matching payment in the window.
    Proven(NonexistenceResponseBody),
    /// A matching payment exists.
    PaymentFound {
        /// Block containing the payment.
        block_number: u64,
    },
    /// The window is empty: its first block lies after its last.
    EmptyWindow {
        /// Requested first block.
        minimal_block_number: u64,
        /// Computed last block.
        upper_bound_block_number: u64,
    },
    /// The indexer cannot answer yet.
    Unavailable(String),
}

impl NonexistenceVerdict {
    /// Public status of the verdict.
    #[must_use]
    pub fn status(&self) -> AttestationStatus {
        match self {
            Self::Proven(_) => AttestationStatus::Valid,
            Self::PaymentFound { .. } | Self::EmptyWindow { .. } => AttestationStatus::Invalid,
            Self::Unavailable(_) => AttestationStatus::Indeterminate,
        }
    }
}

/// Checks that a referenced payment did not happen in a block window.
///
/// The window starts at `minimalBlockNumber` and ends at the later of
/// `deadlineBlockNumber` and the first block at or after
/// `deadlineTimestamp`.
pub struct NonexistenceChecker<I> {
    indexer: I,
    query_timeout: Duration,
}

impl<I: IndexerClient> NonexistenceChecker<I> {
    /// Create a checker over `indexer`.
    pub fn new(indexer: I, query_timeout: Duration) -> Self {
        Self {
            indexer,
            query_timeout,
        }
    }

    /// Run the check.
    ///
    /// Indexer failures and timeouts are reported as
    /// [`NonexistenceVerdict::Unavailable`].
    pub async fn check(&self, body: &NonexistenceRequestBody) -> NonexistenceVerdict {
        match self.check_inner(body).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("Indexer query failed: {e}");
                NonexistenceVerdict::Unavailable(e.to_string())
            }
        }
    }

    async fn check_inner(&self, body: &NonexistenceRequestBody) -> Result<NonexistenceVerdict> {
        let minimal = body.minimal_block_number;

        // Step 1: the block that closes the window by timestamp
        let Some(timestamp_block) = self
            .query(self.indexer.first_block_at_or_after(body.deadline_timestamp))
            .await?
        else {
            return Ok(NonexistenceVerdict::Unavailable(format!(
                "no indexed block at or after timestamp {}",
                body.deadline_timestamp
            )));
        };
        let upper = body.deadline_block_number.max(timestamp_block.number);

        // Step 2: an inverted window is invalid whatever else is missing
        if minimal > upper {
            info!("Empty window: minimal block {minimal} is after upper bound {upper}");
            return Ok(NonexistenceVerdict::EmptyWindow {
                minimal_block_number: minimal,
                upper_bound_block_number: upper,
            });
        }

        // Step 3: both ends of the window must be indexed
        let Some(minimal_block) = self.query(self.indexer.block_at(minimal)).await? else {
            return Ok(NonexistenceVerdict::Unavailable(format!(
                "block {minimal} is not indexed"
            )));
        };
        let upper_block = if upper == timestamp_block.number {
            Some(timestamp_block)
        } else {
            self.query(self.indexer.block_at(upper)).await?
        };
        let Some(upper_block) = upper_block else {
            return Ok(NonexistenceVerdict::Unavailable(format!(
                "block {upper} is not indexed"
            )));
        };

        // Step 4: every block in between must be indexed as well
        if let Some(missing) = self
            .query(self.indexer.first_missing_block(minimal, upper))
            .await?
        {
            return Ok(NonexistenceVerdict::Unavailable(format!(
                "block {missing} is not indexed"
            )));
        }

        // Step 5: scan the window
        let transactions = self
            .query(self.indexer.transactions_in_range(minimal, upper))
            .await?;
        debug!(
            "Scanning {} transactions in blocks {minimal}..={upper}",
            transactions.len()
        );
        if let Some(tx) = transactions.iter().find(|tx| matches_request(tx, body)) {
            info!(
                "Payment {} found in block {}",
                hex::encode(body.standard_payment_reference),
                tx.block_number
            );
            return Ok(NonexistenceVerdict::PaymentFound {
                block_number: tx.block_number,
            });
        }

        Ok(NonexistenceVerdict::Proven(response_body(
            minimal_block,
            upper_block,
        )))
    }

    async fn query<T>(&self, query: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.query_timeout, query)
            .await
            .map_err(|_| {
                Error::Indexer(format!("query timed out after {:?}", self.query_timeout))
            })?
    }
}

fn response_body(minimal: BlockInfo, upper: BlockInfo) -> NonexistenceResponseBody {
    NonexistenceResponseBody {
        minimal_block_timestamp: minimal.timestamp,
        upper_bound_block_number: upper.number,
        upper_bound_block_timestamp: upper.timestamp,
    }
}

/// True if `tx` is the payment the request claims never happened.
fn matches_request(tx: &IndexedTransaction, body: &NonexistenceRequestBody) -> bool {
    tx.payment_reference == body.standard_payment_reference
        && tx.destination_address_hash == body.destination_address_hash
        && tx.amount >= body.amount
        && (!body.check_source_addresses
            || source_addresses_root(&tx.source_addresses) == body.source_addresses_root)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::payment::indexer::InMemoryIndexer;
    use alloy_primitives::{B256, U256};

    const SOURCE: &str = "tb1qsource0000000000000000000000000000000";

    fn request() -> NonexistenceRequestBody {
        NonexistenceRequestBody {
            minimal_block_number: 100,
            deadline_block_number: 102,
            deadline_timestamp: 1_020,
            destination_address_hash: B256::repeat_byte(0xab),
            amount: U256::from(5_000u64),
            standard_payment_reference: B256::repeat_byte(0x11),
            check_source_addresses: false,
            source_addresses_root: B256::ZERO,
        }
    }

    fn chain(tip: u64) -> InMemoryIndexer {
        (95..=tip).fold(InMemoryIndexer::new(), |indexer, n| {
            indexer.with_block(n, n * 10)
        })
    }

    fn payment(block_number: u64, amount: u64) -> IndexedTransaction {
        IndexedTransaction {
            block_number,
            transaction_id: B256::repeat_byte(0x77),
            payment_reference: B256::repeat_byte(0x11),
            destination_address_hash: B256::repeat_byte(0xab),
            amount: U256::from(amount),
            source_addresses: vec![SOURCE.to_string()],
        }
    }

    fn checker(indexer: InMemoryIndexer) -> NonexistenceChecker<InMemoryIndexer> {
        NonexistenceChecker::new(indexer, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_no_payment_is_proven() {
        let verdict = checker(chain(110)).check(&request()).await;
        let NonexistenceVerdict::Proven(body) = verdict else {
            panic!("expected proof, got {verdict:?}");
        };
        assert_eq!(body.minimal_block_timestamp, 1_000);
        assert_eq!(body.upper_bound_block_number, 102);
        assert_eq!(body.upper_bound_block_timestamp, 1_020);
    }

    #[tokio::test]
    async fn test_timestamp_can_extend_window() {
        let mut body = request();
        body.deadline_timestamp = 1_045;
        let verdict = checker(chain(110)).check(&body).await;
        let NonexistenceVerdict::Proven(body) = verdict else {
            panic!("expected proof, got {verdict:?}");
        };
        assert_eq!(body.upper_bound_block_number, 105);
    }

    #[tokio::test]
    async fn test_matching_payment_is_found() {
        let indexer = chain(110).with_transaction(payment(101, 5_000));
        let verdict = checker(indexer).check(&request()).await;
        assert_eq!(verdict, NonexistenceVerdict::PaymentFound { block_number: 101 });
        assert_eq!(verdict.status(), AttestationStatus::Invalid);
    }

    #[tokio::test]
    async fn test_non_matching_payments_are_ignored() {
        let mut wrong_reference = payment(101, 9_000);
        wrong_reference.payment_reference = B256::repeat_byte(0x22);
        let mut wrong_destination = payment(101, 9_000);
        wrong_destination.destination_address_hash = B256::repeat_byte(0xcd);
        let indexer = chain(110)
            .with_transaction(payment(101, 4_999))
            .with_transaction(payment(103, 9_000))
            .with_transaction(wrong_reference)
            .with_transaction(wrong_destination);

        let verdict = checker(indexer).check(&request()).await;
        assert_eq!(verdict.status(), AttestationStatus::Valid);
    }

    #[tokio::test]
    async fn test_source_address_root() {
        let indexer = chain(110).with_transaction(payment(101, 5_000));
        let checker = checker(indexer);

        let mut body = request();
        body.check_source_addresses = true;
        body.source_addresses_root = B256::repeat_byte(0x99);
        assert_eq!(checker.check(&body).await.status(), AttestationStatus::Valid);

        body.source_addresses_root = source_addresses_root(&[SOURCE]);
        assert_eq!(checker.check(&body).await.status(), AttestationStatus::Invalid);
    }

    #[tokio::test]
    async fn test_missing_data_is_unavailable() {
        let verdict = checker(chain(101)).check(&request()).await;
        assert_eq!(verdict.status(), AttestationStatus::Indeterminate);

        let mut body = request();
        body.minimal_block_number = 90;
        let verdict = checker(chain(110)).check(&body).await;
        assert_eq!(verdict.status(), AttestationStatus::Indeterminate);
    }

    #[tokio::test]
    async fn test_gap_inside_window_is_unavailable() {
        // Block 101 is missing, and with it the payment it would hold.
        let indexer = (95..=110)
            .filter(|n| *n != 101)
            .fold(InMemoryIndexer::new(), |i, n| i.with_block(n, n * 10));
        let verdict = checker(indexer).check(&request()).await;
        assert_eq!(
            verdict,
            NonexistenceVerdict::Unavailable("block 101 is not indexed".to_string())
        );
        assert_eq!(verdict.status(), AttestationStatus::Indeterminate);
    }

    #[tokio::test]
    async fn test_inverted_window_beats_missing_data() {
        let mut body = request();
        body.minimal_block_number = 104;
        body.deadline_block_number = 103;
        body.deadline_timestamp = 1_000;
        // Indexed only to 101: block 103 and 104 are unknown.
        let verdict = checker(chain(101)).check(&body).await;
        assert_eq!(
            verdict,
            NonexistenceVerdict::EmptyWindow {
                minimal_block_number: 104,
                upper_bound_block_number: 103,
            }
        );
    }

    #[tokio::test]
    async fn test_single_block_window() {
        let mut body = request();
        body.minimal_block_number = 102;
        assert_eq!(
            checker(chain(110)).check(&body).await.status(),
            AttestationStatus::Valid
        );
    }
}
