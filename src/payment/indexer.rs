//! Indexer query client.
//!
//! The non-existence checker reads confirmed blocks and transactions through
//! [`IndexerClient`]. Queries are read-only. "Not indexed" is an `Ok(None)`,
//! not an error: it means the data may show up later.

use crate::error::{Error, Result};
use crate::types::u256_decimal;
use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use tracing::info;

/// A confirmed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Block height.
    pub number: u64,
    /// Block timestamp in seconds.
    pub timestamp: u64,
}

/// A confirmed transaction as the indexer exposes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedTransaction {
    /// Height of the containing block.
    pub block_number: u64,
    /// Transaction id.
    pub transaction_id: B256,
    /// Standard payment reference carried by the transaction.
    pub payment_reference: B256,
    /// Hash of the receiving address.
    pub destination_address_hash: B256,
    /// Amount received by the destination.
    #[serde(with = "u256_decimal")]
    pub amount: U256,
    /// Spending addresses.
    #[serde(default)]
    pub source_addresses: Vec<String>,
}

/// Read-only queries against a chain indexer.
pub trait IndexerClient: Send + Sync {
    /// The block at `number`, if indexed.
    fn block_at(&self, number: u64) -> impl Future<Output = Result<Option<BlockInfo>>> + Send;

    /// The lowest indexed block whose timestamp is at least `timestamp`.
    fn first_block_at_or_after(
        &self,
        timestamp: u64,
    ) -> impl Future<Output = Result<Option<BlockInfo>>> + Send;

    /// The lowest height in `from..=to` that is not indexed, if any.
    fn first_missing_block(
        &self,
        from: u64,
        to: u64,
    ) -> impl Future<Output = Result<Option<u64>>> + Send;

    /// Every transaction in blocks `from..=to`.
    fn transactions_in_range(
        &self,
        from: u64,
        to: u64,
    ) -> impl Future<Output = Result<Vec<IndexedTransaction>>> + Send;
}

/// Serialized indexer contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexerSnapshot {
    /// Indexed blocks.
    pub blocks: Vec<BlockInfo>,
    /// Indexed transactions.
    #[serde(default)]
    pub transactions: Vec<IndexedTransaction>,
}

/// Indexer backed by an in-memory snapshot.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIndexer {
    blocks: BTreeMap<u64, BlockInfo>,
    transactions: BTreeMap<u64, Vec<IndexedTransaction>>,
}

impl InMemoryIndexer {
    /// Create an empty indexer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an indexer from a snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction refers to a block the snapshot does
    /// not contain.
    pub fn from_snapshot(snapshot: IndexerSnapshot) -> Result<Self> {
        let mut indexer = Self::new();
        for block in snapshot.blocks {
            indexer.blocks.insert(block.number, block);
        }
        for tx in snapshot.transactions {
            if !indexer.blocks.contains_key(&tx.block_number) {
                return Err(Error::Indexer(format!(
                    "transaction {} is in unknown block {}",
                    tx.transaction_id, tx.block_number
                )));
            }
            indexer.transactions.entry(tx.block_number).or_default().push(tx);
        }
        Ok(indexer)
    }

    /// Load a JSON snapshot from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid
    /// snapshot.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: IndexerSnapshot = serde_json::from_str(&content)?;
        let indexer = Self::from_snapshot(snapshot)?;
        info!(
            "Loaded indexer snapshot from {} ({} blocks, tip {:?})",
            path.display(),
            indexer.blocks.len(),
            indexer.tip()
        );
        Ok(indexer)
    }

    /// Add a block.
    #[must_use]
    pub fn with_block(mut self, number: u64, timestamp: u64) -> Self {
        self.blocks.insert(number, BlockInfo { number, timestamp });
        self
    }

    /// Add a transaction. Its block should be added as well.
    #[must_use]
    pub fn with_transaction(mut self, tx: IndexedTransaction) -> Self {
        self.transactions.entry(tx.block_number).or_default().push(tx);
        self
    }

    /// Highest indexed block number.
    #[must_use]
    pub fn tip(&self) -> Option<u64> {
        self.blocks.keys().next_back().copied()
    }
}

impl IndexerClient for InMemoryIndexer {
    async fn block_at(&self, number: u64) -> Result<Option<BlockInfo>> {
        Ok(self.blocks.get(&number).copied())
    }

    async fn first_block_at_or_after(&self, timestamp: u64) -> Result<Option<BlockInfo>> {
        Ok(self
            .blocks
            .values()
            .find(|block| block.timestamp >= timestamp)
            .copied())
    }

    async fn first_missing_block(&self, from: u64, to: u64) -> Result<Option<u64>> {
        if from > to {
            return Ok(None);
        }
        let mut expected = from;
        for number in self.blocks.range(from..=to).map(|(number, _)| *number) {
            if number != expected {
                return Ok(Some(expected));
            }
            match number.checked_add(1) {
                Some(next) => expected = next,
                None => return Ok(None),
            }
        }
        Ok((expected <= to).then_some(expected))
    }

    async fn transactions_in_range(&self, from: u64, to: u64) -> Result<Vec<IndexedTransaction>> {
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self
            .transactions
            .range(from..=to)
            .flat_map(|(_, txs)| txs.iter().cloned())
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn tx(block_number: u64, reference: u8) -> IndexedTransaction {
        IndexedTransaction {
            block_number,
            transaction_id: B256::repeat_byte(reference.wrapping_add(100)),
            payment_reference: B256::repeat_byte(reference),
            destination_address_hash: B256::repeat_byte(0xab),
            amount: U256::from(1000u64),
            source_addresses: vec!["tb1qsource".to_string()],
        }
    }

    #[tokio::test]
    async fn test_block_queries() {
        let indexer = InMemoryIndexer::new()
            .with_block(10, 1000)
            .with_block(11, 1600)
            .with_block(12, 1500);

        assert_eq!(indexer.tip(), Some(12));
        assert_eq!(indexer.block_at(11).await.unwrap().unwrap().timestamp, 1600);
        assert!(indexer.block_at(13).await.unwrap().is_none());

        // Lowest height wins even when a later block has an earlier timestamp.
        let first = indexer.first_block_at_or_after(1500).await.unwrap().unwrap();
        assert_eq!(first.number, 11);
        assert!(indexer.first_block_at_or_after(1601).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transactions_in_range_is_inclusive() {
        let indexer = InMemoryIndexer::new()
            .with_block(1, 10)
            .with_block(2, 20)
            .with_block(3, 30)
            .with_transaction(tx(1, 1))
            .with_transaction(tx(2, 2))
            .with_transaction(tx(3, 3));

        let txs = indexer.transactions_in_range(2, 3).await.unwrap();
        assert_eq!(txs.len(), 2);
        assert!(indexer.transactions_in_range(3, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_missing_block() {
        let indexer = [10, 11, 13, 14]
            .into_iter()
            .fold(InMemoryIndexer::new(), |i, n| i.with_block(n, n * 10));

        assert_eq!(indexer.first_missing_block(10, 11).await.unwrap(), None);
        assert_eq!(indexer.first_missing_block(10, 14).await.unwrap(), Some(12));
        assert_eq!(indexer.first_missing_block(9, 11).await.unwrap(), Some(9));
        assert_eq!(indexer.first_missing_block(13, 15).await.unwrap(), Some(15));
        assert_eq!(indexer.first_missing_block(14, 13).await.unwrap(), None);

        let top = InMemoryIndexer::new().with_block(u64::MAX, 1);
        assert_eq!(top.first_missing_block(u64::MAX, u64::MAX).await.unwrap(), None);
    }

    #[test]
    fn test_snapshot_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let snapshot = IndexerSnapshot {
            blocks: vec![BlockInfo {
                number: 5,
                timestamp: 50,
            }],
            transactions: vec![tx(5, 9)],
        };
        std::fs::write(&path, serde_json::to_string(&snapshot).unwrap()).unwrap();

        let indexer = InMemoryIndexer::from_file(&path).unwrap();
        assert_eq!(indexer.tip(), Some(5));
    }

    #[test]
    fn test_snapshot_rejects_orphan_transaction() {
        let snapshot = IndexerSnapshot {
            blocks: Vec::new(),
            transactions: vec![tx(5, 9)],
        };
        assert!(matches!(
            InMemoryIndexer::from_snapshot(snapshot),
            Err(Error::Indexer(_))
        ));
    }
}
