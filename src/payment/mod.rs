//! Referenced-payment non-existence verification.
//!
//! This module proves that a payment carrying a given reference did not
//! reach a destination within a block window:
//! 1. Close the window at the later of the deadline block and the first
//!    block at or after the deadline timestamp
//! 2. Reject inverted windows outright
//! 3. Scan the window through the indexer once every block in it is indexed
//!
//! # Architecture
//!
//! ```text
//! Non-existence request
//!        │
//!        ▼
//! ┌──────────────────────────┐
//! │ Block at/after deadline  │
//! │ timestamp                │
//! └─────────┬────────────────┘
//!           │
//!    ┌──────┴──────┐
//!    │             │
//!  FOUND       NOT INDEXED ──► INDETERMINATE
//!    │
//!    ▼
//! minimal > upper? ──yes──► INVALID
//!    │ no
//!    ▼
//! Every block indexed? ──no──► INDETERMINATE
//!    │ yes
//!    ▼
//! Scan [minimal, upper]
//!    │
//!    ├── match ──► INVALID
//!    └── none  ──► VALID
//! ```

mod indexer;
mod merkle;
mod nonexistence;

pub use indexer::{BlockInfo, InMemoryIndexer, IndexedTransaction, IndexerClient, IndexerSnapshot};
pub use merkle::source_addresses_root;
pub use nonexistence::{NonexistenceChecker, NonexistenceVerdict};
