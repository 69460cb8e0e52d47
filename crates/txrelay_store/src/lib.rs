//! # txrelay store
//!
//! Durable persistence for relayed transactions.
//!
//! The store holds one [`StoredTransaction`] per `(signer, nonce)`. A record
//! is written before the transaction is broadcast, replaced in place when the
//! transaction is boosted, marked mined once a receipt shows up, and deleted
//! once it falls behind the retention horizon.
//!
//! Two implementations share the [`TransactionStore`] contract:
//!
//! - [`MemoryStore`] - plain maps, for tests and dry runs
//! - [`LogStore`] - an append-only, checksummed log over a
//!   [`txrelay_storage::StorageBackend`], rebuilt on open and compacted when
//!   dead frames pile up
//!
//! ## Key Invariants
//!
//! - At most one live record per `(signer, nonce)`
//! - A non-replacing put on an occupied slot fails with
//!   [`StoreError::DuplicateKey`] and leaves the store untouched
//! - A put has reached durable storage when it returns `Ok`
//! - Archival only ever removes records that carry a mined block

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod log;
mod memory;
mod store;
mod transaction;
mod types;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use log::{scan_log, Frame, FrameKind, LogScan, LogStore, StoreDir, TailState};
pub use memory::MemoryStore;
pub use store::{CompactionStats, StoreStats, TransactionStore};
pub use transaction::{StoredTransaction, TxKey};
pub use types::{Address, BlockHash, BlockRef, FeeFields, TxAction, TxHash, TxStatus, H256};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
