//! Test fixtures: records, temporary stores, and a wired-up manager.

use crate::fees::StaticFeeSource;
use crate::ledger::{block_at, MockLedger};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use crate::keys::DeterministicKeyManager;
use txrelay_manager::{KeyManager, ManagerConfig, TransactionManager};
use txrelay_store::{
    Address, BlockRef, FeeFields, LogStore, StoreConfig, StoreResult, StoredTransaction,
    TransactionStore, TxAction, TxHash, TxStatus, H256,
};

/// Seed of the worker keys used by [`RelayHarness`].
pub const WORKER_SEED: &[u8] = b"txrelay test workers";

/// Gas price [`RelayHarness`] suggests until told otherwise.
pub const DEFAULT_GAS_PRICE: u128 = 1_000_000_000;

/// A recognisable address.
#[must_use]
pub fn address(byte: u8) -> Address {
    Address::new([byte; 20])
}

/// Deterministic attempt id for `(signer, nonce, attempt)`.
#[must_use]
pub fn attempt_id(signer: &Address, nonce: u64, attempt: u32) -> TxHash {
    let mut id = [0u8; 32];
    id[..20].copy_from_slice(signer.as_bytes());
    id[20..28].copy_from_slice(&nonce.to_be_bytes());
    id[28..].copy_from_slice(&attempt.to_be_bytes());
    H256::new(id)
}

/// A `Created` record with one attempt, persisted at block 1.
#[must_use]
pub fn sample_record(signer: Address, nonce: u64) -> StoredTransaction {
    let tx_id = attempt_id(&signer, nonce, 1);
    StoredTransaction {
        signer,
        nonce,
        tx_id,
        raw_signed_tx: tx_id.as_bytes().to_vec(),
        to: address(0xee),
        value: 0,
        data: vec![0xde, 0xad, 0xbe, 0xef],
        gas_limit: 21_000,
        chain_id: 1,
        fees: FeeFields::Legacy {
            gas_price: DEFAULT_GAS_PRICE,
        },
        action: TxAction::RelayCall,
        status: TxStatus::Created,
        creation_block: block_at(1),
        submitted_block: block_at(1),
        mined_block: None,
        attempts: 1,
        previous_tx_ids: Vec::new(),
        failed_broadcasts: 0,
    }
}

/// `record` marked mined in `block`.
#[must_use]
pub fn mined(mut record: StoredTransaction, block: BlockRef) -> StoredTransaction {
    record.status = TxStatus::Mined;
    record.mined_block = Some(block);
    record
}

/// `record` replaced by its next attempt.
#[must_use]
pub fn boosted(record: &StoredTransaction) -> StoredTransaction {
    let mut next = record.clone();
    next.attempts += 1;
    next.previous_tx_ids.push(record.tx_id);
    next.tx_id = attempt_id(&record.signer, record.nonce, next.attempts);
    next.raw_signed_tx = next.tx_id.as_bytes().to_vec();
    next.status = TxStatus::Broadcast;
    next
}

/// A store directory that is deleted on drop.
pub struct TempStore {
    dir: TempDir,
}

impl TempStore {
    /// Creates an empty directory.
    ///
    /// # Panics
    ///
    /// Panics if no temporary directory can be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp directory"),
        }
    }

    /// Directory holding the log.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Opens a log store over the directory.
    ///
    /// # Errors
    ///
    /// Fails if a store is already open over the directory.
    pub fn open(&self) -> StoreResult<LogStore> {
        self.open_with(StoreConfig::default())
    }

    /// Opens a log store with `config`.
    ///
    /// # Errors
    ///
    /// Fails if a store is already open over the directory.
    pub fn open_with(&self, config: StoreConfig) -> StoreResult<LogStore> {
        LogStore::open(self.dir.path(), config)
    }
}

impl Default for TempStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Manager configuration for tests: chain 1, short broadcast timeout.
#[must_use]
pub fn test_config() -> ManagerConfig {
    ManagerConfig::new(1)
        .with_broadcast_timeout(Duration::from_millis(200))
        .with_sweep_interval(Duration::from_millis(50))
}

/// A manager wired to a [`MockLedger`], a [`StaticFeeSource`] and
/// deterministic worker keys.
pub struct RelayHarness {
    /// The manager under test.
    pub manager: Arc<TransactionManager>,
    /// Its ledger.
    pub ledger: Arc<MockLedger>,
    /// Its fee source.
    pub fees: Arc<StaticFeeSource>,
    /// Its keys.
    pub keys: Arc<DeterministicKeyManager>,
    /// Its store.
    pub store: Arc<dyn TransactionStore>,
}

impl RelayHarness {
    /// Wires a manager over `store` with `signers` worker keys.
    #[must_use]
    pub fn new(config: ManagerConfig, store: Arc<dyn TransactionStore>, signers: usize) -> Self {
        Self::from_parts(
            config,
            store,
            Arc::new(DeterministicKeyManager::new(WORKER_SEED, signers)),
            Arc::new(MockLedger::new()),
            Arc::new(StaticFeeSource::legacy(DEFAULT_GAS_PRICE)),
        )
    }

    /// A fresh manager over `store` that shares this harness's ledger, keys
    /// and fee source, as after a process restart.
    #[must_use]
    pub fn restart(&self, config: ManagerConfig, store: Arc<dyn TransactionStore>) -> Self {
        Self::from_parts(
            config,
            store,
            Arc::clone(&self.keys),
            Arc::clone(&self.ledger),
            Arc::clone(&self.fees),
        )
    }

    /// Wires a manager from existing collaborators.
    #[must_use]
    pub fn from_parts(
        config: ManagerConfig,
        store: Arc<dyn TransactionStore>,
        keys: Arc<DeterministicKeyManager>,
        ledger: Arc<MockLedger>,
        fees: Arc<StaticFeeSource>,
    ) -> Self {
        let manager = TransactionManager::new(
            config,
            Arc::clone(&store),
            keys.clone(),
            ledger.clone(),
            fees.clone(),
        );
        Self {
            manager: Arc::new(manager),
            ledger,
            fees,
            keys,
            store,
        }
    }

    /// Address of worker `index`.
    ///
    /// # Panics
    ///
    /// Panics if the harness has fewer workers.
    #[must_use]
    pub fn signer(&self, index: usize) -> Address {
        self.keys.address(index).expect("no such worker")
    }
}
