//! An in-process ledger.
//!
//! [`MockLedger`] understands the raw format of
//! [`crate::DeterministicKeyManager`] and behaves like a node with a
//! mempool: one pending transaction per `(sender, nonce)`, replacements only
//! with a high enough fee bump, and blocks that include consecutive nonces.
//! Blocks are produced on demand with [`MockLedger::mine_block`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use crate::keys::RawEnvelope;
use txrelay_manager::{min_bump, tx_id_of, LedgerError, LedgerGateway, Receipt};
use txrelay_store::{Address, BlockRef, TxHash, H256};

/// Seconds between mock blocks.
pub const BLOCK_TIME: u64 = 12;

/// Timestamp of the genesis block.
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

/// Fee bump a replacement needs, in percent.
pub const REPLACEMENT_BUMP_PERCENT: u32 = 10;

#[derive(Debug, Clone)]
struct PendingTx {
    tx_id: TxHash,
    price: u128,
}

#[derive(Debug)]
struct LedgerState {
    head: BlockRef,
    confirmed: HashMap<Address, u64>,
    mempool: BTreeMap<(Address, u64), PendingTx>,
    receipts: HashMap<TxHash, Receipt>,
    broadcasts: HashMap<TxHash, usize>,
    scripted: VecDeque<LedgerError>,
    min_gas_price: u128,
    mining_paused: bool,
}

/// Hash of mock block `number`.
#[must_use]
pub fn block_hash(number: u64) -> H256 {
    let mut hash = [0u8; 32];
    hash[24..].copy_from_slice(&number.to_be_bytes());
    H256::new(hash)
}

/// Mock block `number` at the regular block time.
#[must_use]
pub fn block_at(number: u64) -> BlockRef {
    BlockRef::new(
        number,
        block_hash(number),
        GENESIS_TIMESTAMP + number * BLOCK_TIME,
    )
}

/// A scriptable ledger for tests.
#[derive(Debug)]
pub struct MockLedger {
    state: Mutex<LedgerState>,
    broadcast_delay: Mutex<Option<Duration>>,
    reply_delay: Mutex<Option<Duration>>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    /// A ledger at block 1 with no history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                head: block_at(1),
                confirmed: HashMap::new(),
                mempool: BTreeMap::new(),
                receipts: HashMap::new(),
                broadcasts: HashMap::new(),
                scripted: VecDeque::new(),
                min_gas_price: 0,
                mining_paused: false,
            }),
            broadcast_delay: Mutex::new(None),
            reply_delay: Mutex::new(None),
        }
    }

    /// Pretends `address` already had `count` transactions mined.
    pub fn set_transaction_count(&self, address: Address, count: u64) {
        self.state.lock().confirmed.insert(address, count);
    }

    /// Refuses transactions priced below `price` as underpriced.
    pub fn set_min_gas_price(&self, price: u128) {
        self.state.lock().min_gas_price = price;
    }

    /// Produces empty blocks while paused.
    pub fn pause_mining(&self, paused: bool) {
        self.state.lock().mining_paused = paused;
    }

    /// Delays every broadcast; longer than the manager's timeout means a hang.
    pub fn set_broadcast_delay(&self, delay: Option<Duration>) {
        *self.broadcast_delay.lock() = delay;
    }

    /// Accepts broadcasts at once but answers only after `delay`.
    pub fn set_reply_delay(&self, delay: Option<Duration>) {
        *self.reply_delay.lock() = delay;
    }

    /// Fails the next broadcast with `error`. Calls queue up.
    pub fn fail_next_broadcast(&self, error: LedgerError) {
        self.state.lock().scripted.push_back(error);
    }

    /// Consumes `signer`'s next nonce with a transaction nobody here sent.
    ///
    /// Returns the consumed nonce.
    pub fn consume_nonce_externally(&self, signer: &Address) -> u64 {
        let mut state = self.state.lock();
        let head = state.head;
        let nonce = state.confirmed.get(signer).copied().unwrap_or(0);
        state.mempool.remove(&(*signer, nonce));
        state.confirmed.insert(*signer, nonce + 1);

        let mut foreign = [0xf0; 32];
        foreign[..20].copy_from_slice(signer.as_bytes());
        foreign[24..].copy_from_slice(&nonce.to_be_bytes());
        let tx_id = H256::new(foreign);
        state.receipts.insert(tx_id, Receipt { tx_id, block: head });
        nonce
    }

    /// Advances the head by one block and includes every pending transaction
    /// whose nonce is next in line for its sender. Returns the included ids.
    pub fn mine_block(&self) -> Vec<TxHash> {
        let mut state = self.state.lock();
        let head = block_at(state.head.number + 1);
        state.head = head;
        if state.mining_paused {
            return Vec::new();
        }

        let senders: Vec<Address> = {
            let mut senders: Vec<Address> = state.mempool.keys().map(|(from, _)| *from).collect();
            senders.dedup();
            senders
        };

        let mut included = Vec::new();
        for from in senders {
            loop {
                let next = state.confirmed.get(&from).copied().unwrap_or(0);
                let Some(pending) = state.mempool.remove(&(from, next)) else {
                    break;
                };
                state.confirmed.insert(from, next + 1);
                state.receipts.insert(
                    pending.tx_id,
                    Receipt {
                        tx_id: pending.tx_id,
                        block: head,
                    },
                );
                included.push(pending.tx_id);
            }
        }
        included
    }

    /// Mines `count` blocks.
    pub fn mine_blocks(&self, count: u64) {
        for _ in 0..count {
            self.mine_block();
        }
    }

    /// Current head.
    #[must_use]
    pub fn head(&self) -> BlockRef {
        self.state.lock().head
    }

    /// How often `tx_id` was submitted, accepted or not.
    #[must_use]
    pub fn broadcast_count(&self, tx_id: &TxHash) -> usize {
        self.state.lock().broadcasts.get(tx_id).copied().unwrap_or(0)
    }

    /// Submissions of any transaction.
    #[must_use]
    pub fn total_broadcasts(&self) -> usize {
        self.state.lock().broadcasts.values().sum()
    }

    /// Id waiting in the mempool for `(signer, nonce)`.
    #[must_use]
    pub fn pending_tx(&self, signer: &Address, nonce: u64) -> Option<TxHash> {
        self.state
            .lock()
            .mempool
            .get(&(*signer, nonce))
            .map(|pending| pending.tx_id)
    }

    /// Transactions waiting in the mempool.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().mempool.len()
    }

    /// Mined transactions of `signer`.
    #[must_use]
    pub fn confirmed_count(&self, signer: &Address) -> u64 {
        self.state.lock().confirmed.get(signer).copied().unwrap_or(0)
    }

    /// Whether `tx_id` has a receipt.
    #[must_use]
    pub fn is_mined(&self, tx_id: &TxHash) -> bool {
        self.state.lock().receipts.contains_key(tx_id)
    }

    fn accept(&self, raw: &[u8]) -> Result<TxHash, LedgerError> {
        let tx_id = tx_id_of(raw);
        let mut state = self.state.lock();
        *state.broadcasts.entry(tx_id).or_default() += 1;

        if let Some(error) = state.scripted.pop_front() {
            return Err(error);
        }

        let envelope = RawEnvelope::decode(raw)
            .map_err(|e| LedgerError::Rejected(format!("invalid transaction: {e}")))?;
        let (from, nonce) = (envelope.from, envelope.tx.nonce);
        let price = envelope.tx.fees.max_price();

        if state.receipts.contains_key(&tx_id) {
            return Err(LedgerError::Rejected("already known".into()));
        }
        if nonce < state.confirmed.get(&from).copied().unwrap_or(0) {
            return Err(LedgerError::Rejected("nonce too low".into()));
        }
        if price < state.min_gas_price {
            return Err(LedgerError::Rejected("transaction underpriced".into()));
        }
        if let Some(pending) = state.mempool.get(&(from, nonce)) {
            if pending.tx_id == tx_id {
                return Err(LedgerError::Rejected("already known".into()));
            }
            if price < min_bump(pending.price, REPLACEMENT_BUMP_PERCENT) {
                return Err(LedgerError::Rejected(
                    "replacement transaction underpriced".into(),
                ));
            }
        }

        state.mempool.insert((from, nonce), PendingTx { tx_id, price });
        Ok(tx_id)
    }
}

#[async_trait]
impl LedgerGateway for MockLedger {
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, LedgerError> {
        let delay = *self.broadcast_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let accepted = self.accept(raw);
        let reply = *self.reply_delay.lock();
        if let Some(reply) = reply {
            tokio::time::sleep(reply).await;
        }
        accepted
    }

    async fn transaction_count(&self, address: &Address) -> Result<u64, LedgerError> {
        Ok(self.confirmed_count(address))
    }

    async fn receipt(&self, tx_id: &TxHash) -> Result<Option<Receipt>, LedgerError> {
        Ok(self.state.lock().receipts.get(tx_id).copied())
    }

    async fn current_block(&self) -> Result<BlockRef, LedgerError> {
        Ok(self.head())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::DeterministicKeyManager;
    use txrelay_manager::{KeyManager, UnsignedTransaction};
    use txrelay_store::FeeFields;

    fn signed(keys: &DeterministicKeyManager, nonce: u64, gas_price: u128) -> (Vec<u8>, TxHash) {
        let signer = keys.address(0).unwrap();
        let tx = UnsignedTransaction {
            nonce,
            to: Address::new([7; 20]),
            value: 0,
            data: Vec::new(),
            gas_limit: 21_000,
            chain_id: 1,
            fees: FeeFields::Legacy { gas_price },
        };
        let signed = keys.sign(&signer, &tx).unwrap();
        (signed.raw, signed.tx_id)
    }

    #[tokio::test]
    async fn mines_consecutive_nonces_only() {
        let ledger = MockLedger::new();
        let keys = DeterministicKeyManager::new(b"ledger", 1);
        let signer = keys.address(0).unwrap();

        let (raw0, id0) = signed(&keys, 0, 100);
        let (raw2, id2) = signed(&keys, 2, 100);
        ledger.send_raw_transaction(&raw0).await.unwrap();
        ledger.send_raw_transaction(&raw2).await.unwrap();

        assert_eq!(ledger.mine_block(), vec![id0]);
        assert_eq!(ledger.confirmed_count(&signer), 1);
        assert!(!ledger.is_mined(&id2));
        assert_eq!(ledger.head().number, 2);
    }

    #[tokio::test]
    async fn replacement_rules() {
        let ledger = MockLedger::new();
        let keys = DeterministicKeyManager::new(b"ledger", 1);

        let (raw, _) = signed(&keys, 0, 100);
        ledger.send_raw_transaction(&raw).await.unwrap();
        assert_eq!(
            ledger.send_raw_transaction(&raw).await.unwrap_err(),
            LedgerError::Rejected("already known".into())
        );

        let (cheap, _) = signed(&keys, 0, 105);
        assert_eq!(
            ledger.send_raw_transaction(&cheap).await.unwrap_err(),
            LedgerError::Rejected("replacement transaction underpriced".into())
        );

        let (bumped, bumped_id) = signed(&keys, 0, 110);
        ledger.send_raw_transaction(&bumped).await.unwrap();
        assert_eq!(ledger.mine_block(), vec![bumped_id]);

        let (late, _) = signed(&keys, 0, 500);
        assert_eq!(
            ledger.send_raw_transaction(&late).await.unwrap_err(),
            LedgerError::Rejected("nonce too low".into())
        );
        assert_eq!(ledger.total_broadcasts(), 5);
    }

    #[tokio::test]
    async fn foreign_consumption_advances_count() {
        let ledger = MockLedger::new();
        let keys = DeterministicKeyManager::new(b"ledger", 1);
        let signer = keys.address(0).unwrap();

        let (raw, _) = signed(&keys, 0, 100);
        ledger.send_raw_transaction(&raw).await.unwrap();
        assert_eq!(ledger.consume_nonce_externally(&signer), 0);
        assert_eq!(ledger.pending_count(), 0);
        assert_eq!(ledger.transaction_count(&signer).await.unwrap(), 1);
    }
}
