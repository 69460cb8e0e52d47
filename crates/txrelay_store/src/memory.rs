//! In-memory transaction store.

use crate::error::{StoreError, StoreResult};
use crate::store::{
    check_replace, sort_by_nonce, CompactionStats, SlotState, StoreStats, TransactionStore,
};
use crate::transaction::{StoredTransaction, TxKey};
use crate::types::{Address, TxHash};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct Maps {
    by_key: BTreeMap<TxKey, StoredTransaction>,
    by_id: HashMap<TxHash, TxKey>,
}

impl Maps {
    fn insert(&mut self, tx: &StoredTransaction) {
        if let Some(old) = self.by_key.insert(tx.key(), tx.clone()) {
            self.by_id.remove(&old.tx_id);
        }
        self.by_id.insert(tx.tx_id, tx.key());
    }
}

/// A [`TransactionStore`] that keeps everything in memory.
///
/// Nothing survives a restart; compaction is a no-op. Useful for tests and
/// for dry runs against a live ledger.
#[derive(Debug, Default)]
pub struct MemoryStore {
    maps: RwLock<Maps>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionStore for MemoryStore {
    fn put(&self, tx: &StoredTransaction, allow_replace: bool) -> StoreResult<()> {
        let mut maps = self.maps.write();
        if !allow_replace && maps.by_key.contains_key(&tx.key()) {
            return Err(StoreError::DuplicateKey {
                signer: tx.signer,
                nonce: tx.nonce,
            });
        }
        maps.insert(tx);
        Ok(())
    }

    fn replace(&self, expected_tx_id: &TxHash, tx: &StoredTransaction) -> StoreResult<()> {
        let mut maps = self.maps.write();
        check_replace(tx, expected_tx_id, maps.by_key.get(&tx.key()).map(SlotState::from))?;
        maps.insert(tx);
        Ok(())
    }

    fn get_by_tx_id(&self, tx_id: &TxHash) -> StoreResult<Option<StoredTransaction>> {
        let maps = self.maps.read();
        Ok(maps
            .by_id
            .get(tx_id)
            .and_then(|key| maps.by_key.get(key))
            .cloned())
    }

    fn get_by_nonce(&self, signer: &Address, nonce: u64) -> StoreResult<Option<StoredTransaction>> {
        Ok(self.maps.read().by_key.get(&TxKey::new(*signer, nonce)).cloned())
    }

    fn get_all(&self, signer: Option<&Address>) -> StoreResult<Vec<StoredTransaction>> {
        let maps = self.maps.read();
        let mut all: Vec<_> = match signer {
            Some(signer) => maps
                .by_key
                .range(TxKey::new(*signer, 0)..=TxKey::new(*signer, u64::MAX))
                .map(|(_, tx)| tx.clone())
                .collect(),
            None => maps.by_key.values().cloned().collect(),
        };
        sort_by_nonce(&mut all);
        Ok(all)
    }

    fn remove_archived(&self, max_block_number: u64, max_timestamp: u64) -> StoreResult<usize> {
        let mut maps = self.maps.write();
        let before = maps.by_key.len();
        let Maps { by_key, by_id } = &mut *maps;
        by_key.retain(|_, tx| {
            let keep = !tx.is_archivable(max_block_number, max_timestamp);
            if !keep {
                by_id.remove(&tx.tx_id);
            }
            keep
        });
        Ok(before - by_key.len())
    }

    fn clear_all(&self) -> StoreResult<()> {
        *self.maps.write() = Maps::default();
        Ok(())
    }

    fn compaction_due(&self) -> bool {
        false
    }

    fn compact(&self) -> StoreResult<CompactionStats> {
        let live = self.maps.read().by_key.len();
        Ok(CompactionStats {
            frames_before: live,
            frames_after: live,
            bytes_before: 0,
            bytes_after: 0,
        })
    }

    fn stats(&self) -> StoreStats {
        let live = self.maps.read().by_key.len();
        StoreStats {
            live_records: live,
            physical_records: live,
            ..StoreStats::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockRef, FeeFields, TxAction, TxStatus, H256};

    fn record(nonce: u64, id: u8, mined_at: Option<(u64, u64)>) -> StoredTransaction {
        let head = BlockRef::new(1, H256::default(), 1);
        StoredTransaction {
            signer: Address::new([1; 20]),
            nonce,
            tx_id: H256::new([id; 32]),
            raw_signed_tx: vec![id],
            to: Address::default(),
            value: 0,
            data: Vec::new(),
            gas_limit: 21_000,
            chain_id: 1,
            fees: FeeFields::Legacy { gas_price: 1 },
            action: TxAction::ValueTransfer,
            status: if mined_at.is_some() {
                TxStatus::Mined
            } else {
                TxStatus::Broadcast
            },
            creation_block: head,
            submitted_block: head,
            mined_block: mined_at.map(|(n, t)| BlockRef::new(n, H256::default(), t)),
            attempts: 1,
            previous_tx_ids: Vec::new(),
            failed_broadcasts: 0,
        }
    }

    #[test]
    fn duplicate_key_leaves_store_untouched() {
        let store = MemoryStore::new();
        store.put(&record(0, 1, None), false).unwrap();
        assert!(store.put(&record(0, 2, None), false).unwrap_err().is_duplicate_key());
        assert_eq!(store.get_all(None).unwrap().len(), 1);
        assert!(store.get_by_tx_id(&H256::new([2; 32])).unwrap().is_none());
    }

    #[test]
    fn archival_example() {
        let store = MemoryStore::new();
        store.put(&record(0, 1, Some((10, 1000))), false).unwrap();
        store.put(&record(1, 2, Some((20, 2000))), false).unwrap();
        store.put(&record(2, 3, Some((30, 3000))), false).unwrap();

        assert_eq!(store.remove_archived(25, 1500).unwrap(), 1);
        let left: Vec<u64> = store.get_all(None).unwrap().iter().map(|tx| tx.nonce).collect();
        assert_eq!(left, vec![1, 2]);
        assert!(store.get_by_tx_id(&H256::new([1; 32])).unwrap().is_none());
    }

    #[test]
    fn mined_record_keeps_its_block() {
        let store = MemoryStore::new();
        let pending = record(0, 1, None);
        store.put(&pending, false).unwrap();
        let done = record(0, 1, Some((5, 500)));
        store.replace(&pending.tx_id, &done).unwrap();

        let err = store.replace(&pending.tx_id, &pending).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyMined { block: 5, .. }));
        assert_eq!(store.get_by_nonce(&done.signer, 0).unwrap(), Some(done));
    }

    #[test]
    fn clear_all_removes_everything() {
        let store = MemoryStore::new();
        store.put(&record(0, 1, None), false).unwrap();
        store.clear_all().unwrap();
        assert_eq!(store.stats().live_records, 0);
        assert!(store.get_by_tx_id(&H256::new([1; 32])).unwrap().is_none());
    }
}
