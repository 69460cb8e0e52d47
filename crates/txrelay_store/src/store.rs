//! The store contract shared by the in-memory and log-backed stores.

use crate::error::{StoreError, StoreResult};
use crate::transaction::StoredTransaction;
use crate::types::{Address, BlockRef, TxHash, TxStatus};

/// Counters describing the physical state of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Records visible to readers.
    pub live_records: usize,
    /// Frames in the backing log, dead ones included.
    pub physical_records: usize,
    /// Superseded puts and tombstones still occupying the log.
    pub dead_records: usize,
    /// Size of the backing log in bytes.
    pub log_bytes: u64,
    /// Compactions run since the store was opened.
    pub compactions: u64,
}

/// Result of one compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Frames before the pass.
    pub frames_before: usize,
    /// Frames after the pass; equals the live record count.
    pub frames_after: usize,
    /// Log size before the pass.
    pub bytes_before: u64,
    /// Log size after the pass.
    pub bytes_after: u64,
}

impl CompactionStats {
    /// Frames dropped by the pass.
    #[must_use]
    pub const fn frames_removed(&self) -> usize {
        self.frames_before.saturating_sub(self.frames_after)
    }
}

/// Durable storage of [`StoredTransaction`] records.
///
/// Implementations are shared between the send path and the sweep, so every
/// method takes `&self` and does its own locking.
pub trait TransactionStore: Send + Sync {
    /// Inserts `tx` into its `(signer, nonce)` slot.
    ///
    /// With `allow_replace == false` an occupied slot yields
    /// [`crate::StoreError::DuplicateKey`] and nothing changes. With
    /// `allow_replace == true` the slot is overwritten atomically.
    ///
    /// # Errors
    ///
    /// Any error means the record is not durable.
    fn put(&self, tx: &StoredTransaction, allow_replace: bool) -> StoreResult<()>;

    /// Overwrites the slot of `tx` only if it still holds `expected_tx_id`.
    ///
    /// Records only move forward: a replacement with an earlier status than
    /// the stored one is refused, and a mined record keeps its mined block,
    /// even when the attempt matches.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::Conflict`] when the slot is empty or holds
    /// another attempt, [`crate::StoreError::AlreadyMined`] when the stored
    /// record is mined and `tx` disagrees,
    /// [`crate::StoreError::StatusRegression`] when `tx` would move the record
    /// backwards, or any storage error.
    fn replace(&self, expected_tx_id: &TxHash, tx: &StoredTransaction) -> StoreResult<()>;

    /// Looks up the record whose current attempt is `tx_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read back.
    fn get_by_tx_id(&self, tx_id: &TxHash) -> StoreResult<Option<StoredTransaction>>;

    /// Looks up the record in a nonce slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read back.
    fn get_by_nonce(&self, signer: &Address, nonce: u64) -> StoreResult<Option<StoredTransaction>>;

    /// Returns records in ascending nonce order, optionally for one signer.
    ///
    /// Records of different signers at the same nonce are ordered by signer.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be read back.
    fn get_all(&self, signer: Option<&Address>) -> StoreResult<Vec<StoredTransaction>>;

    /// Highest nonce held for `signer`, mined or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn highest_nonce(&self, signer: &Address) -> StoreResult<Option<u64>> {
        Ok(self.get_all(Some(signer))?.last().map(|tx| tx.nonce))
    }

    /// Deletes every mined record with `number <= max_block_number` AND
    /// `timestamp <= max_timestamp`. Returns how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletions could not be made durable; the store
    /// is then unchanged.
    fn remove_archived(&self, max_block_number: u64, max_timestamp: u64) -> StoreResult<usize>;

    /// Removes every record.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset could not be made durable.
    fn clear_all(&self) -> StoreResult<()>;

    /// Whether enough dead records accumulated to make compaction worthwhile.
    fn compaction_due(&self) -> bool;

    /// Rewrites the backing log to hold only live records. Writes made while
    /// the live records are copied are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the rewrite failed; the previous log stays valid.
    fn compact(&self) -> StoreResult<CompactionStats>;

    /// Current counters.
    fn stats(&self) -> StoreStats;
}

/// Orders records the way [`TransactionStore::get_all`] promises.
/// What a slot holds, as far as a compare-and-swap cares.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlotState {
    pub tx_id: TxHash,
    pub status: TxStatus,
    pub mined: Option<BlockRef>,
}

impl From<&StoredTransaction> for SlotState {
    fn from(tx: &StoredTransaction) -> Self {
        Self {
            tx_id: tx.tx_id,
            status: tx.status,
            mined: tx.mined_block,
        }
    }
}

/// Compare-and-swap precondition shared by the stores.
pub(crate) fn check_replace(
    tx: &StoredTransaction,
    expected_tx_id: &TxHash,
    current: Option<SlotState>,
) -> StoreResult<()> {
    match current {
        Some(slot) if slot.tx_id != *expected_tx_id => Err(StoreError::Conflict {
            signer: tx.signer,
            nonce: tx.nonce,
            expected: *expected_tx_id,
            found: Some(slot.tx_id),
        }),
        Some(SlotState {
            mined: Some(mined), ..
        }) if tx.mined_block != Some(mined) => Err(StoreError::AlreadyMined {
            signer: tx.signer,
            nonce: tx.nonce,
            block: mined.number,
        }),
        Some(slot) if tx.status < slot.status => Err(StoreError::StatusRegression {
            signer: tx.signer,
            nonce: tx.nonce,
            stored: slot.status,
            requested: tx.status,
        }),
        Some(_) => Ok(()),
        None => Err(StoreError::Conflict {
            signer: tx.signer,
            nonce: tx.nonce,
            expected: *expected_tx_id,
            found: None,
        }),
    }
}

pub(crate) fn sort_by_nonce(records: &mut [StoredTransaction]) {
    records.sort_by(|a, b| (a.nonce, a.signer).cmp(&(b.nonce, b.signer)));
}
