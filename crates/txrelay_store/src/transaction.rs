//! The persisted transaction record.

use crate::types::{hex_bytes, Address, BlockRef, FeeFields, TxAction, TxHash, TxStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a nonce slot: at most one live record per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxKey {
    /// Worker key owning the slot.
    pub signer: Address,
    /// Ledger sequence number.
    pub nonce: u64,
}

impl TxKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(signer: Address, nonce: u64) -> Self {
        Self { signer, nonce }
    }
}

impl fmt::Display for TxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.signer, self.nonce)
    }
}

/// One transaction attempt for a `(signer, nonce)` slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTransaction {
    /// Worker key that owns this nonce slot.
    pub signer: Address,
    /// Ledger sequence number for `signer`.
    pub nonce: u64,
    /// Hash of `raw_signed_tx`; changes on every boost.
    pub tx_id: TxHash,
    /// Signed bytes as broadcast.
    #[serde(with = "hex_bytes")]
    pub raw_signed_tx: Vec<u8>,
    /// Destination.
    pub to: Address,
    /// Transferred value.
    pub value: u128,
    /// Call data.
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    /// Gas limit of every attempt.
    pub gas_limit: u64,
    /// Chain the transaction is bound to.
    pub chain_id: u64,
    /// Fees of the current attempt.
    pub fees: FeeFields,
    /// Why the transaction exists.
    pub action: TxAction,
    /// Lifecycle position.
    pub status: TxStatus,
    /// Ledger head when the record was first persisted.
    pub creation_block: BlockRef,
    /// Ledger head when the current attempt was persisted.
    pub submitted_block: BlockRef,
    /// Block the transaction was mined in, once observed.
    pub mined_block: Option<BlockRef>,
    /// Number of attempts, the original included.
    pub attempts: u32,
    /// Ids of attempts replaced by boosts, oldest first.
    #[serde(default)]
    pub previous_tx_ids: Vec<TxHash>,
    /// Broadcasts of a never-accepted record that the ledger refused or left
    /// unanswered.
    #[serde(default)]
    pub failed_broadcasts: u32,
}

impl StoredTransaction {
    /// The nonce slot this record occupies.
    #[must_use]
    pub const fn key(&self) -> TxKey {
        TxKey::new(self.signer, self.nonce)
    }

    /// Returns true once a receipt was observed.
    #[must_use]
    pub const fn is_mined(&self) -> bool {
        self.mined_block.is_some()
    }

    /// Attempts plus failed broadcasts: what the attempt ceiling counts.
    #[must_use]
    pub const fn submissions(&self) -> u32 {
        self.attempts.saturating_add(self.failed_broadcasts)
    }

    /// Every id this slot was ever broadcast under, newest first.
    pub fn attempt_ids(&self) -> impl Iterator<Item = &TxHash> {
        std::iter::once(&self.tx_id).chain(self.previous_tx_ids.iter().rev())
    }

    /// Whether archival with the given bounds deletes this record.
    ///
    /// Both bounds must hold; unmined records are never archivable.
    #[must_use]
    pub fn is_archivable(&self, max_block_number: u64, max_timestamp: u64) -> bool {
        self.mined_block.is_some_and(|block| {
            block.number <= max_block_number && block.timestamp <= max_timestamp
        })
    }
}
