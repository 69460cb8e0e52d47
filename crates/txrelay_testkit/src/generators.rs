//! Property-based test generators using proptest.

use crate::fixtures::{address, attempt_id, sample_record};
use crate::ledger::block_at;
use proptest::prelude::*;
use txrelay_store::{Address, FeeFields, StoredTransaction, TxAction, TxStatus};

/// A few signers, so random operations collide on nonce slots.
pub fn signer_strategy() -> impl Strategy<Value = Address> {
    prop::sample::select(vec![address(1), address(2), address(3)])
}

/// Legacy or EIP-1559 fees.
pub fn fees_strategy() -> impl Strategy<Value = FeeFields> {
    prop_oneof![
        (1u128..1_000_000).prop_map(|gas_price| FeeFields::Legacy { gas_price }),
        (1u128..1_000_000, 0u128..1_000).prop_map(|(max_fee, priority)| FeeFields::Eip1559 {
            max_fee_per_gas: max_fee.max(priority),
            max_priority_fee_per_gas: priority,
        }),
    ]
}

/// Records over a small nonce range, in any lifecycle state.
pub fn record_strategy() -> impl Strategy<Value = StoredTransaction> {
    (
        signer_strategy(),
        0u64..8,
        1u32..4,
        fees_strategy(),
        prop::option::of(1u64..50),
        prop::collection::vec(any::<u8>(), 0..64),
    )
        .prop_map(|(signer, nonce, attempts, fees, mined_at, data)| {
            let mut record = sample_record(signer, nonce);
            record.attempts = attempts;
            record.previous_tx_ids = (1..attempts)
                .map(|attempt| attempt_id(&signer, nonce, attempt))
                .collect();
            record.tx_id = attempt_id(&signer, nonce, attempts);
            record.raw_signed_tx = record.tx_id.as_bytes().to_vec();
            record.fees = fees;
            record.data = data;
            record.action = TxAction::RelayCall;
            if let Some(number) = mined_at {
                record.status = TxStatus::Mined;
                record.mined_block = Some(block_at(number));
            } else if attempts > 1 {
                record.status = TxStatus::Broadcast;
            }
            record
        })
}

/// One mutation of a transaction store.
#[derive(Debug, Clone)]
pub enum StoreOp {
    /// `put(tx, allow_replace)`.
    Put(StoredTransaction, bool),
    /// Compare-and-swap against whatever the slot currently holds, or a
    /// stale id when `stale` is set.
    Replace(StoredTransaction, bool),
    /// `remove_archived` up to mock block `n` and its timestamp plus a skew.
    RemoveArchived(u64, i64),
    /// `compact`.
    Compact,
}

/// Random store mutations.
pub fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        4 => (record_strategy(), any::<bool>()).prop_map(|(tx, replace)| StoreOp::Put(tx, replace)),
        2 => (record_strategy(), prop::bool::weighted(0.2))
            .prop_map(|(tx, stale)| StoreOp::Replace(tx, stale)),
        1 => (0u64..60, -30i64..30).prop_map(|(n, skew)| StoreOp::RemoveArchived(n, skew)),
        1 => Just(StoreOp::Compact),
    ]
}
