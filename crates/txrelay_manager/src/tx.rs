//! Unsigned and signed transactions.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use txrelay_store::{Address, FeeFields, TxHash, H256};

/// A transaction ready to be signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    /// Sequence number of the signer.
    pub nonce: u64,
    /// Destination.
    pub to: Address,
    /// Transferred value.
    pub value: u128,
    /// Call data.
    pub data: Vec<u8>,
    /// Gas limit.
    pub gas_limit: u64,
    /// Chain the signature is bound to.
    pub chain_id: u64,
    /// Fees offered.
    pub fees: FeeFields,
}

/// Signed raw bytes plus their id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    /// Bytes handed to the ledger.
    pub raw: Vec<u8>,
    /// Content hash of `raw`.
    pub tx_id: TxHash,
}

impl SignedTransaction {
    /// Wraps raw bytes, computing their id.
    #[must_use]
    pub fn from_raw(raw: Vec<u8>) -> Self {
        let tx_id = tx_id_of(&raw);
        Self { raw, tx_id }
    }
}

/// Content hash of raw transaction bytes.
#[must_use]
pub fn tx_id_of(raw: &[u8]) -> TxHash {
    H256::new(Sha256::digest(raw).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_id_depends_on_every_byte() {
        let a = SignedTransaction::from_raw(vec![1, 2, 3]);
        let b = SignedTransaction::from_raw(vec![1, 2, 4]);
        assert_ne!(a.tx_id, b.tx_id);
        assert_eq!(a.tx_id, tx_id_of(&[1, 2, 3]));
    }
}
