//! A deterministic key manager and the raw format it signs into.
//!
//! Signatures here are keyed hashes that only [`crate::MockLedger`] checks.
//! They stand in for real secp256k1 signing in tests.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use txrelay_manager::{KeyManager, SignedTransaction, SigningError, UnsignedTransaction};
use txrelay_store::{Address, H256};

/// The self-describing raw format produced by [`DeterministicKeyManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEnvelope {
    /// Signer address.
    pub from: Address,
    /// The signed transaction.
    pub tx: UnsignedTransaction,
    /// Keyed hash over the CBOR encoding of `tx`.
    pub signature: H256,
}

impl RawEnvelope {
    /// Encodes the envelope as CBOR.
    pub fn encode(&self) -> Result<Vec<u8>, SigningError> {
        let mut raw = Vec::new();
        ciborium::ser::into_writer(self, &mut raw)
            .map_err(|e| SigningError::Encoding(e.to_string()))?;
        Ok(raw)
    }

    /// Decodes raw bytes produced by [`RawEnvelope::encode`].
    pub fn decode(raw: &[u8]) -> Result<Self, SigningError> {
        ciborium::de::from_reader(raw).map_err(|e| SigningError::Encoding(e.to_string()))
    }
}

struct WorkerKey {
    secret: [u8; 32],
    address: Address,
}

/// Derives worker keys from a seed with SHA-256.
///
/// The same seed and count always give the same addresses, so a restarted
/// harness finds its records again.
pub struct DeterministicKeyManager {
    keys: Vec<WorkerKey>,
}

impl DeterministicKeyManager {
    /// Derives `count` keys from `seed`.
    #[must_use]
    pub fn new(seed: &[u8], count: usize) -> Self {
        let keys = (0..count as u64)
            .map(|index| {
                let secret: [u8; 32] = Sha256::new()
                    .chain_update(seed)
                    .chain_update(index.to_be_bytes())
                    .finalize()
                    .into();
                let public = Sha256::digest(secret);
                let mut address = [0u8; 20];
                address.copy_from_slice(&public[12..]);
                WorkerKey {
                    secret,
                    address: Address::new(address),
                }
            })
            .collect();
        Self { keys }
    }

    fn key(&self, signer: &Address) -> Option<&WorkerKey> {
        self.keys.iter().find(|key| key.address == *signer)
    }
}

impl fmt::Debug for DeterministicKeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeterministicKeyManager")
            .field("addresses", &self.addresses())
            .finish()
    }
}

impl KeyManager for DeterministicKeyManager {
    fn address(&self, index: usize) -> Option<Address> {
        self.keys.get(index).map(|key| key.address)
    }

    fn addresses(&self) -> Vec<Address> {
        self.keys.iter().map(|key| key.address).collect()
    }

    fn sign(&self, signer: &Address, tx: &UnsignedTransaction) -> Result<SignedTransaction, SigningError> {
        let key = self.key(signer).ok_or(SigningError::UnknownSigner(*signer))?;

        let mut body = Vec::new();
        ciborium::ser::into_writer(tx, &mut body)
            .map_err(|e| SigningError::Encoding(e.to_string()))?;
        let signature: [u8; 32] = Sha256::new()
            .chain_update(key.secret)
            .chain_update(&body)
            .finalize()
            .into();

        let raw = RawEnvelope {
            from: key.address,
            tx: tx.clone(),
            signature: H256::new(signature),
        }
        .encode()?;
        Ok(SignedTransaction::from_raw(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txrelay_store::FeeFields;

    fn unsigned(nonce: u64, gas_price: u128) -> UnsignedTransaction {
        UnsignedTransaction {
            nonce,
            to: Address::new([9; 20]),
            value: 1,
            data: vec![1, 2, 3],
            gas_limit: 21_000,
            chain_id: 1,
            fees: FeeFields::Legacy { gas_price },
        }
    }

    #[test]
    fn same_seed_same_addresses() {
        let a = DeterministicKeyManager::new(b"relay seed", 3);
        let b = DeterministicKeyManager::new(b"relay seed", 3);
        let c = DeterministicKeyManager::new(b"other seed", 3);

        assert_eq!(a.addresses(), b.addresses());
        assert_ne!(a.addresses(), c.addresses());
        assert_eq!(a.addresses().len(), 3);
        assert!(a.address(3).is_none());
    }

    #[test]
    fn signing_is_deterministic_and_fee_sensitive() {
        let keys = DeterministicKeyManager::new(b"seed", 2);
        let signer = keys.address(0).unwrap();

        let first = keys.sign(&signer, &unsigned(0, 10)).unwrap();
        let again = keys.sign(&signer, &unsigned(0, 10)).unwrap();
        let bumped = keys.sign(&signer, &unsigned(0, 11)).unwrap();

        assert_eq!(first, again);
        assert_ne!(first.tx_id, bumped.tx_id);

        let envelope = RawEnvelope::decode(&first.raw).unwrap();
        assert_eq!(envelope.from, signer);
        assert_eq!(envelope.tx, unsigned(0, 10));
    }

    #[test]
    fn unknown_signer_is_refused() {
        let keys = DeterministicKeyManager::new(b"seed", 1);
        let stranger = Address::new([0xcc; 20]);
        assert_eq!(
            keys.sign(&stranger, &unsigned(0, 1)).unwrap_err(),
            SigningError::UnknownSigner(stranger)
        );
    }

    #[test]
    fn envelope_decode_rejects_garbage() {
        assert!(RawEnvelope::decode(&[0xff, 0x00, 0x13]).is_err());
    }
}
