//! Worker keys.

use crate::error::SigningError;
use crate::tx::{SignedTransaction, UnsignedTransaction};
use txrelay_store::Address;

/// Holds the worker signing keys.
///
/// Implementations must reproduce the same address set across restarts, or
/// the manager will not find the records of its own signers again.
pub trait KeyManager: Send + Sync {
    /// Address of the key at `index`.
    fn address(&self, index: usize) -> Option<Address>;

    /// Every managed address, by index.
    fn addresses(&self) -> Vec<Address>;

    /// Signs `tx` with the key of `signer`.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::UnknownSigner`] if `signer` is not managed here.
    fn sign(&self, signer: &Address, tx: &UnsignedTransaction) -> Result<SignedTransaction, SigningError>;
}
