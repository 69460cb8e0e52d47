//! Error types for the transaction manager and its collaborators.

use crate::ledger::RejectionClass;
use std::time::Duration;
use thiserror::Error;
use txrelay_store::{Address, StoreError, TxHash};

/// Result type for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Errors reported by a [`crate::LedgerGateway`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger refused the transaction; the message is the ledger's own.
    #[error("rejected by ledger: {0}")]
    Rejected(String),

    /// The ledger could not be reached or answered garbage.
    #[error("ledger transport error: {0}")]
    Transport(String),
}

/// Errors reported by a [`crate::KeyManager`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    /// The key manager does not hold this signer.
    #[error("unknown signer {0}")]
    UnknownSigner(Address),

    /// The transaction could not be encoded for signing.
    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Errors reported by a [`crate::FeeSource`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeeError {
    /// No fee suggestion is available right now.
    #[error("fee source unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the [`crate::TransactionManager`].
#[derive(Error, Debug)]
pub enum ManagerError {
    /// The store failed; a send that hits this never broadcasts.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A ledger call other than the broadcast itself failed.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Signing failed.
    #[error("signing error: {0}")]
    Signing(#[from] SigningError),

    /// The fee source failed.
    #[error("fee error: {0}")]
    Fees(#[from] FeeError),

    /// `send` was called before startup recovery finished.
    #[error("transaction manager has not finished recovery")]
    NotRecovered,

    /// No worker key at this index.
    #[error("no worker key at index {index}")]
    UnknownSigner {
        /// Requested index.
        index: usize,
    },

    /// The ledger rejected a persisted transaction.
    ///
    /// The record stays in the store; transient classes are retried by the
    /// sweep.
    #[error("broadcast of {tx_id} rejected ({class}): {message}")]
    BroadcastRejected {
        /// Classification of the rejection.
        class: RejectionClass,
        /// The ledger's message.
        message: String,
        /// The persisted attempt.
        tx_id: TxHash,
    },

    /// The ledger did not answer the broadcast in time.
    ///
    /// The record stays in the store and the sweep takes it from here.
    #[error("broadcast of {tx_id} timed out after {after:?}")]
    BroadcastTimeout {
        /// The persisted attempt.
        tx_id: TxHash,
        /// The configured timeout.
        after: Duration,
    },

    /// The ledger shows the nonce consumed by a transaction we never sent.
    #[error("nonce {nonce} of {signer} was consumed by a foreign transaction")]
    ForeignNonceCollision {
        /// Signer of the slot.
        signer: Address,
        /// Nonce of the slot.
        nonce: u64,
    },

    /// The attempt ceiling or the fee cap stops further boosts.
    #[error("transaction {signer}#{nonce} is stuck after {attempts} attempts")]
    StuckTransaction {
        /// Signer of the slot.
        signer: Address,
        /// Nonce of the slot.
        nonce: u64,
        /// Attempts made.
        attempts: u32,
    },

    /// A blocking store task panicked or was cancelled.
    #[error("store task failed: {0}")]
    TaskJoin(String),
}

impl ManagerError {
    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger(LedgerError::Transport(_)) => true,
            Self::Fees(_) | Self::BroadcastTimeout { .. } => true,
            Self::BroadcastRejected { class, .. } => class.is_transient(),
            _ => false,
        }
    }

    /// Returns true if the store rejected a second record for a nonce slot.
    #[must_use]
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_duplicate_key())
    }
}
