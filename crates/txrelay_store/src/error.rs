//! Error types for the transaction store.

use crate::types::{Address, TxHash, TxStatus};
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a [`crate::TransactionStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend failed; nothing after the failing write is durable.
    #[error("storage error: {0}")]
    Storage(#[from] txrelay_storage::StorageError),

    /// Filesystem error outside the backend (directory, lock file).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A non-replacing put hit an occupied nonce slot.
    #[error("duplicate key: {signer} already has a record at nonce {nonce}")]
    DuplicateKey {
        /// Signer of the slot.
        signer: Address,
        /// Nonce of the slot.
        nonce: u64,
    },

    /// A compare-and-swap replace found a different attempt in the slot.
    #[error("conflict at {signer}#{nonce}: expected {expected}, found {found:?}")]
    Conflict {
        /// Signer of the slot.
        signer: Address,
        /// Nonce of the slot.
        nonce: u64,
        /// The attempt the caller based its update on.
        expected: TxHash,
        /// The attempt currently stored, if any.
        found: Option<TxHash>,
    },

    /// A compare-and-swap replace would clear or move the mined block of a
    /// record that is already mined.
    #[error("{signer}#{nonce} is already mined in block {block}")]
    AlreadyMined {
        /// Signer of the slot.
        signer: Address,
        /// Nonce of the slot.
        nonce: u64,
        /// Block the stored record was mined in.
        block: u64,
    },

    /// A compare-and-swap replace would move a record back in its lifecycle.
    #[error("{signer}#{nonce} is already {stored:?}, refusing to set {requested:?}")]
    StatusRegression {
        /// Signer of the slot.
        signer: Address,
        /// Nonce of the slot.
        nonce: u64,
        /// Status held by the store.
        stored: TxStatus,
        /// Status of the rejected replacement.
        requested: TxStatus,
    },

    /// Record (de)serialization failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The log holds a frame that cannot be a torn tail.
    #[error("log corrupted at offset {offset}: {message}")]
    Corrupted {
        /// Offset of the offending frame.
        offset: u64,
        /// What is wrong with it.
        message: String,
    },

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access")]
    Locked,

    /// The store directory does not exist and may not be created.
    #[error("no store at {path}")]
    Missing {
        /// Directory that was looked up.
        path: String,
    },
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupted {
            offset,
            message: message.into(),
        }
    }

    /// Creates a codec error from any displayable cause.
    pub fn codec(cause: impl std::fmt::Display) -> Self {
        Self::Codec(cause.to_string())
    }

    /// True for [`StoreError::DuplicateKey`]: the slot is taken, do not resend.
    #[must_use]
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }

    /// True when a compare-and-swap replace lost against a newer record:
    /// re-read the slot instead of retrying the write.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::AlreadyMined { .. } | Self::StatusRegression { .. }
        )
    }

    /// True when the storage layer itself failed.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Io(_))
    }
}
