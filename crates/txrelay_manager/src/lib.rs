//! # txrelay manager
//!
//! Sends transactions from a pool of worker keys without ever reusing or
//! skipping a nonce, and keeps them moving until they are mined.
//!
//! ## Flow
//!
//! 1. [`TransactionManager::recover`] seeds nonce counters from the store and
//!    the ledger and sweeps whatever a previous run left behind
//! 2. [`TransactionManager::send`] allocates a nonce under the signer's lock,
//!    signs, persists the record, and only then broadcasts
//! 3. [`TransactionManager::run_sweep_once`] (periodically, via
//!    [`TransactionManager::spawn_sweeper`]) marks mined records, rebroadcasts
//!    unaccepted ones, boosts stalled ones at the same nonce, and archives old
//!    mined records
//!
//! ## Seams
//!
//! The manager talks to the outside world through four traits:
//! [`LedgerGateway`], [`KeyManager`], [`FeeSource`] and
//! [`txrelay_store::TransactionStore`]. Rejection messages from the ledger are
//! mapped to a [`RejectionClass`] by a [`RejectionClassifier`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod fees;
mod keys;
mod ledger;
mod manager;
mod nonce;
mod sweep;
mod tx;

pub use config::ManagerConfig;
pub use error::{FeeError, LedgerError, ManagerError, ManagerResult, SigningError};
pub use fees::{bump_fees, cap_fees, min_bump, BumpOutcome, FeeSource};
pub use keys::KeyManager;
pub use ledger::{LedgerGateway, PatternClassifier, Receipt, RejectionClass, RejectionClassifier};
pub use manager::{ManagerStats, SendRequest, TransactionManager};
pub use nonce::{next_nonce, NonceTracker, SignerSlot};
pub use sweep::{is_stalled, SweepReport};
pub use tx::{tx_id_of, SignedTransaction, UnsignedTransaction};
