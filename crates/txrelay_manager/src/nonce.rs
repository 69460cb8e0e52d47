//! Per-signer nonce counters.
//!
//! Each signer owns one async mutex. Holding it is the exclusive section in
//! which a nonce is allocated and its record persisted, and in which the
//! sweep replaces a record on boost. Different signers never contend.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use txrelay_store::Address;

/// State guarded by a signer's lock.
#[derive(Debug, Default)]
pub struct SignerSlot {
    /// Next nonce to hand out, once seeded from the store and the ledger.
    pub next: Option<u64>,
}

/// Lock registry and nonce cache for every signer.
#[derive(Debug, Default)]
pub struct NonceTracker {
    slots: Mutex<HashMap<Address, Arc<AsyncMutex<SignerSlot>>>>,
}

impl NonceTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `signer`'s slot.
    pub async fn lock(&self, signer: &Address) -> OwnedMutexGuard<SignerSlot> {
        let slot = Arc::clone(self.slots.lock().entry(*signer).or_default());
        slot.lock_owned().await
    }
}

/// Next nonce for a signer given what the store and the ledger know.
///
/// The store's view wins: a nonce persisted but not yet seen by the ledger
/// must not be handed out again. The ledger count only lifts the result when
/// it is ahead of everything stored.
#[must_use]
pub fn next_nonce(highest_stored: Option<u64>, ledger_count: u64) -> u64 {
    match highest_stored {
        Some(highest) => highest.saturating_add(1).max(ledger_count),
        None => ledger_count,
    }
}
