//! CLI command implementations.

pub mod compact;
pub mod dump;
pub mod inspect;
pub mod prune;
pub mod verify;

use std::path::Path;
use tracing::warn;
use txrelay_store::{LogStore, StoreConfig, StoreResult, TailState};

/// Opens an existing store, reporting a discarded torn tail.
pub(crate) fn open_store(path: &Path) -> StoreResult<LogStore> {
    let store = LogStore::open(path, StoreConfig::new().create_if_missing(false))?;
    if let TailState::Torn {
        offset,
        discarded,
        reason,
    } = store.recovered_tail()
    {
        warn!(offset, discarded, %reason, "discarded torn tail while opening store");
    }
    Ok(store)
}
