//! Prune command implementation.

use super::open_store;
use crate::error::CliResult;
use std::path::Path;
use txrelay_store::TransactionStore;

/// Runs the prune command.
pub fn run(path: &Path, max_block: u64, max_timestamp: u64, dry_run: bool) -> CliResult<()> {
    let store = open_store(path)?;

    if dry_run {
        let archivable = store
            .get_all(None)?
            .into_iter()
            .filter(|tx| tx.is_archivable(max_block, max_timestamp))
            .count();
        println!(
            "Dry run - would delete {archivable} mined record(s) up to block {max_block} and timestamp {max_timestamp}"
        );
        return Ok(());
    }

    let removed = store.remove_archived(max_block, max_timestamp)?;
    println!(
        "✓ Deleted {removed} mined record(s) up to block {max_block} and timestamp {max_timestamp}"
    );
    if store.compaction_due() {
        println!("  The log has dead frames; run `compact` to reclaim space");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::compact;
    use crate::commands::fixtures::record;
    use tempfile::tempdir;
    use txrelay_store::{LogStore, StoreConfig, TxStatus};

    #[test]
    fn prune_then_compact_on_disk() {
        let dir = tempdir().unwrap();
        {
            let store = LogStore::open(dir.path(), StoreConfig::default()).unwrap();
            store.put(&record(1, 0, TxStatus::Mined, 1), false).unwrap();
            store.put(&record(1, 1, TxStatus::Mined, 2), false).unwrap();
            store.put(&record(1, 2, TxStatus::Broadcast, 1), false).unwrap();
        }

        run(dir.path(), 2, 24, true).unwrap();
        assert_eq!(open_store(dir.path()).unwrap().stats().live_records, 3);

        // Block 2 is inside the block bound but past the timestamp bound.
        run(dir.path(), 2, 23, false).unwrap();
        assert_eq!(open_store(dir.path()).unwrap().stats().live_records, 2);

        run(dir.path(), 2, 24, false).unwrap();
        compact::run(dir.path(), false).unwrap();

        let store = open_store(dir.path()).unwrap();
        let stats = store.stats();
        assert_eq!(stats.live_records, 1);
        assert_eq!(stats.physical_records, 1);
        assert_eq!(store.get_all(None).unwrap()[0].nonce, 2);
    }

    #[test]
    fn missing_store_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(run(&dir.path().join("absent"), 1, 1, false).is_err());
    }
}
