//! Recovery of the on-disk log after restarts and crashes.

use std::fs::OpenOptions;
use std::io::Write;
use tempfile::tempdir;
use txrelay_store::{
    scan_log, Address, BlockRef, FeeFields, LogStore, StoreConfig, StoreError, StoredTransaction,
    TransactionStore, TxAction, TxStatus, H256,
};
use txrelay_storage::FileBackend;

fn record(nonce: u64, id: u8) -> StoredTransaction {
    let head = BlockRef::new(100, H256::new([1; 32]), 1_700_000_000);
    StoredTransaction {
        signer: Address::new([0x5a; 20]),
        nonce,
        tx_id: H256::new([id; 32]),
        raw_signed_tx: vec![id; 64],
        to: Address::new([0x77; 20]),
        value: 0,
        data: vec![0x12, 0x34],
        gas_limit: 90_000,
        chain_id: 5,
        fees: FeeFields::Eip1559 {
            max_fee_per_gas: 2_000_000_000,
            max_priority_fee_per_gas: 1_000_000_000,
        },
        action: TxAction::RelayCall,
        status: TxStatus::Created,
        creation_block: head,
        submitted_block: head,
        mined_block: None,
        attempts: 1,
        previous_tx_ids: Vec::new(),
        failed_broadcasts: 0,
    }
}

#[test]
fn records_survive_restart() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("store");

    {
        let store = LogStore::open(&path, StoreConfig::default()).unwrap();
        for nonce in 0..5 {
            store.put(&record(nonce, nonce as u8 + 1), false).unwrap();
        }
        let mut boosted = record(4, 99);
        boosted.attempts = 2;
        boosted.previous_tx_ids.push(H256::new([5; 32]));
        store.replace(&H256::new([5; 32]), &boosted).unwrap();
    }

    let store = LogStore::open(&path, StoreConfig::default()).unwrap();
    let all = store.get_all(None).unwrap();
    assert_eq!(all.len(), 5);
    assert_eq!(all[4].tx_id, H256::new([99; 32]));
    assert_eq!(all[4].previous_tx_ids, vec![H256::new([5; 32])]);
    assert_eq!(store.highest_nonce(&Address::new([0x5a; 20])).unwrap(), Some(4));
}

#[test]
fn crash_mid_append_loses_only_the_partial_record() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("store");

    {
        let store = LogStore::open(&path, StoreConfig::default()).unwrap();
        store.put(&record(0, 1), false).unwrap();
        store.put(&record(1, 2), false).unwrap();
    }

    // Simulate a crash half way through writing a third frame.
    let log_path = path.join("transactions.log");
    let intact = std::fs::metadata(&log_path).unwrap().len();
    {
        let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
        file.write_all(b"TXRL\x40\x00\x00\x00\x01").unwrap();
    }

    let store = LogStore::open(&path, StoreConfig::default()).unwrap();
    assert!(store.recovered_tail().is_torn());
    assert_eq!(store.get_all(None).unwrap().len(), 2);
    assert_eq!(std::fs::metadata(&log_path).unwrap().len(), intact);

    store.put(&record(2, 3), false).unwrap();
    drop(store);

    let store = LogStore::open(&path, StoreConfig::default()).unwrap();
    assert!(!store.recovered_tail().is_torn());
    assert_eq!(store.get_all(None).unwrap().len(), 3);
}

#[test]
fn damage_inside_the_log_refuses_to_open() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("store");

    {
        let store = LogStore::open(&path, StoreConfig::default()).unwrap();
        for nonce in 0..3 {
            store.put(&record(nonce, nonce as u8 + 1), false).unwrap();
        }
    }

    let log_path = path.join("transactions.log");
    let mut bytes = std::fs::read(&log_path).unwrap();
    bytes[30] ^= 0xff;
    std::fs::write(&log_path, &bytes).unwrap();

    let result = LogStore::open(&path, StoreConfig::default());
    assert!(matches!(result, Err(StoreError::Corrupted { offset: 0, .. })));
}

#[test]
fn compacted_log_scans_clean() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("store");

    {
        let store = LogStore::open(&path, StoreConfig::default()).unwrap();
        for id in 1..=10u8 {
            store.put(&record(0, id), true).unwrap();
        }
        store.put(&record(1, 50), false).unwrap();
        let stats = store.compact().unwrap();
        assert_eq!(stats.frames_before, 11);
        assert_eq!(stats.frames_after, 2);
    }

    let backend = FileBackend::open(&path.join("transactions.log")).unwrap();
    let scan = scan_log(&backend).unwrap();
    assert_eq!(scan.frames.len(), 2);
    assert!(!scan.tail.is_torn());
}

#[test]
fn missing_store_without_create() {
    let temp = tempdir().unwrap();
    let result = LogStore::open(
        &temp.path().join("nope"),
        StoreConfig::default().create_if_missing(false),
    );
    assert!(matches!(result, Err(StoreError::Missing { .. })));
}

#[test]
fn archival_keeps_records_past_either_bound_across_restart() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("store");

    {
        let store = LogStore::open(&path, StoreConfig::default()).unwrap();
        let mined_at = [(10, 100), (20, 200), (30, 300)];
        for (nonce, (number, timestamp)) in mined_at.into_iter().enumerate() {
            let mut tx = record(nonce as u64, nonce as u8 + 1);
            tx.status = TxStatus::Mined;
            tx.mined_block = Some(BlockRef::new(number, H256::default(), timestamp));
            store.put(&tx, false).unwrap();
        }
        store.put(&record(3, 4), false).unwrap();

        assert_eq!(store.remove_archived(20, 200).unwrap(), 2);
    }

    let store = LogStore::open(&path, StoreConfig::default()).unwrap();
    let all = store.get_all(None).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].mined_block.map(|block| block.number), Some(30));
    assert!(all[1].mined_block.is_none());
}
