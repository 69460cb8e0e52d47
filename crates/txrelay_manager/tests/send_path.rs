//! Nonce allocation and the write-ahead send path.

use std::sync::Arc;
use std::time::Duration;
use txrelay_manager::{LedgerError, ManagerError, RejectionClass, SendRequest};
use txrelay_storage::InMemoryBackend;
use txrelay_store::{
    LogStore, MemoryStore, StoreConfig, TransactionStore, TxAction, TxStatus,
};
use txrelay_testkit::prelude::*;

fn memory_harness(signers: usize) -> RelayHarness {
    RelayHarness::new(test_config(), Arc::new(MemoryStore::new()), signers)
}

#[tokio::test]
async fn nonces_are_consecutive_per_signer() {
    let harness = memory_harness(2);
    harness.manager.recover().await.unwrap();

    for expected in 0..5 {
        let tx = harness
            .manager
            .send(0, address(9), 1, Vec::new(), TxAction::ValueTransfer)
            .await
            .unwrap();
        assert_eq!(tx.nonce, expected);
        assert_eq!(tx.signer, harness.signer(0));
        assert_eq!(tx.status, TxStatus::Broadcast);
    }

    let other = harness
        .manager
        .send(1, address(9), 1, Vec::new(), TxAction::ValueTransfer)
        .await
        .unwrap();
    assert_eq!(other.nonce, 0);
    assert_eq!(harness.manager.next_nonce(&harness.signer(0)).await, Some(5));
    assert_eq!(harness.manager.stats().sent, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sends_never_share_a_nonce() {
    let harness = memory_harness(1);
    harness.manager.recover().await.unwrap();

    let sends: Vec<_> = (0..20u8)
        .map(|i| {
            let manager = Arc::clone(&harness.manager);
            tokio::spawn(async move {
                manager
                    .send(0, address(i), 0, vec![i], TxAction::RelayCall)
                    .await
                    .unwrap()
                    .nonce
            })
        })
        .collect();

    let mut nonces = Vec::new();
    for send in sends {
        nonces.push(send.await.unwrap());
    }
    nonces.sort_unstable();
    assert_eq!(nonces, (0..20).collect::<Vec<_>>());
    assert_eq!(harness.ledger.pending_count(), 20);
}

#[tokio::test]
async fn nonce_starts_at_ledger_count() {
    let harness = memory_harness(1);
    harness.ledger.set_transaction_count(harness.signer(0), 7);
    harness.manager.recover().await.unwrap();

    let tx = harness
        .manager
        .send(0, address(9), 0, Vec::new(), TxAction::RelayCall)
        .await
        .unwrap();
    assert_eq!(tx.nonce, 7);
}

#[tokio::test]
async fn record_is_durable_before_broadcast() {
    let dir = TempStore::new();
    let harness = RelayHarness::new(test_config(), Arc::new(dir.open().unwrap()), 1);
    harness.manager.recover().await.unwrap();

    harness
        .ledger
        .fail_next_broadcast(LedgerError::Transport("connection reset".into()));
    let err = harness
        .manager
        .send(0, address(9), 5, vec![1, 2], TxAction::RelayCall)
        .await
        .unwrap_err();
    let ManagerError::BroadcastRejected { class, tx_id, .. } = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(class, RejectionClass::Unknown);
    assert_eq!(harness.ledger.broadcast_count(&tx_id), 1);

    let (keys, ledger, fees) = (
        Arc::clone(&harness.keys),
        Arc::clone(&harness.ledger),
        Arc::clone(&harness.fees),
    );
    drop(harness);

    let store = dir.open().unwrap();
    let stored = store.get_by_tx_id(&tx_id).unwrap().unwrap();
    assert_eq!(stored.nonce, 0);
    assert_eq!(stored.status, TxStatus::Created);
    assert_eq!(stored.data, vec![1, 2]);

    let restarted = RelayHarness::from_parts(test_config(), Arc::new(store), keys, ledger, fees);
    let report = restarted.manager.recover().await.unwrap();
    assert_eq!(report.rebroadcast, vec![stored.key()]);
    assert_eq!(restarted.ledger.broadcast_count(&tx_id), 2);
}

#[tokio::test]
async fn store_failure_means_no_broadcast() {
    let (backend, switch) = CrashableBackend::new(Box::new(InMemoryBackend::new()));
    let store = LogStore::with_backend(Box::new(backend), StoreConfig::default()).unwrap();
    let harness = RelayHarness::new(test_config(), Arc::new(store), 1);
    harness.manager.recover().await.unwrap();

    switch.fail_appends(true);
    let err = harness
        .manager
        .send(0, address(9), 0, Vec::new(), TxAction::RelayCall)
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::Store(_)), "{err}");

    switch.reset();
    switch.fail_syncs(true);
    let err = harness
        .manager
        .send(0, address(9), 0, Vec::new(), TxAction::RelayCall)
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::Store(_)), "{err}");

    assert_eq!(harness.ledger.total_broadcasts(), 0);
    assert!(harness.store.get_all(None).unwrap().is_empty());

    switch.reset();
    let tx = harness
        .manager
        .send(0, address(9), 0, Vec::new(), TxAction::RelayCall)
        .await
        .unwrap();
    assert_eq!(tx.nonce, 0);
}

#[tokio::test]
async fn send_before_recovery_is_refused() {
    let harness = memory_harness(1);
    let err = harness
        .manager
        .send(0, address(9), 0, Vec::new(), TxAction::RelayCall)
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::NotRecovered));
    assert!(!harness.manager.is_recovered());
    assert!(harness.store.get_all(None).unwrap().is_empty());
}

#[tokio::test]
async fn unknown_signer_index_is_refused() {
    let harness = memory_harness(1);
    harness.manager.recover().await.unwrap();
    let err = harness
        .manager
        .send(3, address(9), 0, Vec::new(), TxAction::RelayCall)
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::UnknownSigner { index: 3 }));
}

#[tokio::test]
async fn rejected_broadcast_keeps_its_nonce() {
    let harness = memory_harness(1);
    harness.manager.recover().await.unwrap();

    harness.ledger.fail_next_broadcast(LedgerError::Rejected(
        "insufficient funds for gas * price + value".into(),
    ));
    let err = harness
        .manager
        .send(0, address(9), 0, Vec::new(), TxAction::RelayCall)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ManagerError::BroadcastRejected {
            class: RejectionClass::InsufficientFunds,
            ..
        }
    ));
    assert!(!err.is_retryable());

    let pending = harness.manager.get_pending(None).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, TxStatus::Created);

    let next = harness
        .manager
        .send(0, address(9), 0, Vec::new(), TxAction::RelayCall)
        .await
        .unwrap();
    assert_eq!(next.nonce, 1);
    assert_eq!(harness.manager.stats().broadcast_failures, 1);
}

#[tokio::test]
async fn already_known_counts_as_accepted() {
    let harness = memory_harness(1);
    harness.manager.recover().await.unwrap();

    harness
        .ledger
        .fail_next_broadcast(LedgerError::Rejected("already known".into()));
    let tx = harness
        .manager
        .send(0, address(9), 0, Vec::new(), TxAction::RelayCall)
        .await
        .unwrap();
    assert_eq!(tx.status, TxStatus::Broadcast);
}

#[tokio::test]
async fn hung_broadcast_times_out() {
    let harness = memory_harness(1);
    harness.manager.recover().await.unwrap();
    harness
        .ledger
        .set_broadcast_delay(Some(Duration::from_millis(500)));

    let err = harness
        .manager
        .send(0, address(9), 0, Vec::new(), TxAction::RelayCall)
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::BroadcastTimeout { .. }));
    assert!(err.is_retryable());

    let stored = harness
        .store
        .get_by_nonce(&harness.signer(0), 0)
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TxStatus::Created);
}

#[tokio::test]
async fn explicit_gas_limit_is_kept() {
    let harness = memory_harness(1);
    harness.manager.recover().await.unwrap();

    let request = SendRequest::new(0, address(9), 0, vec![0xab], TxAction::RegisterServer)
        .with_gas_limit(250_000);
    let tx = harness.manager.submit(request).await.unwrap();
    assert_eq!(tx.gas_limit, 250_000);
    assert_eq!(tx.action, TxAction::RegisterServer);

    let default = harness
        .manager
        .send(0, address(9), 0, Vec::new(), TxAction::RelayCall)
        .await
        .unwrap();
    assert_eq!(default.gas_limit, harness.manager.config().default_gas_limit);
}

#[tokio::test]
async fn late_accept_does_not_undo_a_mined_record() {
    let harness = memory_harness(1);
    harness.manager.recover().await.unwrap();
    harness.ledger.set_reply_delay(Some(Duration::from_millis(150)));

    let send = {
        let manager = Arc::clone(&harness.manager);
        tokio::spawn(async move {
            manager
                .send(0, address(9), 1, Vec::new(), TxAction::ValueTransfer)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    harness.ledger.mine_block();
    let report = harness.manager.run_sweep_once().await.unwrap();
    assert_eq!(report.mined.len(), 1);

    let returned = send.await.unwrap().unwrap();
    assert!(returned.is_mined());

    let stored = harness
        .store
        .get_by_nonce(&harness.signer(0), 0)
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TxStatus::Mined);
    assert_eq!(stored.mined_block, returned.mined_block);

    harness.ledger.set_reply_delay(None);
    let again = harness.manager.run_sweep_once().await.unwrap();
    assert!(again.mined.is_empty());
    assert_eq!(harness.manager.stats().mined, 1);
}
