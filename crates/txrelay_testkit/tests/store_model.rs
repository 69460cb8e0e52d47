//! The log store behaves like the in-memory store under any sequence of
//! mutations, and replaying its log gives back the same content.

use proptest::prelude::*;
use std::collections::BTreeSet;
use txrelay_storage::InMemoryBackend;
use txrelay_store::{LogStore, MemoryStore, StoreConfig, StoreError, TransactionStore};
use txrelay_testkit::prelude::*;

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Done,
    Removed(usize),
    Duplicate,
    Conflict,
    Failed(String),
}

fn outcome<T>(result: Result<T, StoreError>, done: impl FnOnce(T) -> Outcome) -> Outcome {
    match result {
        Ok(value) => done(value),
        Err(StoreError::DuplicateKey { .. }) => Outcome::Duplicate,
        Err(err) if err.is_conflict() => Outcome::Conflict,
        Err(err) => Outcome::Failed(err.to_string()),
    }
}

fn apply(store: &dyn TransactionStore, op: &StoreOp) -> Outcome {
    match op {
        StoreOp::Put(tx, allow_replace) => outcome(store.put(tx, *allow_replace), |()| Outcome::Done),
        StoreOp::Replace(tx, stale) => {
            let current = store
                .get_by_nonce(&tx.signer, tx.nonce)
                .expect("read failed")
                .map(|current| current.tx_id);
            let expected = match current {
                Some(id) if !stale => id,
                _ => attempt_id(&tx.signer, tx.nonce, 999),
            };
            outcome(store.replace(&expected, tx), |()| Outcome::Done)
        }
        StoreOp::RemoveArchived(number, skew) => {
            let timestamp = block_at(*number).timestamp.saturating_add_signed(*skew);
            outcome(store.remove_archived(*number, timestamp), Outcome::Removed)
        }
        StoreOp::Compact => outcome(store.compact(), |_| Outcome::Done),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn log_store_matches_model(ops in prop::collection::vec(store_op_strategy(), 1..40)) {
        let backend = InMemoryBackend::new();
        let config = StoreConfig::new().compaction_threshold(4);
        let log = LogStore::with_backend(Box::new(backend.clone()), config.clone()).unwrap();
        let model = MemoryStore::new();

        for op in &ops {
            prop_assert_eq!(apply(&log, op), apply(&model, op), "diverged on {:?}", op);
        }

        let expected = model.get_all(None).unwrap();
        prop_assert_eq!(&log.get_all(None).unwrap(), &expected);

        let keys: BTreeSet<_> = expected.iter().map(|tx| tx.key()).collect();
        prop_assert_eq!(keys.len(), expected.len());
        for tx in &expected {
            let found = log.get_by_tx_id(&tx.tx_id).unwrap();
            prop_assert_eq!(found.as_ref(), Some(tx));
        }

        drop(log);
        let reopened = LogStore::with_backend(Box::new(backend), config).unwrap();
        prop_assert!(!reopened.recovered_tail().is_torn());
        prop_assert_eq!(reopened.get_all(None).unwrap(), expected);
    }

    #[test]
    fn archival_never_touches_unmined(ops in prop::collection::vec(store_op_strategy(), 1..30)) {
        let store = MemoryStore::new();
        for op in &ops {
            let pending_before: Vec<_> = store
                .get_all(None)
                .unwrap()
                .into_iter()
                .filter(|tx| !tx.is_mined())
                .collect();
            apply(&store, op);
            if let StoreOp::RemoveArchived(..) = op {
                let pending_after: Vec<_> = store
                    .get_all(None)
                    .unwrap()
                    .into_iter()
                    .filter(|tx| !tx.is_mined())
                    .collect();
                prop_assert_eq!(pending_before, pending_after);
            }
        }
    }
}
