//! The transaction manager: nonce allocation, write-ahead send, recovery.

use crate::config::ManagerConfig;
use crate::error::{LedgerError, ManagerError, ManagerResult};
use crate::fees::{cap_fees, FeeSource};
use crate::keys::KeyManager;
use crate::ledger::{LedgerGateway, PatternClassifier, RejectionClass, RejectionClassifier};
use crate::nonce::{next_nonce, NonceTracker, SignerSlot};
use crate::sweep::SweepReport;
use crate::tx::UnsignedTransaction;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use txrelay_store::{
    Address, StoreResult, StoredTransaction, TransactionStore, TxAction, TxHash, TxStatus,
};

/// A request to send a transaction from one of the worker keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    /// Index of the worker key in the key manager.
    pub signer_index: usize,
    /// Destination.
    pub to: Address,
    /// Transferred value.
    pub value: u128,
    /// Call data.
    pub data: Vec<u8>,
    /// Why the transaction is sent.
    pub action: TxAction,
    /// Gas limit; the configured default when `None`.
    pub gas_limit: Option<u64>,
}

impl SendRequest {
    /// Creates a request using the default gas limit.
    #[must_use]
    pub fn new(signer_index: usize, to: Address, value: u128, data: Vec<u8>, action: TxAction) -> Self {
        Self {
            signer_index,
            to,
            value,
            data,
            action,
            gas_limit: None,
        }
    }

    /// Sets an explicit gas limit.
    #[must_use]
    pub const fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }
}

/// Counters of what the manager has done since it was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Records persisted by the send path.
    pub sent: u64,
    /// Broadcasts that were rejected or timed out.
    pub broadcast_failures: u64,
    /// `Created` records broadcast again by the sweep.
    pub rebroadcasts: u64,
    /// Replacement attempts.
    pub boosts: u64,
    /// Records observed mined.
    pub mined: u64,
    /// Records deleted by archival.
    pub archived: u64,
    /// Stuck-transaction reports.
    pub stuck_reports: u64,
    /// Foreign nonce collision reports.
    pub foreign_collisions: u64,
    /// Completed sweeps.
    pub sweeps: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub sent: AtomicU64,
    pub broadcast_failures: AtomicU64,
    pub rebroadcasts: AtomicU64,
    pub boosts: AtomicU64,
    pub mined: AtomicU64,
    pub archived: AtomicU64,
    pub stuck_reports: AtomicU64,
    pub foreign_collisions: AtomicU64,
    pub sweeps: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ManagerStats {
        let get = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        ManagerStats {
            sent: get(&self.sent),
            broadcast_failures: get(&self.broadcast_failures),
            rebroadcasts: get(&self.rebroadcasts),
            boosts: get(&self.boosts),
            mined: get(&self.mined),
            archived: get(&self.archived),
            stuck_reports: get(&self.stuck_reports),
            foreign_collisions: get(&self.foreign_collisions),
            sweeps: get(&self.sweeps),
        }
    }
}

/// What a broadcast attempt came to.
#[derive(Debug)]
pub(crate) enum BroadcastOutcome {
    /// The ledger holds the transaction.
    Accepted,
    /// The ledger refused it.
    Rejected {
        class: RejectionClass,
        message: String,
    },
    /// No answer in time.
    TimedOut,
}

/// Allocates nonces, persists records before broadcasting them, and keeps
/// pending records moving until they are mined and archived.
///
/// # Example
///
/// ```rust,ignore
/// let manager = Arc::new(TransactionManager::new(config, store, keys, ledger, fees));
/// manager.recover().await?;
/// let sweeper = Arc::clone(&manager).spawn_sweeper(shutdown.clone());
///
/// let record = manager
///     .send(0, recipient, 0, call_data, TxAction::RelayCall)
///     .await?;
/// ```
pub struct TransactionManager {
    pub(crate) config: ManagerConfig,
    pub(crate) store: Arc<dyn TransactionStore>,
    pub(crate) keys: Arc<dyn KeyManager>,
    pub(crate) ledger: Arc<dyn LedgerGateway>,
    pub(crate) fees: Arc<dyn FeeSource>,
    pub(crate) classifier: Arc<dyn RejectionClassifier>,
    pub(crate) nonces: NonceTracker,
    pub(crate) counters: Counters,
    pub(crate) sweep_lock: AsyncMutex<()>,
    recovered: AtomicBool,
}

impl TransactionManager {
    /// Builds a manager. It refuses to send until [`Self::recover`] ran.
    pub fn new(
        config: ManagerConfig,
        store: Arc<dyn TransactionStore>,
        keys: Arc<dyn KeyManager>,
        ledger: Arc<dyn LedgerGateway>,
        fees: Arc<dyn FeeSource>,
    ) -> Self {
        Self {
            config,
            store,
            keys,
            ledger,
            fees,
            classifier: Arc::new(PatternClassifier::default()),
            nonces: NonceTracker::new(),
            counters: Counters::default(),
            sweep_lock: AsyncMutex::new(()),
            recovered: AtomicBool::new(false),
        }
    }

    /// Replaces the default rejection classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn RejectionClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Counters since construction.
    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        self.counters.snapshot()
    }

    /// Whether startup recovery completed.
    #[must_use]
    pub fn is_recovered(&self) -> bool {
        self.recovered.load(Ordering::Acquire)
    }

    /// Startup recovery.
    ///
    /// Seeds every signer's nonce counter from the store and the ledger, then
    /// runs one sweep so records left behind by a crash are rebroadcast,
    /// marked mined, or reported as displaced before new sends are accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or the ledger cannot be read.
    pub async fn recover(&self) -> ManagerResult<SweepReport> {
        for signer in self.keys.addresses() {
            let mut slot = self.nonces.lock(&signer).await;
            let next = self.seed_nonce(&signer).await?;
            slot.next = Some(next);
        }

        let report = self.run_sweep_once().await?;
        self.recovered.store(true, Ordering::Release);
        info!(
            signers = self.keys.addresses().len(),
            mined = report.mined.len(),
            rebroadcast = report.rebroadcast.len(),
            foreign = report.foreign_collisions.len(),
            "transaction manager recovered"
        );
        Ok(report)
    }

    /// Next nonce `signer` would get, if its counter has been seeded.
    pub async fn next_nonce(&self, signer: &Address) -> Option<u64> {
        self.nonces.lock(signer).await.next
    }

    /// Sends `value`/`data` to `to` from the worker key at `signer_index`.
    ///
    /// See [`Self::submit`].
    ///
    /// # Errors
    ///
    /// See [`Self::submit`].
    pub async fn send(
        &self,
        signer_index: usize,
        to: Address,
        value: u128,
        data: Vec<u8>,
        action: TxAction,
    ) -> ManagerResult<StoredTransaction> {
        self.submit(SendRequest::new(signer_index, to, value, data, action))
            .await
    }

    /// Allocates a nonce, signs, persists, then broadcasts.
    ///
    /// Nothing is broadcast unless the record is durable first. Once it is,
    /// the record belongs to the sweep: a rejected or timed out broadcast is
    /// reported to the caller but the record keeps its nonce and is retried.
    ///
    /// # Errors
    ///
    /// - [`ManagerError::NotRecovered`] before [`Self::recover`] ran
    /// - [`ManagerError::Store`] if the record could not be persisted; nothing
    ///   was broadcast
    /// - [`ManagerError::BroadcastRejected`] or
    ///   [`ManagerError::BroadcastTimeout`] after the record was persisted
    pub async fn submit(&self, request: SendRequest) -> ManagerResult<StoredTransaction> {
        if !self.is_recovered() {
            return Err(ManagerError::NotRecovered);
        }
        let signer = self
            .keys
            .address(request.signer_index)
            .ok_or(ManagerError::UnknownSigner {
                index: request.signer_index,
            })?;

        let record = {
            let mut slot = self.nonces.lock(&signer).await;
            self.persist_new(&mut slot, signer, request).await?
        };

        info!(
            signer = %record.signer,
            nonce = record.nonce,
            tx_id = %record.tx_id,
            action = %record.action,
            "transaction persisted"
        );

        match self.broadcast(&record.raw_signed_tx).await {
            BroadcastOutcome::Accepted => self.mark_broadcast(record).await,
            BroadcastOutcome::Rejected { class, message } => {
                Counters::bump(&self.counters.broadcast_failures, 1);
                if class.is_transient() {
                    warn!(
                        signer = %record.signer,
                        nonce = record.nonce,
                        tx_id = %record.tx_id,
                        %class,
                        message = %message,
                        "broadcast rejected; sweep will retry"
                    );
                } else {
                    error!(
                        signer = %record.signer,
                        nonce = record.nonce,
                        tx_id = %record.tx_id,
                        %class,
                        message = %message,
                        "broadcast rejected"
                    );
                }
                Err(ManagerError::BroadcastRejected {
                    class,
                    message,
                    tx_id: record.tx_id,
                })
            }
            BroadcastOutcome::TimedOut => {
                Counters::bump(&self.counters.broadcast_failures, 1);
                warn!(
                    signer = %record.signer,
                    nonce = record.nonce,
                    tx_id = %record.tx_id,
                    "broadcast timed out; sweep will retry"
                );
                Err(ManagerError::BroadcastTimeout {
                    tx_id: record.tx_id,
                    after: self.config.broadcast_timeout,
                })
            }
        }
    }

    /// Records that have not been seen mined, ascending nonce.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn get_pending(&self, signer: Option<Address>) -> ManagerResult<Vec<StoredTransaction>> {
        let all = self
            .with_store(move |store| store.get_all(signer.as_ref()))
            .await?;
        Ok(all.into_iter().filter(|tx| !tx.is_mined()).collect())
    }

    /// Runs [`Self::run_sweep_once`] every `sweep_interval` until `shutdown`
    /// is cancelled.
    pub fn spawn_sweeper(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; recovery already swept.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        info!("transaction sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match self.run_sweep_once().await {
                            Ok(report) if report.is_quiet() => debug!("sweep found nothing to do"),
                            Ok(report) => info!(
                                mined = report.mined.len(),
                                boosted = report.boosted.len(),
                                rebroadcast = report.rebroadcast.len(),
                                stuck = report.stuck.len(),
                                foreign = report.foreign_collisions.len(),
                                archived = report.archived,
                                errors = report.errors.len(),
                                "sweep finished"
                            ),
                            Err(err) => error!(error = %err, "sweep failed"),
                        }
                    }
                }
            }
        })
    }

    /// Seeds a signer's counter. Caller holds the signer's lock.
    async fn seed_nonce(&self, signer: &Address) -> ManagerResult<u64> {
        let owner = *signer;
        let highest = self
            .with_store(move |store| store.highest_nonce(&owner))
            .await?;
        let ledger_count = self.ledger.transaction_count(signer).await?;
        let next = next_nonce(highest, ledger_count);
        debug!(%signer, ?highest, ledger_count, next, "nonce counter seeded");
        Ok(next)
    }

    /// Allocation and persistence, under the signer's lock.
    async fn persist_new(
        &self,
        slot: &mut SignerSlot,
        signer: Address,
        request: SendRequest,
    ) -> ManagerResult<StoredTransaction> {
        let nonce = match slot.next {
            Some(next) => next,
            None => self.seed_nonce(&signer).await?,
        };

        let fees = cap_fees(
            self.fees.suggest_fees().await?,
            self.config.max_fee_per_gas_cap,
        );
        let unsigned = UnsignedTransaction {
            nonce,
            to: request.to,
            value: request.value,
            data: request.data,
            gas_limit: request.gas_limit.unwrap_or(self.config.default_gas_limit),
            chain_id: self.config.chain_id,
            fees,
        };
        let signed = self.keys.sign(&signer, &unsigned)?;
        let head = self.ledger.current_block().await?;

        let record = StoredTransaction {
            signer,
            nonce,
            tx_id: signed.tx_id,
            raw_signed_tx: signed.raw,
            to: unsigned.to,
            value: unsigned.value,
            data: unsigned.data,
            gas_limit: unsigned.gas_limit,
            chain_id: unsigned.chain_id,
            fees,
            action: request.action,
            status: TxStatus::Created,
            creation_block: head,
            submitted_block: head,
            mined_block: None,
            attempts: 1,
            previous_tx_ids: Vec::new(),
            failed_broadcasts: 0,
        };

        let pending = record.clone();
        if let Err(err) = self
            .with_store(move |store| store.put(&pending, false))
            .await
        {
            if err.is_duplicate_key() {
                // The cached counter is behind the store; reseed next time.
                slot.next = None;
                error!(%signer, nonce, "nonce slot already taken");
            } else {
                error!(%signer, nonce, error = %err, "failed to persist transaction");
            }
            return Err(err);
        }

        slot.next = Some(nonce + 1);
        Counters::bump(&self.counters.sent, 1);
        Ok(record)
    }

    /// Submits raw bytes, classifying any refusal.
    pub(crate) async fn broadcast(&self, raw: &[u8]) -> BroadcastOutcome {
        let sent = tokio::time::timeout(
            self.config.broadcast_timeout,
            self.ledger.send_raw_transaction(raw),
        )
        .await;

        match sent {
            Err(_) => BroadcastOutcome::TimedOut,
            Ok(Ok(_)) => BroadcastOutcome::Accepted,
            Ok(Err(LedgerError::Rejected(message))) => {
                let class = self.classifier.classify(&message);
                if class.counts_as_accepted() {
                    debug!(%class, message = %message, "rejection means already in flight");
                    BroadcastOutcome::Accepted
                } else {
                    BroadcastOutcome::Rejected { class, message }
                }
            }
            Ok(Err(LedgerError::Transport(message))) => BroadcastOutcome::Rejected {
                class: RejectionClass::Unknown,
                message,
            },
        }
    }

    /// Persists `Broadcast` for an accepted `Created` record.
    async fn mark_broadcast(&self, record: StoredTransaction) -> ManagerResult<StoredTransaction> {
        let mut updated = record;
        updated.status = TxStatus::Broadcast;

        let expected = updated.tx_id;
        let pending = updated.clone();
        match self
            .with_store(move |store| store.replace(&expected, &pending))
            .await
        {
            Ok(()) => Ok(updated),
            Err(ManagerError::Store(err)) if err.is_conflict() => {
                // The sweep got to the record first; report what is stored.
                let (signer, nonce) = (updated.signer, updated.nonce);
                let current = self
                    .with_store(move |store| store.get_by_nonce(&signer, nonce))
                    .await?;
                Ok(current.unwrap_or(updated))
            }
            Err(err) => Err(err),
        }
    }

    /// Compare-and-swap update of a record whose current attempt is `expected`.
    pub(crate) async fn update_record(
        &self,
        expected: TxHash,
        record: StoredTransaction,
    ) -> ManagerResult<()> {
        self.with_store(move |store| store.replace(&expected, &record))
            .await
    }

    /// Runs a store call on the blocking pool.
    pub(crate) async fn with_store<T, F>(&self, f: F) -> ManagerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn TransactionStore) -> StoreResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| ManagerError::TaskJoin(e.to_string()))?
            .map_err(ManagerError::from)
    }
}
