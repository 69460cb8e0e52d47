//! The periodic sweep over the store.
//!
//! For every unmined record the sweep, in order:
//!
//! 1. looks for a receipt of any of its attempts and marks it mined
//! 2. reports it as a foreign collision if the ledger consumed its nonce
//!    without one of our attempts
//! 3. rebroadcasts it unchanged if it was persisted but never accepted,
//!    counting refusals toward the attempt ceiling
//! 4. replaces it with a higher-fee attempt if it stalled
//!
//! Then mined records past the retention horizon are archived and the store
//! is compacted if enough dead records piled up.

use crate::config::ManagerConfig;
use crate::error::{ManagerError, ManagerResult};
use crate::fees::{bump_fees, BumpOutcome};
use crate::ledger::{Receipt, RejectionClass};
use crate::manager::{BroadcastOutcome, Counters, TransactionManager};
use crate::tx::UnsignedTransaction;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};
use txrelay_store::{Address, BlockRef, CompactionStats, StoredTransaction, TxKey, TxStatus};

/// What one sweep did and found.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Records newly observed mined.
    pub mined: Vec<TxKey>,
    /// `Created` records broadcast again.
    pub rebroadcast: Vec<TxKey>,
    /// Records replaced with a higher-fee attempt.
    pub boosted: Vec<TxKey>,
    /// Records that may not be retried further, with their attempts plus
    /// failed broadcasts.
    pub stuck: Vec<(TxKey, u32)>,
    /// Records whose nonce the ledger shows consumed by someone else.
    pub foreign_collisions: Vec<TxKey>,
    /// Broadcasts the ledger refused.
    pub rejected: Vec<(TxKey, RejectionClass)>,
    /// Mined records deleted by archival.
    pub archived: usize,
    /// Set when the sweep compacted the store.
    pub compaction: Option<CompactionStats>,
    /// Failures that skipped part of the sweep.
    pub errors: Vec<String>,
}

impl SweepReport {
    /// Returns true if the sweep changed nothing and found nothing.
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.mined.is_empty()
            && self.rebroadcast.is_empty()
            && self.boosted.is_empty()
            && self.stuck.is_empty()
            && self.foreign_collisions.is_empty()
            && self.rejected.is_empty()
            && self.archived == 0
            && self.compaction.is_none()
            && self.errors.is_empty()
    }

    /// Conditions needing an operator: foreign collisions and stuck records.
    #[must_use]
    pub fn alerts(&self) -> Vec<ManagerError> {
        let foreign = self
            .foreign_collisions
            .iter()
            .map(|key| ManagerError::ForeignNonceCollision {
                signer: key.signer,
                nonce: key.nonce,
            });
        let stuck = self
            .stuck
            .iter()
            .map(|(key, attempts)| ManagerError::StuckTransaction {
                signer: key.signer,
                nonce: key.nonce,
                attempts: *attempts,
            });
        foreign.chain(stuck).collect()
    }
}

/// Whether `record` waited long enough since its last submission to be boosted.
///
/// Either threshold is enough.
#[must_use]
pub fn is_stalled(config: &ManagerConfig, record: &StoredTransaction, head: &BlockRef) -> bool {
    let since = &record.submitted_block;
    head.number.saturating_sub(since.number) >= config.pending_blocks_before_boost
        || head.timestamp.saturating_sub(since.timestamp) >= config.pending_seconds_before_boost
}

impl TransactionManager {
    /// Runs one sweep. Concurrent calls queue behind each other.
    ///
    /// Problems with single records or signers are logged and collected in
    /// the report rather than returned.
    ///
    /// # Errors
    ///
    /// Returns an error only if the ledger head or the store cannot be read.
    pub async fn run_sweep_once(&self) -> ManagerResult<SweepReport> {
        let _sweeping = self.sweep_lock.lock().await;
        let head = self.ledger.current_block().await?;
        let records = self.with_store(|store| store.get_all(None)).await?;

        let mut pending: BTreeMap<Address, Vec<StoredTransaction>> = BTreeMap::new();
        for tx in records.into_iter().filter(|tx| !tx.is_mined()) {
            pending.entry(tx.signer).or_default().push(tx);
        }

        let mut report = SweepReport::default();
        for (signer, records) in pending {
            if let Err(err) = self.sweep_signer(signer, records, &head, &mut report).await {
                error!(%signer, error = %err, "sweep failed for signer");
                report.errors.push(format!("{signer}: {err}"));
            }
        }

        self.archive(&head, &mut report).await;
        Counters::bump(&self.counters.sweeps, 1);
        debug!(head = head.number, quiet = report.is_quiet(), "sweep done");
        Ok(report)
    }

    async fn sweep_signer(
        &self,
        signer: Address,
        records: Vec<StoredTransaction>,
        head: &BlockRef,
        report: &mut SweepReport,
    ) -> ManagerResult<()> {
        // Read before the receipts: a count that includes one of our attempts
        // then always comes with its receipt.
        let confirmed = self.ledger.transaction_count(&signer).await?;

        for record in records {
            let key = record.key();
            if let Err(err) = self.sweep_record(record, confirmed, head, report).await {
                error!(%key, error = %err, "sweep failed for record");
                report.errors.push(format!("{key}: {err}"));
            }
        }
        Ok(())
    }

    async fn sweep_record(
        &self,
        record: StoredTransaction,
        confirmed: u64,
        head: &BlockRef,
        report: &mut SweepReport,
    ) -> ManagerResult<()> {
        if let Some(receipt) = self.find_receipt(&record).await? {
            return self.mark_mined(record, receipt, report).await;
        }

        if record.nonce < confirmed {
            error!(
                signer = %record.signer,
                nonce = record.nonce,
                tx_id = %record.tx_id,
                attempts = record.attempts,
                "nonce consumed by a foreign transaction; operator action required"
            );
            Counters::bump(&self.counters.foreign_collisions, 1);
            report.foreign_collisions.push(record.key());
            return Ok(());
        }

        match record.status {
            TxStatus::Created => self.rebroadcast(record, head, report).await,
            TxStatus::Broadcast if is_stalled(&self.config, &record, head) => {
                self.boost(record, head, report).await
            }
            _ => Ok(()),
        }
    }

    async fn find_receipt(&self, record: &StoredTransaction) -> ManagerResult<Option<Receipt>> {
        for tx_id in record.attempt_ids() {
            if let Some(receipt) = self.ledger.receipt(tx_id).await? {
                return Ok(Some(receipt));
            }
        }
        Ok(None)
    }

    async fn mark_mined(
        &self,
        record: StoredTransaction,
        receipt: Receipt,
        report: &mut SweepReport,
    ) -> ManagerResult<()> {
        let mut mined = record.clone();
        mined.status = TxStatus::Mined;
        mined.mined_block = Some(receipt.block);
        self.update_record(record.tx_id, mined).await?;

        info!(
            signer = %record.signer,
            nonce = record.nonce,
            tx_id = %receipt.tx_id,
            block = receipt.block.number,
            attempts = record.attempts,
            "transaction mined"
        );
        Counters::bump(&self.counters.mined, 1);
        report.mined.push(record.key());
        Ok(())
    }

    async fn rebroadcast(
        &self,
        record: StoredTransaction,
        head: &BlockRef,
        report: &mut SweepReport,
    ) -> ManagerResult<()> {
        let key = record.key();
        if record.submissions() >= self.config.max_attempts {
            self.report_stuck(&record, report);
            return Ok(());
        }

        match self.broadcast(&record.raw_signed_tx).await {
            BroadcastOutcome::Accepted => {
                let mut accepted = record.clone();
                accepted.status = TxStatus::Broadcast;
                accepted.submitted_block = *head;
                self.update_record(record.tx_id, accepted).await?;

                info!(%key, tx_id = %record.tx_id, "transaction rebroadcast");
                Counters::bump(&self.counters.rebroadcasts, 1);
                report.rebroadcast.push(key);
                Ok(())
            }
            BroadcastOutcome::Rejected {
                class: RejectionClass::Underpriced,
                ..
            } => self.boost(record, head, report).await,
            BroadcastOutcome::Rejected { class, message } => {
                self.note_rejection(key, class, &message, report);
                self.count_failure(record).await
            }
            BroadcastOutcome::TimedOut => {
                Counters::bump(&self.counters.broadcast_failures, 1);
                warn!(%key, "rebroadcast timed out");
                self.count_failure(record).await
            }
        }
    }

    /// Persists one more failed broadcast of a never-accepted record.
    async fn count_failure(&self, record: StoredTransaction) -> ManagerResult<()> {
        let mut failed = record.clone();
        failed.failed_broadcasts = failed.failed_broadcasts.saturating_add(1);
        match self.update_record(record.tx_id, failed).await {
            Err(ManagerError::Store(err)) if err.is_conflict() => {
                debug!(key = %record.key(), "record moved on while rebroadcasting");
                Ok(())
            }
            result => result,
        }
    }

    async fn boost(
        &self,
        record: StoredTransaction,
        head: &BlockRef,
        report: &mut SweepReport,
    ) -> ManagerResult<()> {
        let key = record.key();
        if record.submissions() >= self.config.max_attempts {
            self.report_stuck(&record, report);
            return Ok(());
        }

        let guard = self.nonces.lock(&record.signer).await;

        let (signer, nonce, seen) = (record.signer, record.nonce, record.tx_id);
        let current = self
            .with_store(move |store| store.get_by_nonce(&signer, nonce))
            .await?;
        let Some(record) = current.filter(|tx| tx.tx_id == seen && !tx.is_mined()) else {
            debug!(%key, "record changed since the sweep read it; skipping boost");
            return Ok(());
        };

        let suggested = self.fees.suggest_fees().await?;
        let fees = match bump_fees(
            &record.fees,
            &suggested,
            self.config.min_fee_bump_percent,
            self.config.max_fee_per_gas_cap,
        ) {
            BumpOutcome::Bumped(fees) => fees,
            BumpOutcome::Capped { required, cap } => {
                warn!(%key, required, cap, "fee cap prevents a valid replacement");
                self.report_stuck(&record, report);
                return Ok(());
            }
        };

        let unsigned = UnsignedTransaction {
            nonce,
            to: record.to,
            value: record.value,
            data: record.data.clone(),
            gas_limit: record.gas_limit,
            chain_id: record.chain_id,
            fees,
        };
        let signed = self.keys.sign(&signer, &unsigned)?;

        let mut boosted = record.clone();
        boosted.previous_tx_ids.push(record.tx_id);
        boosted.tx_id = signed.tx_id;
        boosted.raw_signed_tx = signed.raw;
        boosted.fees = fees;
        boosted.attempts += 1;
        boosted.submitted_block = *head;

        let replacement = boosted.clone();
        self.with_store(move |store| store.put(&replacement, true))
            .await?;
        drop(guard);

        info!(
            %key,
            old_tx_id = %record.tx_id,
            tx_id = %boosted.tx_id,
            attempts = boosted.attempts,
            fees = %boosted.fees,
            "transaction boosted"
        );
        Counters::bump(&self.counters.boosts, 1);
        report.boosted.push(key);

        match self.broadcast(&boosted.raw_signed_tx).await {
            BroadcastOutcome::Accepted if boosted.status == TxStatus::Created => {
                let mut accepted = boosted.clone();
                accepted.status = TxStatus::Broadcast;
                self.update_record(boosted.tx_id, accepted).await
            }
            BroadcastOutcome::Accepted => Ok(()),
            BroadcastOutcome::Rejected { class, message } => {
                self.note_rejection(key, class, &message, report);
                Ok(())
            }
            BroadcastOutcome::TimedOut => {
                Counters::bump(&self.counters.broadcast_failures, 1);
                warn!(%key, tx_id = %boosted.tx_id, "boost broadcast timed out");
                Ok(())
            }
        }
    }

    fn note_rejection(
        &self,
        key: TxKey,
        class: RejectionClass,
        message: &str,
        report: &mut SweepReport,
    ) {
        Counters::bump(&self.counters.broadcast_failures, 1);
        if class.is_transient() {
            warn!(%key, %class, message, "broadcast rejected");
        } else {
            error!(%key, %class, message, "broadcast rejected; operator action required");
        }
        report.rejected.push((key, class));
    }

    fn report_stuck(&self, record: &StoredTransaction, report: &mut SweepReport) {
        error!(
            signer = %record.signer,
            nonce = record.nonce,
            tx_id = %record.tx_id,
            attempts = record.attempts,
            failed_broadcasts = record.failed_broadcasts,
            "transaction stuck; operator action required"
        );
        Counters::bump(&self.counters.stuck_reports, 1);
        report.stuck.push((record.key(), record.submissions()));
    }

    async fn archive(&self, head: &BlockRef, report: &mut SweepReport) {
        let (Some(max_block), Some(max_timestamp)) = (
            head.number.checked_sub(self.config.retention_blocks),
            head.timestamp.checked_sub(self.config.retention_seconds),
        ) else {
            return;
        };

        match self
            .with_store(move |store| store.remove_archived(max_block, max_timestamp))
            .await
        {
            Ok(0) => {}
            Ok(removed) => {
                info!(removed, max_block, max_timestamp, "mined transactions archived");
                Counters::bump(&self.counters.archived, removed as u64);
                report.archived = removed;
            }
            Err(err) => {
                error!(error = %err, "archival failed");
                report.errors.push(format!("archival: {err}"));
            }
        }

        if self.store.compaction_due() {
            match self.with_store(|store| store.compact()).await {
                Ok(stats) => report.compaction = Some(stats),
                Err(err) => {
                    error!(error = %err, "compaction failed");
                    report.errors.push(format!("compaction: {err}"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txrelay_store::{FeeFields, TxAction, H256};

    fn block(number: u64, timestamp: u64) -> BlockRef {
        BlockRef::new(number, H256::default(), timestamp)
    }

    fn submitted_at(number: u64, timestamp: u64) -> StoredTransaction {
        StoredTransaction {
            signer: Address::new([1; 20]),
            nonce: 0,
            tx_id: H256::new([1; 32]),
            raw_signed_tx: Vec::new(),
            to: Address::default(),
            value: 0,
            data: Vec::new(),
            gas_limit: 21_000,
            chain_id: 1,
            fees: FeeFields::Legacy { gas_price: 1 },
            action: TxAction::ValueTransfer,
            status: TxStatus::Broadcast,
            creation_block: block(0, 0),
            submitted_block: block(number, timestamp),
            mined_block: None,
            attempts: 1,
            previous_tx_ids: Vec::new(),
            failed_broadcasts: 0,
        }
    }

    #[test]
    fn stall_on_either_threshold() {
        let config = ManagerConfig::new(1).with_boost_after(5, 60);
        let record = submitted_at(100, 1_000);

        assert!(!is_stalled(&config, &record, &block(104, 1_059)));
        assert!(is_stalled(&config, &record, &block(105, 1_001)));
        assert!(is_stalled(&config, &record, &block(101, 1_060)));
    }

    #[test]
    fn stall_measures_from_last_submission() {
        let config = ManagerConfig::new(1).with_boost_after(5, 60);
        let mut record = submitted_at(100, 1_000);
        record.creation_block = block(10, 100);

        assert!(!is_stalled(&config, &record, &block(102, 1_010)));
    }

    #[test]
    fn alerts_cover_stuck_and_foreign() {
        let key = TxKey::new(Address::new([2; 20]), 4);
        let report = SweepReport {
            stuck: vec![(key, 10)],
            foreign_collisions: vec![TxKey::new(Address::new([3; 20]), 1)],
            ..SweepReport::default()
        };

        let alerts = report.alerts();
        assert_eq!(alerts.len(), 2);
        assert!(matches!(
            alerts[0],
            ManagerError::ForeignNonceCollision { nonce: 1, .. }
        ));
        assert!(matches!(
            alerts[1],
            ManagerError::StuckTransaction {
                nonce: 4,
                attempts: 10,
                ..
            }
        ));
        assert!(!report.is_quiet());
        assert!(SweepReport::default().is_quiet());
    }
}
