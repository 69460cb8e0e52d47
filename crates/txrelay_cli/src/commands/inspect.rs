//! Inspect command implementation.

use super::open_store;
use crate::error::CliResult;
use crate::Format;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use txrelay_store::{Address, StoreStats, StoredTransaction, TransactionStore, TxStatus};

/// Store inspection result.
#[derive(Debug, Default, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Live records.
    pub records: usize,
    /// Records persisted but never accepted.
    pub created: usize,
    /// Records accepted and waiting to be mined.
    pub broadcast: usize,
    /// Records observed mined.
    pub mined: usize,
    /// Records replaced at least once.
    pub boosted: usize,
    /// Frames in the log, live or not.
    pub physical_records: usize,
    /// Frames compaction would drop.
    pub dead_records: usize,
    /// Log size in bytes.
    pub log_bytes: u64,
    /// Per-signer summary.
    pub signers: Vec<SignerSummary>,
}

/// Records of one signer.
#[derive(Debug, Serialize)]
pub struct SignerSummary {
    /// Signer address.
    pub signer: Address,
    /// Live records.
    pub records: usize,
    /// Records not yet mined.
    pub pending: usize,
    /// Lowest stored nonce.
    pub lowest_nonce: u64,
    /// Highest stored nonce.
    pub highest_nonce: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: Format) -> CliResult<()> {
    let store = open_store(path)?;
    let records = store.get_all(None)?;
    let result = summarize(path, &records, &store.stats());

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

fn summarize(path: &Path, records: &[StoredTransaction], stats: &StoreStats) -> InspectResult {
    let mut result = InspectResult {
        path: path.display().to_string(),
        records: records.len(),
        physical_records: stats.physical_records,
        dead_records: stats.dead_records,
        log_bytes: stats.log_bytes,
        ..InspectResult::default()
    };

    let mut by_signer: BTreeMap<Address, Vec<&StoredTransaction>> = BTreeMap::new();
    for tx in records {
        match tx.status {
            TxStatus::Created => result.created += 1,
            TxStatus::Broadcast => result.broadcast += 1,
            TxStatus::Mined => result.mined += 1,
        }
        if tx.attempts > 1 {
            result.boosted += 1;
        }
        by_signer.entry(tx.signer).or_default().push(tx);
    }

    result.signers = by_signer
        .into_iter()
        .map(|(signer, txs)| SignerSummary {
            signer,
            records: txs.len(),
            pending: txs.iter().filter(|tx| !tx.is_mined()).count(),
            lowest_nonce: txs.iter().map(|tx| tx.nonce).min().unwrap_or_default(),
            highest_nonce: txs.iter().map(|tx| tx.nonce).max().unwrap_or_default(),
        })
        .collect();
    result
}

fn print_text_output(result: &InspectResult) {
    println!("Transaction store: {}", result.path);
    println!();
    println!("Records:     {}", result.records);
    println!("  created:   {}", result.created);
    println!("  broadcast: {}", result.broadcast);
    println!("  mined:     {}", result.mined);
    println!("  boosted:   {}", result.boosted);
    println!();
    println!(
        "Log:         {} bytes, {} frames ({} dead)",
        result.log_bytes, result.physical_records, result.dead_records
    );

    if !result.signers.is_empty() {
        println!();
        println!("Signers:");
        for signer in &result.signers {
            println!(
                "  {}  records={} pending={} nonces={}..={}",
                signer.signer,
                signer.records,
                signer.pending,
                signer.lowest_nonce,
                signer.highest_nonce
            );
        }
    }
}
