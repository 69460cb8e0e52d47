//! Dump command implementation.

use super::open_store;
use crate::error::CliResult;
use crate::Format;
use std::path::Path;
use txrelay_store::{Address, StoredTransaction, TransactionStore};

/// Runs the dump command.
pub fn run(
    path: &Path,
    signer: Option<Address>,
    pending_only: bool,
    limit: Option<usize>,
    format: Format,
) -> CliResult<()> {
    let store = open_store(path)?;
    let records: Vec<StoredTransaction> = store
        .get_all(signer.as_ref())?
        .into_iter()
        .filter(|tx| !pending_only || !tx.is_mined())
        .take(limit.unwrap_or(usize::MAX))
        .collect();

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        Format::Text => {
            for tx in &records {
                println!("{}", format_record(tx));
            }
            println!();
            println!("{} record(s)", records.len());
        }
    }
    Ok(())
}

fn format_record(tx: &StoredTransaction) -> String {
    let mined = tx
        .mined_block
        .map_or_else(|| "-".to_string(), |block| block.number.to_string());
    format!(
        "{}  {:?}  action={}  tx={}  attempts={}  failed={}  {}  submitted={}  mined={}",
        tx.key(),
        tx.status,
        tx.action,
        tx.tx_id,
        tx.attempts,
        tx.failed_broadcasts,
        tx.fees,
        tx.submitted_block.number,
        mined
    )
}
