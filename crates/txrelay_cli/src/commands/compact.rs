//! Compact command implementation.

use super::open_store;
use crate::error::CliResult;
use std::path::Path;
use tracing::info;
use txrelay_store::TransactionStore;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> CliResult<()> {
    let store = open_store(path)?;
    let stats = store.stats();

    println!("Compacting transaction store at {}", path.display());
    println!(
        "  Before: {} frames, {} live, {} dead, {} bytes",
        stats.physical_records, stats.live_records, stats.dead_records, stats.log_bytes
    );

    if dry_run {
        println!();
        println!("Dry run - would drop {} frame(s)", stats.dead_records);
        return Ok(());
    }

    if stats.dead_records == 0 {
        println!();
        println!("Nothing to compact");
        return Ok(());
    }

    let result = store.compact()?;
    info!(
        frames_removed = result.frames_removed(),
        bytes_before = result.bytes_before,
        bytes_after = result.bytes_after,
        "store compacted"
    );
    println!(
        "  After:  {} frames, {} bytes",
        result.frames_after, result.bytes_after
    );
    println!();
    println!(
        "✓ Removed {} frame(s), reclaimed {} bytes",
        result.frames_removed(),
        result.bytes_before.saturating_sub(result.bytes_after)
    );
    Ok(())
}
