//! Verify command implementation.

use crate::error::{CliError, CliResult};
use std::collections::BTreeSet;
use std::path::Path;
use txrelay_storage::{FileBackend, StorageBackend};
use txrelay_store::{scan_log, FrameKind, LogScan, StoreDir, TailState, TxKey};

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Frames with a valid checksum.
    pub frames: usize,
    /// Put frames.
    pub puts: usize,
    /// Tombstone frames.
    pub tombstones: usize,
    /// Records live after replay.
    pub live_records: usize,
    /// Frames whose payload does not decode.
    pub errors: Vec<String>,
    /// Partial final frame, if any.
    pub torn_tail: Option<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> CliResult<()> {
    println!("Verifying transaction store at {}", path.display());
    println!();

    let dir = StoreDir::open(path, false)?;
    let backend = FileBackend::open(&dir.log_path())?;
    let size = backend.size()?;

    let result = verify(&scan_log(&backend)?);
    print_result(size, &result);

    println!();
    if result.is_ok() {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed");
        Err(CliError::VerifyFailed(format!(
            "{} damaged frame(s)",
            result.errors.len()
        )))
    }
}

/// Decodes every frame of a scan and replays it.
pub fn verify(scan: &LogScan) -> VerifyResult {
    let mut result = VerifyResult {
        frames: scan.frames.len(),
        ..VerifyResult::default()
    };
    let mut live: BTreeSet<TxKey> = BTreeSet::new();

    for (offset, frame) in &scan.frames {
        match frame.kind {
            FrameKind::Put => {
                result.puts += 1;
                match frame.transaction() {
                    Ok(tx) => {
                        live.insert(tx.key());
                    }
                    Err(err) => result
                        .errors
                        .push(format!("put at offset {offset} (seq {}): {err}", frame.seq)),
                }
            }
            FrameKind::Tombstone => {
                result.tombstones += 1;
                match frame.key() {
                    Ok(key) => {
                        live.remove(&key);
                    }
                    Err(err) => result.errors.push(format!(
                        "tombstone at offset {offset} (seq {}): {err}",
                        frame.seq
                    )),
                }
            }
        }
    }

    result.live_records = live.len();
    if let TailState::Torn {
        offset,
        discarded,
        reason,
    } = &scan.tail
    {
        result.torn_tail = Some(format!(
            "{discarded} byte(s) at offset {offset}: {reason}"
        ));
    }
    result
}

fn print_result(size: u64, result: &VerifyResult) {
    println!("  Log size:     {size} bytes");
    println!("  Frames:       {}", result.frames);
    println!("  Puts:         {}", result.puts);
    println!("  Tombstones:   {}", result.tombstones);
    println!("  Live records: {}", result.live_records);

    if let Some(tail) = &result.torn_tail {
        println!("  Torn tail:    {tail} (discarded on next open)");
    }
    for error in &result.errors {
        println!("    - {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txrelay_storage::InMemoryBackend;
    use txrelay_store::{Address, Frame};

    #[test]
    fn replay_counts_live_records() {
        let key = TxKey::new(Address::new([1; 20]), 0);
        let mut backend = InMemoryBackend::new();
        backend
            .append(&Frame::tombstone(&key, 1).unwrap().encode())
            .unwrap();
        backend
            .append(&Frame::tombstone(&key, 2).unwrap().encode())
            .unwrap();

        let result = verify(&scan_log(&backend).unwrap());
        assert_eq!(result.frames, 2);
        assert_eq!(result.tombstones, 2);
        assert_eq!(result.live_records, 0);
        assert!(result.is_ok());
        assert!(result.torn_tail.is_none());
    }

    #[test]
    fn undecodable_put_is_reported() {
        let mut backend = InMemoryBackend::new();
        let frame = Frame {
            kind: FrameKind::Put,
            seq: 1,
            payload: vec![0xff, 0x00],
        };
        backend.append(&frame.encode()).unwrap();

        let result = verify(&scan_log(&backend).unwrap());
        assert_eq!(result.puts, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(!result.is_ok());
    }
}
