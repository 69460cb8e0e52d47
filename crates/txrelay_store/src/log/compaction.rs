//! Log compaction.
//!
//! Compaction copies the frames of live records into a fresh log, in their
//! original order, and swaps it in with [`StorageBackend::rewrite`]. The copy
//! runs under the read lock. Frames appended between the copy and the swap
//! are carried over verbatim after the copied ones.
//!
//! ## Invariants
//!
//! - Compaction does not change what readers see
//! - Superseded puts and tombstones are gone afterwards
//! - Copied frames keep their sequence numbers, so the new log scans clean

use super::frame::{decode_frame, Defect, FrameKind};
use crate::error::{StoreError, StoreResult};
use crate::transaction::TxKey;
use std::collections::HashMap;
use txrelay_storage::StorageBackend;

/// Location of a live frame in the current log.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LiveFrame {
    pub key: TxKey,
    pub offset: u64,
    pub len: usize,
}

/// The replacement log and where each copied frame moved, keyed by its old
/// offset.
#[derive(Debug, Default)]
pub(crate) struct CompactedLog {
    pub data: Vec<u8>,
    pub relocated: HashMap<u64, u64>,
}

impl CompactedLog {
    /// Appends `tail`, the bytes written to the old log past the copied
    /// image, and returns the offset it starts at along with its frame count.
    ///
    /// The tail is decoded frame by frame so that a half-rolled-back append
    /// is refused rather than carried over.
    pub fn append_tail(&mut self, tail_offset: u64, tail: &[u8]) -> StoreResult<(u64, usize)> {
        let mut pos = 0;
        let mut frames = 0;
        while pos < tail.len() {
            let offset = tail_offset + pos as u64;
            match decode_frame(&tail[pos..]) {
                Ok((_, len)) => pos += len,
                Err(Defect::Truncated) => {
                    return Err(StoreError::corrupted(offset, "frame cut short"))
                }
                Err(Defect::Damaged(reason)) => return Err(StoreError::corrupted(offset, reason)),
            }
            frames += 1;
        }

        let base = self.data.len() as u64;
        self.data.extend_from_slice(tail);
        Ok((base, frames))
    }
}

/// Copies the live frames out of `backend` into a new log image.
///
/// Each frame is re-verified on the way, so compaction never launders a
/// damaged record into a log that would then scan clean.
pub(crate) fn compact_frames(
    backend: &dyn StorageBackend,
    mut live: Vec<LiveFrame>,
) -> StoreResult<CompactedLog> {
    live.sort_by_key(|frame| frame.offset);

    let total: usize = live.iter().map(|frame| frame.len).sum();
    let mut out = CompactedLog {
        data: Vec::with_capacity(total),
        relocated: HashMap::with_capacity(live.len()),
    };

    for frame in live {
        let bytes = backend.read_at(frame.offset, frame.len)?;
        match decode_frame(&bytes) {
            Ok((decoded, len)) if len == frame.len && decoded.kind == FrameKind::Put => {}
            Ok(_) => {
                return Err(StoreError::corrupted(
                    frame.offset,
                    format!("index entry for {} does not point at its put", frame.key),
                ))
            }
            Err(Defect::Truncated) => {
                return Err(StoreError::corrupted(frame.offset, "frame cut short"))
            }
            Err(Defect::Damaged(reason)) => return Err(StoreError::corrupted(frame.offset, reason)),
        }

        out.relocated.insert(frame.offset, out.data.len() as u64);
        out.data.extend_from_slice(&bytes);
    }

    Ok(out)
}
