//! Log-structured transaction store.
//!
//! Every mutation appends one or more checksummed frames to a single log and
//! updates an in-memory index from `(signer, nonce)` to the frame holding the
//! live record. Opening the store replays the log; a frame torn by a crash
//! during the last append is cut off, anything worse refuses to open.

mod compaction;
mod dir;
mod frame;

pub use dir::StoreDir;
pub use frame::{scan_log, Frame, FrameKind, LogScan, TailState};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::store::{
    check_replace, sort_by_nonce, CompactionStats, SlotState, StoreStats, TransactionStore,
};
use crate::transaction::{StoredTransaction, TxKey};
use crate::types::{Address, BlockRef, TxHash, TxStatus};
use compaction::{compact_frames, CompactedLog, LiveFrame};
use frame::{decode_frame, Defect};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};
use txrelay_storage::{FileBackend, StorageBackend};

/// Where the live record of a slot sits in the log.
#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    offset: u64,
    len: usize,
    tx_id: TxHash,
    status: TxStatus,
    mined: Option<BlockRef>,
}

impl IndexEntry {
    fn archivable(&self, max_block_number: u64, max_timestamp: u64) -> bool {
        self.mined.is_some_and(|block| {
            block.number <= max_block_number && block.timestamp <= max_timestamp
        })
    }
}

struct LogState {
    backend: Box<dyn StorageBackend>,
    index: BTreeMap<TxKey, IndexEntry>,
    by_id: HashMap<TxHash, TxKey>,
    next_seq: u64,
    /// Frames in the log, live or not.
    physical: usize,
    compactions: u64,
    /// Bumped whenever the log is replaced rather than appended to.
    rewrites: u64,
}

/// Live frames copied out under the read lock, waiting for the swap.
struct PendingCompaction {
    image: CompactedLog,
    rewrites: u64,
    log_end: u64,
    physical: usize,
    live: usize,
}

impl LogState {
    fn read(&self, entry: &IndexEntry) -> StoreResult<StoredTransaction> {
        let bytes = self.backend.read_at(entry.offset, entry.len)?;
        let (frame, _) = decode_frame(&bytes).map_err(|defect| match defect {
            Defect::Truncated => StoreError::corrupted(entry.offset, "frame cut short"),
            Defect::Damaged(reason) => StoreError::corrupted(entry.offset, reason),
        })?;
        frame.transaction()
    }

    /// Appends `frames` as one write. On failure the log is rolled back to
    /// its previous length and nothing is indexed.
    fn append(&mut self, frames: &[Frame], sync: bool) -> StoreResult<Vec<u64>> {
        let start = self.backend.size()?;
        let mut buf = Vec::with_capacity(frames.iter().map(Frame::encoded_len).sum());
        let mut offsets = Vec::with_capacity(frames.len());
        for frame in frames {
            offsets.push(start + buf.len() as u64);
            buf.extend_from_slice(&frame.encode());
        }

        let written = self.backend.append(&buf).and_then(|_| {
            if sync {
                self.backend.sync()
            } else {
                self.backend.flush()
            }
        });

        if let Err(err) = written {
            if let Err(rollback) = self.backend.truncate(start) {
                warn!(error = %rollback, offset = start, "failed to roll back partial append");
            }
            return Err(err.into());
        }

        self.next_seq += frames.len() as u64;
        self.physical += frames.len();
        Ok(offsets)
    }

    fn write_put(&mut self, tx: &StoredTransaction, sync: bool) -> StoreResult<()> {
        let frame = Frame::put(tx, self.next_seq)?;
        let len = frame.encoded_len();
        let offsets = self.append(std::slice::from_ref(&frame), sync)?;
        self.index_put(
            tx.key(),
            IndexEntry {
                offset: offsets[0],
                len,
                tx_id: tx.tx_id,
                status: tx.status,
                mined: tx.mined_block,
            },
        );
        Ok(())
    }

    fn index_put(&mut self, key: TxKey, entry: IndexEntry) {
        if let Some(old) = self.index.insert(key, entry) {
            self.by_id.remove(&old.tx_id);
        }
        self.by_id.insert(entry.tx_id, key);
    }

    fn index_remove(&mut self, key: &TxKey) {
        if let Some(old) = self.index.remove(key) {
            self.by_id.remove(&old.tx_id);
        }
    }

    fn dead(&self) -> usize {
        self.physical.saturating_sub(self.index.len())
    }

    fn copy_live(&self) -> StoreResult<PendingCompaction> {
        let live = self
            .index
            .iter()
            .map(|(key, entry)| LiveFrame {
                key: *key,
                offset: entry.offset,
                len: entry.len,
            })
            .collect();
        Ok(PendingCompaction {
            image: compact_frames(self.backend.as_ref(), live)?,
            rewrites: self.rewrites,
            log_end: self.backend.size()?,
            physical: self.physical,
            live: self.index.len(),
        })
    }

    /// Swaps in a copied image, carrying over the frames appended since the
    /// copy. Returns `None`, leaving the log untouched, if the log was
    /// rewritten in between or no longer lines up with the copy.
    fn swap_in(&mut self, pending: PendingCompaction) -> StoreResult<Option<CompactionStats>> {
        let PendingCompaction {
            mut image,
            rewrites,
            log_end,
            physical,
            live,
        } = pending;
        if self.rewrites != rewrites {
            return Ok(None);
        }

        let frames_before = self.physical;
        let bytes_before = self.backend.size()?;
        let tail = if bytes_before > log_end {
            self.backend.read_at(log_end, (bytes_before - log_end) as usize)?
        } else {
            Vec::new()
        };
        let (base, tail_frames) = image.append_tail(log_end, &tail)?;
        if frames_before.checked_sub(physical) != Some(tail_frames) {
            return Ok(None);
        }

        let mut moved = Vec::with_capacity(self.index.len());
        for (key, entry) in &self.index {
            let offset = if entry.offset >= log_end {
                base + (entry.offset - log_end)
            } else {
                match image.relocated.get(&entry.offset) {
                    Some(offset) => *offset,
                    None => return Ok(None),
                }
            };
            moved.push((*key, offset));
        }

        self.backend.rewrite(&image.data)?;
        for (key, offset) in moved {
            if let Some(entry) = self.index.get_mut(&key) {
                entry.offset = offset;
            }
        }
        self.physical = live + tail_frames;
        self.rewrites += 1;
        self.compactions += 1;

        Ok(Some(CompactionStats {
            frames_before,
            frames_after: self.physical,
            bytes_before,
            bytes_after: image.data.len() as u64,
        }))
    }
}

/// A [`TransactionStore`] over an append-only frame log.
///
/// # Example
///
/// ```no_run
/// use txrelay_store::{LogStore, StoreConfig, TransactionStore};
/// use std::path::Path;
///
/// let store = LogStore::open(Path::new("relay-store"), StoreConfig::default())?;
/// println!("{} records", store.stats().live_records);
/// # Ok::<(), txrelay_store::StoreError>(())
/// ```
pub struct LogStore {
    config: StoreConfig,
    state: RwLock<LogState>,
    recovered_tail: TailState,
    _dir: Option<StoreDir>,
}

impl LogStore {
    /// Opens the store directory at `path` and replays its log.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be opened or locked, or if
    /// the log is corrupted beyond a torn final frame.
    pub fn open(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let backend = FileBackend::open(&dir.log_path())?;
        Self::recover(Box::new(backend), config, Some(dir))
    }

    /// Builds a store over an arbitrary backend and replays its content.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is corrupted beyond a torn final frame.
    pub fn with_backend(backend: Box<dyn StorageBackend>, config: StoreConfig) -> StoreResult<Self> {
        Self::recover(backend, config, None)
    }

    fn recover(
        mut backend: Box<dyn StorageBackend>,
        config: StoreConfig,
        dir: Option<StoreDir>,
    ) -> StoreResult<Self> {
        let scan = scan_log(backend.as_ref())?;

        if let TailState::Torn {
            offset,
            discarded,
            reason,
        } = &scan.tail
        {
            warn!(offset, discarded, reason = %reason, "discarding torn log tail");
            backend.truncate(scan.valid_len)?;
            backend.sync()?;
        }

        let mut state = LogState {
            backend,
            index: BTreeMap::new(),
            by_id: HashMap::new(),
            next_seq: 0,
            physical: scan.frames.len(),
            compactions: 0,
            rewrites: 0,
        };

        for (offset, frame) in &scan.frames {
            match frame.kind {
                FrameKind::Put => {
                    let tx = frame
                        .transaction()
                        .map_err(|err| StoreError::corrupted(*offset, err.to_string()))?;
                    state.index_put(
                        tx.key(),
                        IndexEntry {
                            offset: *offset,
                            len: frame.encoded_len(),
                            tx_id: tx.tx_id,
                            status: tx.status,
                            mined: tx.mined_block,
                        },
                    );
                }
                FrameKind::Tombstone => {
                    let key = frame
                        .key()
                        .map_err(|err| StoreError::corrupted(*offset, err.to_string()))?;
                    state.index_remove(&key);
                }
            }
            state.next_seq = frame.seq + 1;
        }

        info!(
            records = state.index.len(),
            frames = state.physical,
            bytes = scan.valid_len,
            "transaction log recovered"
        );

        Ok(Self {
            config,
            state: RwLock::new(state),
            recovered_tail: scan.tail,
            _dir: dir,
        })
    }

    /// What the last open found at the end of the log.
    #[must_use]
    pub fn recovered_tail(&self) -> &TailState {
        &self.recovered_tail
    }
}

impl TransactionStore for LogStore {
    fn put(&self, tx: &StoredTransaction, allow_replace: bool) -> StoreResult<()> {
        let mut state = self.state.write();
        let key = tx.key();
        let replaced = state.index.contains_key(&key);
        if replaced && !allow_replace {
            return Err(StoreError::DuplicateKey {
                signer: tx.signer,
                nonce: tx.nonce,
            });
        }

        state.write_put(tx, self.config.sync_on_write)?;
        debug!(%key, tx_id = %tx.tx_id, replaced, "record persisted");
        Ok(())
    }

    fn replace(&self, expected_tx_id: &TxHash, tx: &StoredTransaction) -> StoreResult<()> {
        let mut state = self.state.write();
        let current = state.index.get(&tx.key()).map(|entry| SlotState {
            tx_id: entry.tx_id,
            status: entry.status,
            mined: entry.mined,
        });
        check_replace(tx, expected_tx_id, current)?;

        state.write_put(tx, self.config.sync_on_write)?;
        debug!(key = %tx.key(), tx_id = %tx.tx_id, status = ?tx.status, "record updated");
        Ok(())
    }

    fn get_by_tx_id(&self, tx_id: &TxHash) -> StoreResult<Option<StoredTransaction>> {
        let state = self.state.read();
        let Some(entry) = state.by_id.get(tx_id).and_then(|key| state.index.get(key)) else {
            return Ok(None);
        };
        state.read(entry).map(Some)
    }

    fn get_by_nonce(&self, signer: &Address, nonce: u64) -> StoreResult<Option<StoredTransaction>> {
        let state = self.state.read();
        let Some(entry) = state.index.get(&TxKey::new(*signer, nonce)) else {
            return Ok(None);
        };
        state.read(entry).map(Some)
    }

    fn get_all(&self, signer: Option<&Address>) -> StoreResult<Vec<StoredTransaction>> {
        let state = self.state.read();
        match signer {
            Some(signer) => state
                .index
                .range(TxKey::new(*signer, 0)..=TxKey::new(*signer, u64::MAX))
                .map(|(_, entry)| state.read(entry))
                .collect(),
            None => {
                let mut all = state
                    .index
                    .values()
                    .map(|entry| state.read(entry))
                    .collect::<StoreResult<Vec<_>>>()?;
                sort_by_nonce(&mut all);
                Ok(all)
            }
        }
    }

    fn highest_nonce(&self, signer: &Address) -> StoreResult<Option<u64>> {
        let state = self.state.read();
        Ok(state
            .index
            .range(TxKey::new(*signer, 0)..=TxKey::new(*signer, u64::MAX))
            .next_back()
            .map(|(key, _)| key.nonce))
    }

    fn remove_archived(&self, max_block_number: u64, max_timestamp: u64) -> StoreResult<usize> {
        let mut state = self.state.write();
        let doomed: Vec<TxKey> = state
            .index
            .iter()
            .filter(|(_, entry)| entry.archivable(max_block_number, max_timestamp))
            .map(|(key, _)| *key)
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        let first_seq = state.next_seq;
        let tombstones = doomed
            .iter()
            .zip(first_seq..)
            .map(|(key, seq)| Frame::tombstone(key, seq))
            .collect::<StoreResult<Vec<_>>>()?;
        state.append(&tombstones, self.config.sync_on_write)?;

        for key in &doomed {
            state.index_remove(key);
        }

        info!(
            removed = doomed.len(),
            max_block_number, max_timestamp, "archived records removed"
        );
        Ok(doomed.len())
    }

    fn clear_all(&self) -> StoreResult<()> {
        let mut state = self.state.write();
        state.backend.rewrite(&[])?;
        let removed = state.index.len();
        state.index.clear();
        state.by_id.clear();
        state.physical = 0;
        state.rewrites += 1;
        warn!(removed, "transaction store cleared");
        Ok(())
    }

    fn compaction_due(&self) -> bool {
        let dead = self.state.read().dead();
        dead > 0 && dead >= self.config.compaction_threshold
    }

    fn compact(&self) -> StoreResult<CompactionStats> {
        let pending = self.state.read().copy_live()?;

        let mut state = self.state.write();
        let stats = match state.swap_in(pending)? {
            Some(stats) => stats,
            None => {
                debug!("log rewritten during compaction copy, copying again under the write lock");
                let pending = state.copy_live()?;
                state
                    .swap_in(pending)?
                    .ok_or_else(|| StoreError::corrupted(0, "log moved under the write lock"))?
            }
        };

        info!(
            frames_before = stats.frames_before,
            frames_after = stats.frames_after,
            bytes_before = stats.bytes_before,
            bytes_after = stats.bytes_after,
            "transaction log compacted"
        );
        Ok(stats)
    }

    fn stats(&self) -> StoreStats {
        let state = self.state.read();
        StoreStats {
            live_records: state.index.len(),
            physical_records: state.physical,
            dead_records: state.dead(),
            log_bytes: state.backend.size().unwrap_or_default(),
            compactions: state.compactions,
        }
    }
}
