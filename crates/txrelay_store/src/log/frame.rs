//! Log frame encoding and the recovery scan.
//!
//! Frame layout (little-endian):
//!
//! ```text
//! | magic "TXRL" (4) | payload_len (4) | kind (1) | seq (8) | payload | crc32 (4) |
//! ```
//!
//! The checksum covers every byte before it. Put payloads are CBOR-encoded
//! [`StoredTransaction`]s, tombstone payloads CBOR-encoded [`TxKey`]s.

use crate::error::{StoreError, StoreResult};
use crate::transaction::{StoredTransaction, TxKey};
use txrelay_storage::StorageBackend;

/// Frame marker.
pub(crate) const MAGIC: [u8; 4] = *b"TXRL";
/// magic (4) + payload_len (4) + kind (1) + seq (8)
pub(crate) const HEADER_SIZE: usize = 17;
/// Trailing checksum.
pub(crate) const CRC_SIZE: usize = 4;
/// Upper bound on a payload; anything larger is a damaged length field.
pub(crate) const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// What a frame records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A record was written to its slot.
    Put,
    /// A slot was emptied.
    Tombstone,
}

impl FrameKind {
    const fn as_byte(self) -> u8 {
        match self {
            Self::Put => 1,
            Self::Tombstone => 2,
        }
    }

    const fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Put),
            2 => Some(Self::Tombstone),
            _ => None,
        }
    }
}

/// One decoded log frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame kind.
    pub kind: FrameKind,
    /// Write sequence number, strictly increasing through the log.
    pub seq: u64,
    /// Encoded body.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Builds a put frame for `tx`.
    pub fn put(tx: &StoredTransaction, seq: u64) -> StoreResult<Self> {
        Ok(Self {
            kind: FrameKind::Put,
            seq,
            payload: encode_cbor(tx)?,
        })
    }

    /// Builds a tombstone frame for `key`.
    pub fn tombstone(key: &TxKey, seq: u64) -> StoreResult<Self> {
        Ok(Self {
            kind: FrameKind::Tombstone,
            seq,
            payload: encode_cbor(key)?,
        })
    }

    /// Total encoded size.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len() + CRC_SIZE
    }

    /// Encodes the frame.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.push(self.kind.as_byte());
        buf.extend_from_slice(&self.seq.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes the body of a put frame.
    pub fn transaction(&self) -> StoreResult<StoredTransaction> {
        ciborium::de::from_reader(self.payload.as_slice()).map_err(StoreError::codec)
    }

    /// Decodes the body of a tombstone frame.
    pub fn key(&self) -> StoreResult<TxKey> {
        ciborium::de::from_reader(self.payload.as_slice()).map_err(StoreError::codec)
    }
}

fn encode_cbor<T: serde::Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(StoreError::codec)?;
    Ok(buf)
}

/// Why the bytes at some offset are not a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Defect {
    /// The frame runs past the end of the data.
    Truncated,
    /// The frame fits but is damaged.
    Damaged(String),
}

/// Decodes the frame starting at `data[0]`, returning it and its length.
pub(super) fn decode_frame(data: &[u8]) -> Result<(Frame, usize), Defect> {
    if data.len() < HEADER_SIZE {
        return Err(Defect::Truncated);
    }
    if data[..4] != MAGIC {
        return Err(Defect::Damaged("bad frame magic".into()));
    }

    let payload_len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
    if payload_len > MAX_PAYLOAD {
        return Err(Defect::Damaged(format!("payload length {payload_len} too large")));
    }
    let total = HEADER_SIZE + payload_len + CRC_SIZE;
    if data.len() < total {
        return Err(Defect::Truncated);
    }

    let body_end = total - CRC_SIZE;
    let stored = u32::from_le_bytes([
        data[body_end],
        data[body_end + 1],
        data[body_end + 2],
        data[body_end + 3],
    ]);
    let computed = crc32fast::hash(&data[..body_end]);
    if stored != computed {
        return Err(Defect::Damaged(format!(
            "checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
        )));
    }

    let kind = FrameKind::from_byte(data[8])
        .ok_or_else(|| Defect::Damaged(format!("unknown frame kind {}", data[8])))?;
    let mut seq = [0u8; 8];
    seq.copy_from_slice(&data[9..17]);

    Ok((
        Frame {
            kind,
            seq: u64::from_le_bytes(seq),
            payload: data[HEADER_SIZE..body_end].to_vec(),
        },
        total,
    ))
}

/// State of the end of the log after a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailState {
    /// Every byte belongs to a valid frame.
    Clean,
    /// An interrupted final write left bytes that must be discarded.
    Torn {
        /// Offset where the partial frame starts.
        offset: u64,
        /// Bytes past `offset`.
        discarded: u64,
        /// What was wrong with them.
        reason: String,
    },
}

impl TailState {
    /// Returns true if the scan found a partial final frame.
    #[must_use]
    pub const fn is_torn(&self) -> bool {
        matches!(self, Self::Torn { .. })
    }
}

/// Result of scanning a whole log.
#[derive(Debug, Clone)]
pub struct LogScan {
    /// Valid frames with their offsets, in log order.
    pub frames: Vec<(u64, Frame)>,
    /// Length of the valid prefix.
    pub valid_len: u64,
    /// What follows the valid prefix.
    pub tail: TailState,
}

/// Reads every frame of the log held by `backend`.
///
/// A partial or damaged *final* frame is the footprint of a crash during an
/// append and is reported as [`TailState::Torn`]. A damaged frame followed by
/// more data cannot come from a crash and fails with
/// [`StoreError::Corrupted`], as does a sequence number that goes backwards.
pub fn scan_log(backend: &dyn StorageBackend) -> StoreResult<LogScan> {
    let size = backend.size()?;
    let data = backend.read_at(0, size as usize)?;

    let mut frames = Vec::new();
    let mut offset = 0usize;
    let mut last_seq: Option<u64> = None;

    while offset < data.len() {
        let rest = &data[offset..];
        match decode_frame(rest) {
            Ok((frame, len)) => {
                if last_seq.is_some_and(|prev| frame.seq <= prev) {
                    return Err(StoreError::corrupted(
                        offset as u64,
                        format!("sequence {} does not follow {:?}", frame.seq, last_seq),
                    ));
                }
                last_seq = Some(frame.seq);
                frames.push((offset as u64, frame));
                offset += len;
            }
            Err(Defect::Truncated) => {
                return Ok(torn(frames, offset, data.len(), "incomplete frame"));
            }
            Err(Defect::Damaged(reason)) => {
                if is_final_frame(rest) {
                    return Ok(torn(frames, offset, data.len(), reason));
                }
                return Err(StoreError::corrupted(offset as u64, reason));
            }
        }
    }

    Ok(LogScan {
        frames,
        valid_len: offset as u64,
        tail: TailState::Clean,
    })
}

fn torn(frames: Vec<(u64, Frame)>, offset: usize, size: usize, reason: impl Into<String>) -> LogScan {
    LogScan {
        frames,
        valid_len: offset as u64,
        tail: TailState::Torn {
            offset: offset as u64,
            discarded: (size - offset) as u64,
            reason: reason.into(),
        },
    }
}

/// Whether damaged bytes at the start of `rest` can only be the last write.
///
/// True when the declared frame ends exactly at the end of the data, or when
/// everything left is zero fill.
fn is_final_frame(rest: &[u8]) -> bool {
    if rest.iter().all(|&b| b == 0) {
        return true;
    }
    if rest.len() < HEADER_SIZE || rest[..4] != MAGIC {
        return false;
    }
    let payload_len = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
    HEADER_SIZE + payload_len + CRC_SIZE == rest.len()
}
