//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store for the transaction log.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - after `sync` returns, all appended bytes survive process termination
/// - `rewrite` either fully replaces the content or leaves it untouched
///
/// Backends must be `Send + Sync`; the store serializes writers itself.
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range is not fully
    /// inside the current content, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data and returns the offset where it starts.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs. A failed append may have
    /// written a prefix of `data`; readers must tolerate a torn tail.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Makes all appended data and the file metadata durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes, i.e. the offset of the next append.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Truncates the content to `new_size` bytes.
    ///
    /// Used to cut a torn frame off the end of the log during recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is larger than the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the whole content with `data`.
    ///
    /// After a successful return the new content is durable. If the call
    /// fails the previous content is still readable.
    ///
    /// # Errors
    ///
    /// Returns an error if the replacement could not be made durable.
    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()>;
}
