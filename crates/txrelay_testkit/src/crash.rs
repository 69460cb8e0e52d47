//! Fault injection for the storage layer.
//!
//! [`CrashableBackend`] wraps another backend and fails on command. The store
//! takes ownership of the backend, so the test keeps a [`CrashSwitch`] to flip
//! failures on and off from outside.
//!
//! ```rust,ignore
//! let (backend, switch) = CrashableBackend::new(Box::new(InMemoryBackend::new()));
//! let store = LogStore::with_backend(Box::new(backend), StoreConfig::default())?;
//! switch.fail_appends(true);
//! assert!(store.put(&record, false).is_err());
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use txrelay_storage::{StorageBackend, StorageError, StorageResult};

#[derive(Debug)]
struct CrashState {
    fail_appends: AtomicBool,
    fail_syncs: AtomicBool,
    crash_after_bytes: AtomicU64,
    bytes_written: AtomicU64,
    crashed: AtomicBool,
}

impl CrashState {
    fn crash(&self, message: &str) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        StorageError::io_other(message)
    }
}

/// Remote control for a [`CrashableBackend`].
#[derive(Debug, Clone)]
pub struct CrashSwitch {
    state: Arc<CrashState>,
}

impl CrashSwitch {
    /// Makes every append fail without writing.
    pub fn fail_appends(&self, fail: bool) {
        self.state.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Makes every flush and sync fail.
    pub fn fail_syncs(&self, fail: bool) {
        self.state.fail_syncs.store(fail, Ordering::SeqCst);
    }

    /// Lets `bytes` more bytes through, then writes a partial append and fails.
    pub fn crash_after(&self, bytes: u64) {
        self.state.bytes_written.store(0, Ordering::SeqCst);
        self.state.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Clears every injected failure.
    pub fn reset(&self) {
        self.state.fail_appends.store(false, Ordering::SeqCst);
        self.state.fail_syncs.store(false, Ordering::SeqCst);
        self.state.crash_after_bytes.store(u64::MAX, Ordering::SeqCst);
        self.state.bytes_written.store(0, Ordering::SeqCst);
        self.state.crashed.store(false, Ordering::SeqCst);
    }

    /// Whether an injected failure fired since the last reset.
    #[must_use]
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    state: Arc<CrashState>,
}

impl CrashableBackend {
    /// Wraps `inner`, returning the backend and its switch.
    #[must_use]
    pub fn new(inner: Box<dyn StorageBackend>) -> (Self, CrashSwitch) {
        let state = Arc::new(CrashState {
            fail_appends: AtomicBool::new(false),
            fail_syncs: AtomicBool::new(false),
            crash_after_bytes: AtomicU64::new(u64::MAX),
            bytes_written: AtomicU64::new(0),
            crashed: AtomicBool::new(false),
        });
        let switch = CrashSwitch {
            state: Arc::clone(&state),
        };
        (Self { inner, state }, switch)
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.state.fail_appends.load(Ordering::SeqCst) {
            return Err(self.state.crash("simulated crash before write"));
        }

        let len = data.len() as u64;
        let written = self.state.bytes_written.fetch_add(len, Ordering::SeqCst);
        let threshold = self.state.crash_after_bytes.load(Ordering::SeqCst);
        if written.saturating_add(len) > threshold {
            let partial = threshold.saturating_sub(written) as usize;
            if partial > 0 {
                let _ = self.inner.append(&data[..partial]);
            }
            return Err(self.state.crash("simulated crash during write"));
        }

        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.state.fail_syncs.load(Ordering::SeqCst) {
            return Err(self.state.crash("simulated crash during flush"));
        }
        self.inner.flush()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.state.fail_syncs.load(Ordering::SeqCst) {
            return Err(self.state.crash("simulated crash during sync"));
        }
        self.inner.sync()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }

    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()> {
        if self.state.fail_appends.load(Ordering::SeqCst) {
            return Err(self.state.crash("simulated crash during rewrite"));
        }
        self.inner.rewrite(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txrelay_storage::InMemoryBackend;

    #[test]
    fn partial_write_then_failure() {
        let memory = InMemoryBackend::new();
        let (mut backend, switch) = CrashableBackend::new(Box::new(memory.clone()));

        backend.append(b"abc").unwrap();
        switch.crash_after(2);
        assert!(backend.append(b"defg").is_err());
        assert!(switch.has_crashed());
        assert_eq!(memory.data(), b"abcde");

        switch.reset();
        backend.append(b"h").unwrap();
        assert_eq!(memory.data(), b"abcdeh");
    }

    #[test]
    fn failed_append_writes_nothing() {
        let memory = InMemoryBackend::new();
        let (mut backend, switch) = CrashableBackend::new(Box::new(memory.clone()));

        switch.fail_appends(true);
        assert!(backend.append(b"abc").is_err());
        assert!(memory.data().is_empty());

        switch.fail_appends(false);
        switch.fail_syncs(true);
        backend.append(b"abc").unwrap();
        assert!(backend.sync().is_err());
    }
}
