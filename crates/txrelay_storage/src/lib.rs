//! # txrelay storage
//!
//! Byte-level storage backends underneath the relay's transaction log.
//!
//! A backend is an append-only byte sink with random reads. It does not know
//! what a transaction, a frame or a tombstone is; `txrelay_store` owns the
//! log format and only relies on the contract of [`StorageBackend`]:
//!
//! - `append` returns the offset the bytes landed at
//! - `sync` makes everything appended so far survive a crash
//! - `rewrite` swaps the whole content atomically (used by compaction)
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - tests and ephemeral stores; clones share one buffer
//!   so a test can "restart" a store over the same bytes
//! - [`FileBackend`] - a single file on disk
//!
//! ## Example
//!
//! ```rust
//! use txrelay_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
