//! # txrelay testkit
//!
//! Test utilities for the txrelay crates.
//!
//! This crate provides:
//! - [`MockLedger`], an in-process ledger with a mempool, replacement rules
//!   and on-demand blocks
//! - [`StaticFeeSource`], a steerable fee source
//! - [`DeterministicKeyManager`], seed-derived worker keys whose raw format
//!   [`MockLedger`] decodes
//! - [`CrashableBackend`], a storage backend that fails on command
//! - Record fixtures and a fully wired [`RelayHarness`]
//! - Property-based generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txrelay_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn sends() {
//!     let harness = RelayHarness::new(test_config(), Arc::new(MemoryStore::new()), 1);
//!     harness.manager.recover().await.unwrap();
//!     // ... test operations
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fees;
pub mod fixtures;
pub mod generators;
pub mod keys;
pub mod ledger;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fees::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::keys::*;
    pub use crate::ledger::*;
}

pub use crash::{CrashSwitch, CrashableBackend};
pub use fees::StaticFeeSource;
pub use fixtures::*;
pub use generators::*;
pub use keys::{DeterministicKeyManager, RawEnvelope};
pub use ledger::{block_at, block_hash, MockLedger, BLOCK_TIME, GENESIS_TIMESTAMP};
