//! CLI errors.

use thiserror::Error;
use txrelay_storage::StorageError;
use txrelay_store::StoreError;

/// Result type of CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The command needs `--path`.
    #[error("store path required (--path)")]
    MissingPath,

    /// The store refused the operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The log file could not be read.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Output could not be serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// `verify` found damage.
    #[error("verification failed: {0}")]
    VerifyFailed(String),
}
