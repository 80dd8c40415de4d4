//! Chain error types.

use crate::naming::NamingMismatch;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Errors that can occur while managing the account chain and its ledgers.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("sequence violation: {0}")]
    SequenceViolation(#[from] NamingMismatch),

    #[error("chain is full: index {0} cannot be expressed in three digits")]
    ChainFull(u32),

    #[error("active account over quota threshold: used {used} of {total} bytes")]
    QuotaExceeded { used: u64, total: u64 },

    #[error("active account is not full yet: used {used} of {total} bytes")]
    RolloverNotRequired { used: u64, total: u64 },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("transfer of {name} failed after {attempts} attempt(s): {reason}")]
    Transfer {
        name: String,
        attempts: u32,
        reason: String,
    },

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("chain already initialized")]
    AlreadyInitialized,

    #[error("chain not initialized")]
    NotInitialized,

    #[error("corrupt chain state: {0}")]
    CorruptState(String),

    #[error("unknown account index {0}")]
    UnknownAccount(u32),

    #[error("account {index} is not the active account (active is {active})")]
    AccountNotActive { index: u32, active: u32 },

    #[error("no ledger entry {name} for account {account}")]
    EntryNotFound { account: u32, name: String },

    #[error("invalid payload name: {0}")]
    InvalidName(String),

    #[error("local root {} is in use by another invocation", .0.display())]
    RootLocked(PathBuf),

    #[error("remote storage error: {message}")]
    Remote { message: String, transient: bool },

    #[error("credential error: {0}")]
    Credential(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChainError {
    /// Transient remote failures are the only errors worth retrying
    /// automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::Remote { transient: true, .. })
    }

    /// True when the failed operation left no persisted side effect, so the
    /// operator can correct the input and run the same command again.
    pub fn is_safe_to_retry(&self) -> bool {
        !matches!(self, ChainError::Io(_))
    }

    pub(crate) fn remote(message: impl Into<String>, transient: bool) -> Self {
        ChainError::Remote {
            message: message.into(),
            transient,
        }
    }
}
