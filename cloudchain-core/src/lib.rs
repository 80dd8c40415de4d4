//! Account chain and backup pool for CloudChain.
//!
//! Pools free-tier storage accounts into one sequential backup target:
//! - Account chain with a strict `<base><NNN>.cloudchain@<domain>` naming rule
//! - Per-account ledgers tracking where each payload lives
//! - Quota monitoring and rollover to the next account
//! - Continue-on-error sync between the local mirror and the remote
//! - Passphrase-encrypted export and restore of the whole local state
//!
//! All local state lives under one root directory, guarded by an advisory
//! lock for the lifetime of a [`BackupPool`].

pub mod chain;
pub mod config;
pub mod credential_manager;
pub mod error;
pub mod layout;
pub mod ledger;
pub mod naming;
pub mod pool;
pub mod portability;
pub mod quota;
pub mod remote;
pub mod sync_engine;
pub mod types;

pub use chain::ChainManager;
pub use config::ChainConfig;
pub use credential_manager::{CredentialManager, CredentialProvider, LocalTokenProvider};
pub use error::{ChainError, ChainResult};
pub use ledger::{classify, HealReport, Ledger, LedgerBook, LedgerEntry, Presence};
pub use pool::BackupPool;
pub use remote::{FsRemote, RemoteStorage};
pub use sync_engine::{SyncDirection, SyncReport, TransferFailure, UploadOutcome};
pub use types::*;
