//! Backup pool configuration.

use crate::error::{ChainError, ChainResult};
use crate::quota::NOMINAL_QUOTA_BYTES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for a backup pool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Local root holding the chain state, ledgers and mirrors.
    pub root: PathBuf,

    /// Directory backing the filesystem remote. `None` means no remote is
    /// configured and transfer commands are unavailable.
    pub remote_dir: Option<PathBuf>,

    /// Mail domain every account identifier must use.
    pub domain: String,

    /// Attempts per file transfer before it is recorded as failed.
    pub transfer_attempts: u32,

    /// Quota reported by the filesystem remote for each account.
    pub remote_quota_bytes: u64,

    /// Refresh credentials this many seconds before they expire.
    pub credential_refresh_margin_secs: i64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("cloud_backup"),
            remote_dir: None,
            domain: "gmail.com".to_string(),
            transfer_attempts: 3,
            remote_quota_bytes: NOMINAL_QUOTA_BYTES,
            credential_refresh_margin_secs: 300, // 5 minutes before expiry
        }
    }
}

impl ChainConfig {
    /// Creates a config rooted at `root` with defaults for everything else.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Loads a JSON config file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> ChainResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            ChainError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_slice(&bytes)
            .map_err(|e| ChainError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ChainResult<()> {
        if self.transfer_attempts == 0 {
            return Err(ChainError::Config("transfer_attempts must be at least 1".into()));
        }
        if self.domain.is_empty() || self.domain.contains('@') {
            return Err(ChainError::Config(format!("invalid domain {:?}", self.domain)));
        }
        if self.root.as_os_str().is_empty() {
            return Err(ChainError::Config("root must not be empty".into()));
        }
        Ok(())
    }
}
