//! Transfer orchestration between the local mirror and the remote accounts.
//!
//! The engine borrows the chain and ledgers for the duration of one
//! operation and drives the remote through a [`RemoteStorage`] session.
//! Batch syncs are continue-on-error: a file that fails after its retries is
//! recorded in the report and the batch moves on.

use crate::chain::ChainManager;
use crate::credential_manager::CredentialManager;
use crate::error::{ChainError, ChainResult};
use crate::layout;
use crate::ledger::{HealReport, LedgerBook, LedgerEntry, Presence};
use crate::remote::{RemoteStorage, REMOTE_BACKUP_DIR};
use crate::types::{AccountSession, QuotaSnapshot};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Attempts per file before a transfer counts as failed.
pub const DEFAULT_TRANSFER_ATTEMPTS: u32 = 3;

/// Direction of a batch sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SyncDirection {
    LocalToCloud,
    CloudToLocal,
}

/// A file that could not be transferred.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TransferFailure {
    pub name: String,
    /// Attempts actually made; zero when the file was never tried.
    pub attempts: u32,
    pub reason: String,
}

impl From<TransferFailure> for ChainError {
    fn from(f: TransferFailure) -> Self {
        ChainError::Transfer {
            name: f.name,
            attempts: f.attempts,
            reason: f.reason,
        }
    }
}

/// Outcome of a batch sync.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub account_index: u32,
    pub transferred: Vec<String>,
    /// Entries that needed nothing in this direction.
    pub skipped: usize,
    pub failures: Vec<TransferFailure>,
    /// Heal pass run before the batch.
    pub heal: HealReport,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of a single-file upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub entry: LedgerEntry,
    /// True when the refreshed quota now calls for adding the next account.
    pub rollover_required: bool,
}

/// Runs `op` up to `attempts` times, retrying only transient errors.
pub async fn with_retries<T, F, Fut>(
    attempts: u32,
    name: &str,
    mut op: F,
) -> Result<T, TransferFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ChainResult<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!("{name}: attempt {attempt}/{attempts} failed, retrying: {e}");
                attempt += 1;
            }
            Err(e) => {
                return Err(TransferFailure {
                    name: name.to_string(),
                    attempts: attempt,
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Borrowed view of one pool, ready to move data.
pub struct SyncEngine<'a> {
    chain: &'a mut ChainManager,
    ledgers: &'a mut LedgerBook,
    remote: &'a dyn RemoteStorage,
    credentials: &'a CredentialManager,
    attempts: u32,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        chain: &'a mut ChainManager,
        ledgers: &'a mut LedgerBook,
        remote: &'a dyn RemoteStorage,
        credentials: &'a CredentialManager,
        attempts: u32,
    ) -> Self {
        Self {
            chain,
            ledgers,
            remote,
            credentials,
            attempts,
        }
    }

    /// Uploads one file to the active account, mirrors it locally and
    /// records it in the ledger.
    pub async fn upload_file(&mut self, source: &Path) -> ChainResult<UploadOutcome> {
        let active = self.chain.active()?.clone();
        self.ensure_room(&active.quota)?;

        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ChainError::InvalidName(source.display().to_string()))?
            .to_string();
        layout::validate_payload_name(&name)?;
        let meta = fs::metadata(source)?;
        if !meta.is_file() {
            return Err(ChainError::InvalidName(format!(
                "{} is not a regular file",
                source.display()
            )));
        }
        let source = fs::canonicalize(source)?;

        let session = self.credentials.session(&active.identifier).await?;
        let remote = self.remote;
        let remote_id = with_retries(self.attempts, &name, || remote.upload(&session, &source)).await?;

        let mirror = self.ledgers.mirror_path(active.index, &name)?;
        if !same_file(&source, &mirror) {
            layout::copy_atomic(&source, &mirror)?;
        }
        let entry = self
            .ledgers
            .record_upload(active.index, &name, meta.len(), &source, &remote_id)?;

        let rollover_required = self.refresh_quota_with(&session, active.index).await?;
        if rollover_required {
            warn!("account {} crossed the rollover threshold", active.identifier);
        }
        Ok(UploadOutcome {
            entry,
            rollover_required,
        })
    }

    /// Downloads one tracked payload into the mirror of its account.
    pub async fn download_file(&mut self, account_index: u32, name: &str) -> ChainResult<PathBuf> {
        let account = self.chain.account(account_index)?.clone();
        let entry = self
            .ledgers
            .ledger(account_index)?
            .get(name)
            .cloned()
            .ok_or_else(|| ChainError::EntryNotFound {
                account: account_index,
                name: name.to_string(),
            })?;
        let remote_id = remote_id_of(&entry)?;

        let session = self.credentials.session(&account.identifier).await?;
        let mirror = self.ledgers.mirror_path(account_index, name)?;
        let remote = self.remote;
        with_retries(self.attempts, name, || {
            remote.download(&session, remote_id, &mirror)
        })
        .await?;
        self.ledgers.record_download(account_index, name)?;
        Ok(mirror)
    }

    /// Deletes the remote copy of a payload and records it. Returns what is
    /// left of the entry, `None` if it was pruned.
    pub async fn delete_remote(&mut self, account_index: u32, name: &str) -> ChainResult<Option<Presence>> {
        let account = self.chain.account(account_index)?.clone();
        let entry = self
            .ledgers
            .ledger(account_index)?
            .get(name)
            .cloned()
            .ok_or_else(|| ChainError::EntryNotFound {
                account: account_index,
                name: name.to_string(),
            })?;

        if entry.remote_present {
            let remote_id = remote_id_of(&entry)?;
            let session = self.credentials.session(&account.identifier).await?;
            let remote = self.remote;
            with_retries(self.attempts, name, || remote.delete(&session, remote_id)).await?;
        }
        self.ledgers.delete_cloud(account_index, name)
    }

    /// Asks the remote for the active account's usage and stores it.
    pub async fn refresh_quota(&mut self) -> ChainResult<QuotaSnapshot> {
        let active = self.chain.active()?.clone();
        let session = self.credentials.session(&active.identifier).await?;
        let remote = self.remote;
        let (used, total) =
            with_retries(self.attempts, "quota", || remote.quota(&session)).await?;
        self.chain.record_quota(active.index, used, total)?;
        self.chain
            .active()?
            .quota
            .ok_or_else(|| ChainError::CorruptState("quota not recorded".into()))
    }

    /// Uploads every `LocalOnly` entry of the active account.
    ///
    /// Stops uploading once the refreshed quota calls for rollover; the
    /// remaining entries are reported as failures so nothing is silently
    /// dropped.
    pub async fn sync_local_to_cloud(&mut self, account_index: u32) -> ChainResult<SyncReport> {
        let active = self.chain.active()?.clone();
        if active.index != account_index {
            self.chain.account(account_index)?;
            return Err(ChainError::AccountNotActive {
                index: account_index,
                active: active.index,
            });
        }
        self.ensure_room(&active.quota)?;

        let heal = self.ledgers.heal(account_index)?;
        let ledger = self.ledgers.ledger(account_index)?;
        let pending = ledger.names_with(Presence::LocalOnly);
        let mut report = SyncReport {
            account_index,
            skipped: ledger.len() - pending.len(),
            heal,
            ..SyncReport::default()
        };
        if pending.is_empty() {
            debug!("account {account_index}: nothing to upload");
            return Ok(report);
        }

        let session = self.credentials.session(&active.identifier).await?;
        let remote = self.remote;
        let mut over_quota = false;
        for name in pending {
            if over_quota {
                report.failures.push(TransferFailure {
                    name,
                    attempts: 0,
                    reason: "account reached its rollover threshold".into(),
                });
                continue;
            }

            let mirror = self.ledgers.mirror_path(account_index, &name)?;
            let entry = self
                .ledgers
                .ledger(account_index)?
                .get(&name)
                .cloned()
                .ok_or_else(|| ChainError::EntryNotFound {
                    account: account_index,
                    name: name.clone(),
                })?;

            match with_retries(self.attempts, &name, || remote.upload(&session, &mirror)).await {
                Ok(remote_id) => {
                    let size = fs::metadata(&mirror).map_or(entry.size_bytes, |m| m.len());
                    self.ledgers.record_upload(
                        account_index,
                        &name,
                        size,
                        &entry.source_path,
                        &remote_id,
                    )?;
                    report.transferred.push(name);
                    over_quota = self.refresh_quota_with(&session, account_index).await?;
                }
                Err(failure) => {
                    warn!("upload of {} failed: {}", failure.name, failure.reason);
                    report.failures.push(failure);
                }
            }
        }

        info!(
            "account {account_index}: uploaded {}, failed {}",
            report.transferred.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Downloads every `CloudOnly` entry of an account. Works on exhausted
    /// accounts too.
    pub async fn sync_cloud_to_local(&mut self, account_index: u32) -> ChainResult<SyncReport> {
        let account = self.chain.account(account_index)?.clone();
        let heal = self.ledgers.heal(account_index)?;
        let ledger = self.ledgers.ledger(account_index)?;
        let pending = ledger.names_with(Presence::CloudOnly);
        let mut report = SyncReport {
            account_index,
            skipped: ledger.len() - pending.len(),
            heal,
            ..SyncReport::default()
        };
        if pending.is_empty() {
            debug!("account {account_index}: nothing to download");
            return Ok(report);
        }

        let session = self.credentials.session(&account.identifier).await?;
        let remote = self.remote;
        let listed = with_retries(self.attempts, REMOTE_BACKUP_DIR, || {
            remote.list(&session, REMOTE_BACKUP_DIR)
        })
        .await?;
        let inventory: HashSet<String> = listed.into_iter().map(|o| o.remote_id).collect();

        for name in pending {
            let entry = self
                .ledgers
                .ledger(account_index)?
                .get(&name)
                .cloned()
                .ok_or_else(|| ChainError::EntryNotFound {
                    account: account_index,
                    name: name.clone(),
                })?;
            let remote_id = match entry.remote_id.as_deref() {
                Some(id) if inventory.contains(id) => id,
                Some(id) => {
                    warn!("{name}: remote object {id} is missing");
                    report.failures.push(TransferFailure {
                        name,
                        attempts: 0,
                        reason: format!("remote object {id} is missing"),
                    });
                    continue;
                }
                None => {
                    report.failures.push(TransferFailure {
                        name,
                        attempts: 0,
                        reason: "no remote id recorded".into(),
                    });
                    continue;
                }
            };

            let mirror = self.ledgers.mirror_path(account_index, &name)?;
            match with_retries(self.attempts, &name, || {
                remote.download(&session, remote_id, &mirror)
            })
            .await
            {
                Ok(()) => {
                    self.ledgers.record_download(account_index, &name)?;
                    report.transferred.push(name);
                }
                Err(failure) => {
                    warn!("download of {} failed: {}", failure.name, failure.reason);
                    report.failures.push(failure);
                }
            }
        }

        info!(
            "account {account_index}: downloaded {}, failed {}",
            report.transferred.len(),
            report.failures.len()
        );
        Ok(report)
    }

    fn ensure_room(&self, quota: &Option<QuotaSnapshot>) -> ChainResult<()> {
        match quota {
            Some(q) if q.needs_rollover() => Err(ChainError::QuotaExceeded {
                used: q.used_bytes,
                total: q.total_bytes,
            }),
            _ => Ok(()),
        }
    }

    /// Refreshes the quota after a transfer. A failed refresh keeps the last
    /// snapshot and is not an error: the transfer itself succeeded.
    async fn refresh_quota_with(&mut self, session: &AccountSession, index: u32) -> ChainResult<bool> {
        let remote = self.remote;
        match with_retries(self.attempts, "quota", || remote.quota(session)).await {
            Ok((used, total)) => {
                self.chain.record_quota(index, used, total)?;
            }
            Err(failure) => {
                warn!("quota refresh failed, keeping last snapshot: {}", failure.reason);
            }
        }
        self.chain.rollover_required()
    }
}

fn remote_id_of(entry: &LedgerEntry) -> ChainResult<&str> {
    match (entry.remote_present, entry.remote_id.as_deref()) {
        (true, Some(id)) => Ok(id),
        _ => Err(ChainError::Transfer {
            name: entry.name.clone(),
            attempts: 0,
            reason: "not present remotely".into(),
        }),
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
