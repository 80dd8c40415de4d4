//! Remote storage seam.
//!
//! The core never talks to a provider API directly; it drives a
//! [`RemoteStorage`] implementation scoped to one account's `/backup/`
//! folder per call. [`FsRemote`] keeps each account's folder in a local
//! directory and is what the CLI uses when no provider client is wired in.

use crate::error::{ChainError, ChainResult};
use crate::layout::{self, TEMP_PREFIX};
use crate::naming;
use crate::types::{AccountSession, RemoteObject};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Remote folder every account stores its payloads under.
pub const REMOTE_BACKUP_DIR: &str = "/backup/";

/// Transfer primitives of a storage provider. Remote ids are opaque to the
/// core; they are stored in the ledger and handed back unchanged.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Uploads a file into `/backup/` under its basename.
    async fn upload(&self, session: &AccountSession, local_path: &Path) -> ChainResult<String>;

    /// Downloads an object to `local_path`, replacing any existing file.
    async fn download(
        &self,
        session: &AccountSession,
        remote_id: &str,
        local_path: &Path,
    ) -> ChainResult<()>;

    /// Deletes an object. Deleting a missing object succeeds.
    async fn delete(&self, session: &AccountSession, remote_id: &str) -> ChainResult<()>;

    /// Lists objects whose id starts with `prefix`.
    async fn list(&self, session: &AccountSession, prefix: &str) -> ChainResult<Vec<RemoteObject>>;

    /// Returns `(used_bytes, total_bytes)` for the account.
    async fn quota(&self, session: &AccountSession) -> ChainResult<(u64, u64)>;
}

/// Directory-backed remote: `<dir>/<account local part>/backup/<name>`.
pub struct FsRemote {
    dir: PathBuf,
    quota_bytes: u64,
}

impl FsRemote {
    pub fn new(dir: impl Into<PathBuf>, quota_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            quota_bytes,
        }
    }

    fn backup_dir(&self, session: &AccountSession) -> PathBuf {
        self.dir
            .join(naming::local_part(&session.identifier))
            .join("backup")
    }

    fn object_path(&self, session: &AccountSession, remote_id: &str) -> ChainResult<PathBuf> {
        let name = remote_id
            .strip_prefix(REMOTE_BACKUP_DIR)
            .ok_or_else(|| ChainError::remote(format!("unknown remote id {remote_id}"), false))?;
        layout::validate_payload_name(name)
            .map_err(|_| ChainError::remote(format!("unknown remote id {remote_id}"), false))?;
        Ok(self.backup_dir(session).join(name))
    }

    fn check_session(session: &AccountSession) -> ChainResult<()> {
        if session.token.account != session.identifier {
            return Err(ChainError::Credential(format!(
                "credential for {} used with {}",
                session.token.account, session.identifier
            )));
        }
        if session.token.is_expired() {
            return Err(ChainError::Credential(format!(
                "credential for {} expired",
                session.identifier
            )));
        }
        Ok(())
    }

    async fn used_bytes(&self, session: &AccountSession) -> ChainResult<u64> {
        Ok(self
            .list(session, REMOTE_BACKUP_DIR)
            .await?
            .iter()
            .map(|o| o.size_bytes)
            .sum())
    }
}

/// Interrupted or timed-out I/O is worth another attempt; everything else
/// is permanent.
fn io_to_remote(op: &str, target: &Path, e: io::Error) -> ChainError {
    let transient = matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    );
    ChainError::remote(format!("{op} {}: {e}", target.display()), transient)
}

/// Copies via a temp file in the destination directory, then renames.
async fn copy_replace(src: &Path, dest: &Path) -> io::Result<u64> {
    let parent = dest
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent"))?;
    tokio::fs::create_dir_all(parent).await?;
    let tmp = parent.join(format!("{TEMP_PREFIX}-{}", uuid::Uuid::new_v4()));
    let copied = match tokio::fs::copy(src, &tmp).await {
        Ok(n) => n,
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
    };
    if let Err(e) = tokio::fs::rename(&tmp, dest).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(copied)
}

#[async_trait]
impl RemoteStorage for FsRemote {
    async fn upload(&self, session: &AccountSession, local_path: &Path) -> ChainResult<String> {
        Self::check_session(session)?;
        let name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ChainError::InvalidName(local_path.display().to_string()))?;
        let remote_id = format!("{REMOTE_BACKUP_DIR}{name}");
        let target = self.object_path(session, &remote_id)?;

        let size = tokio::fs::metadata(local_path)
            .await
            .map_err(|e| io_to_remote("stat", local_path, e))?
            .len();
        let replaced = tokio::fs::metadata(&target).await.map_or(0, |m| m.len());
        let used = self.used_bytes(session).await?;
        if used.saturating_sub(replaced) + size > self.quota_bytes {
            return Err(ChainError::remote(
                format!("{} has no room for {size} more bytes", session.identifier),
                false,
            ));
        }

        copy_replace(local_path, &target)
            .await
            .map_err(|e| io_to_remote("upload", &target, e))?;
        debug!("uploaded {size} bytes to {}:{remote_id}", session.identifier);
        Ok(remote_id)
    }

    async fn download(
        &self,
        session: &AccountSession,
        remote_id: &str,
        local_path: &Path,
    ) -> ChainResult<()> {
        Self::check_session(session)?;
        let source = self.object_path(session, remote_id)?;
        let copied = copy_replace(&source, local_path)
            .await
            .map_err(|e| io_to_remote("download", &source, e))?;
        debug!("downloaded {copied} bytes from {}:{remote_id}", session.identifier);
        Ok(())
    }

    async fn delete(&self, session: &AccountSession, remote_id: &str) -> ChainResult<()> {
        Self::check_session(session)?;
        let target = self.object_path(session, remote_id)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_to_remote("delete", &target, e)),
        }
    }

    async fn list(&self, session: &AccountSession, prefix: &str) -> ChainResult<Vec<RemoteObject>> {
        Self::check_session(session)?;
        let dir = self.backup_dir(session);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_to_remote("list", &dir, e)),
        };

        let mut objects = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_to_remote("list", &dir, e))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }
            let meta = entry
                .metadata()
                .await
                .map_err(|e| io_to_remote("stat", &entry.path(), e))?;
            if !meta.is_file() {
                continue;
            }
            let remote_id = format!("{REMOTE_BACKUP_DIR}{name}");
            if !remote_id.starts_with(prefix) {
                continue;
            }
            let modified_at = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            objects.push(RemoteObject {
                remote_id,
                size_bytes: meta.len(),
                modified_at,
            });
        }
        objects.sort_by(|a, b| a.remote_id.cmp(&b.remote_id));
        Ok(objects)
    }

    async fn quota(&self, session: &AccountSession) -> ChainResult<(u64, u64)> {
        let used = self.used_bytes(session).await?;
        Ok((used, self.quota_bytes))
    }
}
