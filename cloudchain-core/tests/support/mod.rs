//! Shared helpers: an in-memory remote with failure injection and
//! throwaway pools rooted in temp directories.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use cloudchain_core::remote::REMOTE_BACKUP_DIR;
use cloudchain_core::*;
use cloudchain_crypto::KdfParams;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const BASE: &str = "mybackup";

pub fn ident(index: u32) -> String {
    naming::format_identifier(BASE, index, "gmail.com")
}

/// Argon2 parameters cheap enough for tests.
pub fn cheap_kdf() -> KdfParams {
    KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    }
}

struct Injected {
    remaining: u32,
    transient: bool,
}

/// Remote keeping objects in memory, per account.
pub struct MockRemote {
    objects: Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
    failures: Mutex<HashMap<String, Injected>>,
    total_bytes: u64,
    extra_used: AtomicU64,
    pub uploads: AtomicU32,
    pub downloads: AtomicU32,
}

impl MockRemote {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            total_bytes,
            extra_used: AtomicU64::new(0),
            uploads: AtomicU32::new(0),
            downloads: AtomicU32::new(0),
        }
    }

    /// Makes the next `times` operations on `name` fail.
    pub fn fail(&self, name: &str, times: u32, transient: bool) {
        self.failures.lock().unwrap().insert(
            name.to_string(),
            Injected {
                remaining: times,
                transient,
            },
        );
    }

    /// Usage reported on top of the stored objects.
    pub fn set_extra_used(&self, bytes: u64) {
        self.extra_used.store(bytes, Ordering::SeqCst);
    }

    pub fn object(&self, identifier: &str, remote_id: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(identifier)
            .and_then(|o| o.get(remote_id).cloned())
    }

    pub fn remove_object(&self, identifier: &str, remote_id: &str) {
        if let Some(objects) = self.objects.lock().unwrap().get_mut(identifier) {
            objects.remove(remote_id);
        }
    }

    fn injected(&self, name: &str) -> ChainResult<()> {
        let mut failures = self.failures.lock().unwrap();
        if let Some(f) = failures.get_mut(name) {
            if f.remaining > 0 {
                f.remaining -= 1;
                return Err(ChainError::Remote {
                    message: format!("injected failure for {name}"),
                    transient: f.transient,
                });
            }
        }
        Ok(())
    }
}

fn name_of(remote_id: &str) -> &str {
    remote_id.strip_prefix(REMOTE_BACKUP_DIR).unwrap_or(remote_id)
}

#[async_trait]
impl RemoteStorage for MockRemote {
    async fn upload(&self, session: &AccountSession, local_path: &Path) -> ChainResult<String> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let name = local_path.file_name().unwrap().to_str().unwrap().to_string();
        self.injected(&name)?;
        let data = std::fs::read(local_path)?;
        let remote_id = format!("{REMOTE_BACKUP_DIR}{name}");
        self.objects
            .lock()
            .unwrap()
            .entry(session.identifier.clone())
            .or_default()
            .insert(remote_id.clone(), data);
        Ok(remote_id)
    }

    async fn download(
        &self,
        session: &AccountSession,
        remote_id: &str,
        local_path: &Path,
    ) -> ChainResult<()> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.injected(name_of(remote_id))?;
        let data = self
            .object(&session.identifier, remote_id)
            .ok_or_else(|| ChainError::Remote {
                message: format!("{remote_id} not found"),
                transient: false,
            })?;
        std::fs::write(local_path, data)?;
        Ok(())
    }

    async fn delete(&self, session: &AccountSession, remote_id: &str) -> ChainResult<()> {
        self.injected(name_of(remote_id))?;
        self.remove_object(&session.identifier, remote_id);
        Ok(())
    }

    async fn list(&self, session: &AccountSession, prefix: &str) -> ChainResult<Vec<RemoteObject>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .get(&session.identifier)
            .map(|o| {
                o.iter()
                    .filter(|(id, _)| id.starts_with(prefix))
                    .map(|(id, data)| RemoteObject {
                        remote_id: id.clone(),
                        size_bytes: data.len() as u64,
                        modified_at: Utc::now(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn quota(&self, session: &AccountSession) -> ChainResult<(u64, u64)> {
        let stored: u64 = self
            .objects
            .lock()
            .unwrap()
            .get(&session.identifier)
            .map(|o| o.values().map(|d| d.len() as u64).sum())
            .unwrap_or(0);
        Ok((stored + self.extra_used.load(Ordering::SeqCst), self.total_bytes))
    }
}

/// A pool in a temp dir, connected to a shared mock remote.
pub struct TestPool {
    pub dir: TempDir,
    pub remote: Arc<MockRemote>,
    pub pool: BackupPool,
}

impl TestPool {
    pub fn root(&self) -> PathBuf {
        self.dir.path().join("root")
    }

    pub fn account_dir(&self, index: u32) -> PathBuf {
        self.root().join(naming::account_dir_name(BASE, index))
    }

    /// Writes a file outside the root, ready to be uploaded.
    pub fn source_file(&self, name: &str, data: &[u8]) -> PathBuf {
        let dir = self.dir.path().join("source");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    /// Writes a file straight into an account's mirror directory.
    pub fn mirror_file(&self, index: u32, name: &str, data: &[u8]) -> PathBuf {
        let path = self.account_dir(index).join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    pub fn presence(&self, index: u32, name: &str) -> Option<Presence> {
        self.pool
            .ledgers()
            .ledger(index)
            .unwrap()
            .get(name)
            .and_then(LedgerEntry::presence)
    }
}

pub fn open_pool(dir: TempDir, remote: Arc<MockRemote>) -> TestPool {
    let config = ChainConfig::with_root(dir.path().join("root"));
    let mut pool = BackupPool::open(config).unwrap();
    let provider = Arc::new(LocalTokenProvider::new(pool.root().clone()));
    pool.connect(remote.clone(), provider);
    TestPool { dir, remote, pool }
}

/// An initialized single-account pool with a remote of `total_bytes`.
pub fn initialized_pool(total_bytes: u64) -> TestPool {
    let mut tp = open_pool(
        tempfile::tempdir().unwrap(),
        Arc::new(MockRemote::new(total_bytes)),
    );
    tp.pool.initialize(BASE, &ident(1)).unwrap();
    tp
}
