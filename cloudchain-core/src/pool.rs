//! The backup pool: one local root, its chain and ledgers, and optionally a
//! remote to move data with.
//!
//! Opening a pool takes the root lock; it is released when the pool drops.
//! Every state-changing command of the CLI is one method here.

use crate::chain::ChainManager;
use crate::config::ChainConfig;
use crate::credential_manager::{CredentialManager, CredentialProvider};
use crate::error::{ChainError, ChainResult};
use crate::layout::{self, LocalRoot, RootLock};
use crate::ledger::{HealReport, Ledger, LedgerBook, LedgerEntry, Presence};
use crate::portability;
use crate::remote::RemoteStorage;
use crate::sync_engine::{SyncDirection, SyncEngine, SyncReport, UploadOutcome};
use crate::types::{Account, QuotaSnapshot};
use cloudchain_crypto::KdfParams;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Remote plus the credentials to reach it.
struct Transport {
    remote: Arc<dyn RemoteStorage>,
    credentials: CredentialManager,
}

pub struct BackupPool {
    config: ChainConfig,
    root: LocalRoot,
    chain: ChainManager,
    ledgers: LedgerBook,
    transport: Option<Transport>,
    // Last field: released after everything else is dropped.
    lock: RootLock,
}

impl BackupPool {
    /// Locks the root and loads the chain and every ledger.
    pub fn open(config: ChainConfig) -> ChainResult<Self> {
        config.validate()?;
        let root = LocalRoot::new(&config.root);
        let lock = RootLock::acquire(&root)?;
        let chain = ChainManager::open(root.clone(), &config.domain)?;
        let mut ledgers = LedgerBook::new(root.clone());
        for account in chain.accounts() {
            ledgers.attach(account)?;
        }
        Ok(Self {
            config,
            root,
            chain,
            ledgers,
            transport: None,
            lock,
        })
    }

    /// Attaches a remote and a credential source for transfer operations.
    pub fn connect(
        &mut self,
        remote: Arc<dyn RemoteStorage>,
        provider: Arc<dyn CredentialProvider>,
    ) {
        let credentials =
            CredentialManager::new(provider, self.config.credential_refresh_margin_secs);
        self.transport = Some(Transport {
            remote,
            credentials,
        });
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn root(&self) -> &LocalRoot {
        &self.root
    }

    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    pub fn chain(&self) -> &ChainManager {
        &self.chain
    }

    pub fn ledgers(&self) -> &LedgerBook {
        &self.ledgers
    }

    pub fn initialize(&mut self, base: &str, first_identifier: &str) -> ChainResult<Account> {
        let account = self.chain.initialize(base, first_identifier)?.clone();
        self.ledgers.attach(&account)?;
        Ok(account)
    }

    pub fn propose_next(&self) -> ChainResult<Account> {
        self.chain.propose_next()
    }

    /// Appends the next account. Unless `force` is set, the active account's
    /// last quota snapshot must call for rollover.
    pub fn add_account(&mut self, identifier: &str, force: bool) -> ChainResult<Account> {
        if !force && !self.chain.rollover_required()? {
            let (used, total) = self
                .chain
                .active()?
                .quota
                .map_or((0, 0), |q| (q.used_bytes, q.total_bytes));
            return Err(ChainError::RolloverNotRequired { used, total });
        }
        let account = self.chain.confirm_add(identifier)?.clone();
        self.ledgers.attach(&account)?;
        Ok(account)
    }

    /// Stores a quota observation made outside the pool.
    pub fn record_quota(&mut self, index: u32, used_bytes: u64, total_bytes: u64) -> ChainResult<()> {
        self.chain.record_quota(index, used_bytes, total_bytes)
    }

    pub async fn refresh_quota(&mut self) -> ChainResult<QuotaSnapshot> {
        self.engine()?.refresh_quota().await
    }

    pub async fn upload(&mut self, source: &Path) -> ChainResult<UploadOutcome> {
        self.engine()?.upload_file(source).await
    }

    pub async fn download(&mut self, account_index: u32, name: &str) -> ChainResult<PathBuf> {
        self.engine()?.download_file(account_index, name).await
    }

    /// Runs a batch sync for one account; defaults to the active account.
    pub async fn sync(
        &mut self,
        direction: SyncDirection,
        account_index: Option<u32>,
    ) -> ChainResult<SyncReport> {
        let index = match account_index {
            Some(index) => index,
            None => self.chain.active()?.index,
        };
        let mut engine = self.engine()?;
        match direction {
            SyncDirection::LocalToCloud => engine.sync_local_to_cloud(index).await,
            SyncDirection::CloudToLocal => engine.sync_cloud_to_local(index).await,
        }
    }

    /// Removes the mirror copy of a payload and records it.
    pub fn delete_local(&mut self, account_index: u32, name: &str) -> ChainResult<Option<Presence>> {
        layout::validate_payload_name(name)?;
        let mirror = self.ledgers.mirror_path(account_index, name)?;
        if self.ledgers.ledger(account_index)?.get(name).is_none() {
            return Err(ChainError::EntryNotFound {
                account: account_index,
                name: name.to_string(),
            });
        }
        match fs::remove_file(&mirror) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.ledgers.delete_local(account_index, name)
    }

    pub async fn delete_cloud(&mut self, account_index: u32, name: &str) -> ChainResult<Option<Presence>> {
        self.engine()?.delete_remote(account_index, name).await
    }

    pub fn heal(&mut self, account_index: u32) -> ChainResult<HealReport> {
        self.ledgers.heal(account_index)
    }

    pub fn heal_all(&mut self) -> ChainResult<Vec<HealReport>> {
        let indices: Vec<u32> = self.chain.accounts().iter().map(|a| a.index).collect();
        indices.into_iter().map(|i| self.ledgers.heal(i)).collect()
    }

    /// Heals, then returns the tracked entries of one account or of all of
    /// them in chain order. Local presence is never taken from disk as is.
    pub fn list_entries(&mut self, account_index: Option<u32>) -> ChainResult<Vec<LedgerEntry>> {
        let indices = match account_index {
            Some(index) => vec![self.chain.account(index)?.index],
            None => self.chain.accounts().iter().map(|a| a.index).collect(),
        };
        let mut entries = Vec::new();
        for index in indices {
            self.ledgers.heal(index)?;
            entries.extend(self.ledgers.ledger(index)?.entries().cloned());
        }
        Ok(entries)
    }

    pub fn adopt(&mut self, account_index: u32, name: &str) -> ChainResult<LedgerEntry> {
        self.chain.account(account_index)?;
        self.ledgers.adopt(account_index, name)
    }

    /// Encrypts chain, ledgers and credential files into an export blob.
    pub fn export_state(&self, passphrase: &str) -> ChainResult<Vec<u8>> {
        self.export_state_with(passphrase, &KdfParams::default())
    }

    pub fn export_state_with(&self, passphrase: &str, params: &KdfParams) -> ChainResult<Vec<u8>> {
        let state = self.chain.state()?;
        let ledgers: Vec<Ledger> = self.ledgers.ledgers().cloned().collect();

        let mut credentials = BTreeMap::new();
        for account in &state.accounts {
            match fs::read(self.root.token_file(account.dir_name())) {
                Ok(bytes) => {
                    credentials.insert(account.dir_name().to_string(), bytes);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        portability::export_with_params(state, &ledgers, &credentials, passphrase, params)
    }

    /// Writes an export blob to `path`, readable by the owner only.
    pub fn export_to(&self, path: &Path, passphrase: &str) -> ChainResult<()> {
        let blob = self.export_state(passphrase)?;
        layout::write_secret(path, &blob)?;
        info!("wrote export to {}", path.display());
        Ok(())
    }

    /// Restores an export into this (uninitialized) root.
    ///
    /// The blob is decrypted and validated in memory first; a wrong
    /// passphrase changes nothing on disk. Ledgers and credentials are
    /// written next and the chain file last. If any write fails, everything
    /// written so far is removed again.
    pub fn restore_state(&mut self, blob: &[u8], passphrase: &str) -> ChainResult<Vec<HealReport>> {
        if self.chain.is_initialized() {
            return Err(ChainError::AlreadyInitialized);
        }
        let bundle = portability::restore(blob, passphrase)?;

        let mut written = Written::default();
        if let Err(e) = self.write_bundle(&bundle, &mut written) {
            warn!("restore failed, rolling back: {e}");
            written.roll_back();
            return Err(e);
        }

        self.chain = ChainManager::open(self.root.clone(), &self.config.domain)?;
        self.ledgers.clear();
        for account in self.chain.accounts() {
            self.ledgers.attach(account)?;
        }
        self.forget_credentials();
        info!(
            "restored chain {} with {} account(s)",
            bundle.chain.base,
            bundle.chain.accounts.len()
        );
        self.heal_all()
    }

    /// Reads an export file and restores it.
    pub fn restore_from(&mut self, path: &Path, passphrase: &str) -> ChainResult<Vec<HealReport>> {
        let blob = fs::read(path)?;
        self.restore_state(&blob, passphrase)
    }

    /// Wipes the chain file and every account directory. Remote data is not
    /// touched.
    pub fn reset(&mut self) -> ChainResult<()> {
        self.chain.reset()?;
        self.ledgers.clear();
        self.forget_credentials();
        Ok(())
    }

    /// Drops cached credential handles; the on-disk ones changed.
    fn forget_credentials(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            transport.credentials.clear();
        }
    }

    fn write_bundle(
        &self,
        bundle: &portability::StateBundle,
        written: &mut Written,
    ) -> ChainResult<()> {
        let chain_file = self.root.chain_file();
        if chain_file.exists() {
            return Err(ChainError::AlreadyInitialized);
        }

        // Nothing is overwritten, so a rollback only ever removes our own files.
        for account in &bundle.chain.accounts {
            let mut targets = vec![self.root.ledger_file(account.dir_name())];
            if bundle.credentials.contains_key(account.dir_name()) {
                targets.push(self.root.token_file(account.dir_name()));
            }
            if let Some(existing) = targets.iter().find(|p| p.exists()) {
                return Err(ChainError::CorruptState(format!(
                    "{} exists without a chain file; move it away before restoring",
                    existing.display()
                )));
            }
        }

        for account in &bundle.chain.accounts {
            let dir = self.root.account_dir(account.dir_name());
            if !dir.exists() {
                fs::create_dir_all(&dir)?;
                written.dirs.push(dir);
            }

            let ledger = bundle
                .ledgers
                .iter()
                .find(|l| l.account_index == account.index)
                .cloned()
                .unwrap_or_else(|| Ledger::new(account.index));
            let ledger_file = self.root.ledger_file(account.dir_name());
            layout::write_json(&ledger_file, &ledger)?;
            written.files.push(ledger_file);

            if let Some(token) = bundle.credentials.get(account.dir_name()) {
                let token_file = self.root.token_file(account.dir_name());
                layout::write_secret(&token_file, token)?;
                written.files.push(token_file);
            }
        }

        layout::write_json(&chain_file, &bundle.chain)?;
        Ok(())
    }

    fn engine(&mut self) -> ChainResult<SyncEngine<'_>> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| ChainError::Config("no remote configured".into()))?;
        Ok(SyncEngine::new(
            &mut self.chain,
            &mut self.ledgers,
            transport.remote.as_ref(),
            &transport.credentials,
            self.config.transfer_attempts,
        ))
    }
}

/// Paths created during a restore, removed again if it fails.
#[derive(Default)]
struct Written {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl Written {
    fn roll_back(self) {
        for file in self.files.iter().rev() {
            if let Err(e) = fs::remove_file(file) {
                warn!("could not remove {}: {e}", file.display());
            }
        }
        for dir in self.dirs.iter().rev() {
            if let Err(e) = fs::remove_dir_all(dir) {
                warn!("could not remove {}: {e}", dir.display());
            }
        }
    }
}
