//! Per-account ledger of backed-up payloads.
//!
//! Each entry tracks whether a payload exists remotely and whether its
//! mirror copy exists locally. `local_present` is a cache of filesystem
//! state: [`LedgerBook::heal`] re-derives it and is the only place that
//! does so.

use crate::error::{ChainError, ChainResult};
use crate::layout::{self, LocalRoot};
use crate::types::Account;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where a payload currently exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    CloudOnly,
    LocalOnly,
    Both,
}

/// One tracked payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub name: String,
    pub size_bytes: u64,
    /// Local origin at the time the entry was recorded.
    pub source_path: PathBuf,
    /// `None` until the payload has been uploaded once.
    pub uploaded_at: Option<DateTime<Utc>>,
    pub remote_id: Option<String>,
    pub remote_present: bool,
    pub local_present: bool,
    pub owning_account_index: u32,
}

impl LedgerEntry {
    pub fn presence(&self) -> Option<Presence> {
        classify(self)
    }
}

/// Classifies an entry from its two presence flags.
///
/// `None` means neither flag is set; such entries are pruned and never
/// persisted.
pub fn classify(entry: &LedgerEntry) -> Option<Presence> {
    match (entry.remote_present, entry.local_present) {
        (true, true) => Some(Presence::Both),
        (true, false) => Some(Presence::CloudOnly),
        (false, true) => Some(Presence::LocalOnly),
        (false, false) => None,
    }
}

/// The ledger of one account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    pub account_index: u32,
    entries: BTreeMap<String, LedgerEntry>,
}

impl Ledger {
    pub fn new(account_index: u32) -> Self {
        Self {
            account_index,
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&LedgerEntry> {
        self.entries.get(name)
    }

    /// Entries ordered by name.
    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.values()
    }

    /// Names of entries currently classified as `presence`.
    pub fn names_with(&self, presence: Presence) -> Vec<String> {
        self.entries
            .values()
            .filter(|e| classify(e) == Some(presence))
            .map(|e| e.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Every entry must be keyed by its own name, and that name must be a
    /// plain payload basename. Ledgers read from disk or from an export are
    /// untrusted until this passes.
    pub fn check_entries(&self) -> ChainResult<()> {
        for (key, entry) in &self.entries {
            if *key != entry.name {
                return Err(ChainError::CorruptState(format!(
                    "ledger {} keys entry {:?} as {key:?}",
                    self.account_index, entry.name
                )));
            }
            layout::validate_payload_name(key).map_err(|e| {
                ChainError::CorruptState(format!("ledger {}: {e}", self.account_index))
            })?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, name: &str) -> ChainResult<&mut LedgerEntry> {
        let account = self.account_index;
        self.entries
            .get_mut(name)
            .ok_or_else(|| ChainError::EntryNotFound {
                account,
                name: name.to_string(),
            })
    }

    /// Drops an entry if both flags are clear. Returns the remaining
    /// classification.
    fn settle(&mut self, name: &str) -> Option<Presence> {
        let presence = self.entries.get(name).and_then(classify);
        if presence.is_none() && self.entries.remove(name).is_some() {
            debug!("pruned {name} from ledger of account {}", self.account_index);
        }
        presence
    }
}

/// A local file in an account directory that no ledger entry covers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UntrackedFile {
    pub name: String,
    pub size_bytes: u64,
}

/// Outcome of a heal pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HealReport {
    pub account_index: u32,
    /// Entries whose `local_present` flag was corrected.
    pub changed: Vec<String>,
    /// Entries removed because they no longer exist anywhere.
    pub pruned: Vec<String>,
    /// Local files the ledger does not know about. Reported, never adopted.
    pub untracked: Vec<UntrackedFile>,
}

impl HealReport {
    /// True when the pass changed nothing.
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty() && self.pruned.is_empty()
    }
}

/// All ledgers of a chain, keyed by account index.
///
/// Every mutation is applied to a copy, persisted atomically, and only then
/// swapped in, so a failed write leaves both disk and memory unchanged.
pub struct LedgerBook {
    root: LocalRoot,
    dirs: BTreeMap<u32, String>,
    ledgers: BTreeMap<u32, Ledger>,
}

impl LedgerBook {
    pub fn new(root: LocalRoot) -> Self {
        Self {
            root,
            dirs: BTreeMap::new(),
            ledgers: BTreeMap::new(),
        }
    }

    /// Loads (or creates) the ledger of an account.
    pub fn attach(&mut self, account: &Account) -> ChainResult<()> {
        let dir = account.dir_name().to_string();
        let path = self.root.ledger_file(&dir);

        let ledger = match layout::read_json::<Ledger>(&path)? {
            Some(mut ledger) => {
                ledger.check_entries()?;
                if ledger.account_index != account.index {
                    warn!(
                        "ledger {} claims account {}, reassigning to {}",
                        path.display(),
                        ledger.account_index,
                        account.index
                    );
                    ledger.account_index = account.index;
                    for entry in ledger.entries.values_mut() {
                        entry.owning_account_index = account.index;
                    }
                }
                ledger
            }
            None => {
                let ledger = Ledger::new(account.index);
                layout::write_json(&path, &ledger)?;
                debug!("created empty ledger {}", path.display());
                ledger
            }
        };

        self.dirs.insert(account.index, dir);
        self.ledgers.insert(account.index, ledger);
        Ok(())
    }

    /// Forgets every ledger (after a reset). Does not touch the disk.
    pub fn clear(&mut self) {
        self.dirs.clear();
        self.ledgers.clear();
    }

    pub fn ledger(&self, account_index: u32) -> ChainResult<&Ledger> {
        self.ledgers
            .get(&account_index)
            .ok_or(ChainError::UnknownAccount(account_index))
    }

    pub fn ledgers(&self) -> impl Iterator<Item = &Ledger> {
        self.ledgers.values()
    }

    /// Expected local mirror path of a payload.
    pub fn mirror_path(&self, account_index: u32, name: &str) -> ChainResult<PathBuf> {
        Ok(self.root.mirror_path(self.dir(account_index)?, name))
    }

    /// Records a successful upload. Overwrites any previous entry.
    pub fn record_upload(
        &mut self,
        account_index: u32,
        name: &str,
        size_bytes: u64,
        source_path: &Path,
        remote_id: &str,
    ) -> ChainResult<LedgerEntry> {
        layout::validate_payload_name(name)?;
        let local_present = self.mirror_path(account_index, name)?.is_file();

        let entry = LedgerEntry {
            name: name.to_string(),
            size_bytes,
            source_path: source_path.to_path_buf(),
            uploaded_at: Some(Utc::now()),
            remote_id: Some(remote_id.to_string()),
            remote_present: true,
            local_present,
            owning_account_index: account_index,
        };

        let recorded = entry.clone();
        self.mutate(account_index, move |ledger| {
            ledger.entries.insert(entry.name.clone(), entry);
            Ok(())
        })?;
        info!("recorded upload of {name} ({size_bytes} bytes) to account {account_index}");
        Ok(recorded)
    }

    /// Records a successful download into the mirror. Remote presence is
    /// left as it was.
    pub fn record_download(&mut self, account_index: u32, name: &str) -> ChainResult<()> {
        self.mutate(account_index, |ledger| {
            ledger.entry_mut(name)?.local_present = true;
            Ok(())
        })
    }

    /// Records that the local mirror copy was removed.
    pub fn delete_local(&mut self, account_index: u32, name: &str) -> ChainResult<Option<Presence>> {
        self.mutate(account_index, |ledger| {
            ledger.entry_mut(name)?.local_present = false;
            Ok(ledger.settle(name))
        })
    }

    /// Records that the remote copy was removed. The entry is pruned if it no
    /// longer exists locally either.
    pub fn delete_cloud(&mut self, account_index: u32, name: &str) -> ChainResult<Option<Presence>> {
        self.mutate(account_index, |ledger| {
            ledger.entry_mut(name)?.remote_present = false;
            Ok(ledger.settle(name))
        })
    }

    /// Starts tracking an untracked mirror file as `LocalOnly`.
    pub fn adopt(&mut self, account_index: u32, name: &str) -> ChainResult<LedgerEntry> {
        layout::validate_payload_name(name)?;
        let path = self.mirror_path(account_index, name)?;
        if self.ledger(account_index)?.get(name).is_some() {
            return Err(ChainError::InvalidName(format!("{name} is already tracked")));
        }
        let meta = std::fs::metadata(&path)?;
        if !meta.is_file() {
            return Err(ChainError::InvalidName(format!("{name} is not a regular file")));
        }

        let entry = LedgerEntry {
            name: name.to_string(),
            size_bytes: meta.len(),
            source_path: path,
            uploaded_at: None,
            remote_id: None,
            remote_present: false,
            local_present: true,
            owning_account_index: account_index,
        };
        let adopted = entry.clone();
        self.mutate(account_index, move |ledger| {
            ledger.entries.insert(entry.name.clone(), entry);
            Ok(())
        })?;
        Ok(adopted)
    }

    /// Reconciles `local_present` with the filesystem for one account.
    ///
    /// Idempotent: with no filesystem change in between, a second pass
    /// reports no changes and writes nothing.
    pub fn heal(&mut self, account_index: u32) -> ChainResult<HealReport> {
        let dir = self.dir(account_index)?.to_string();
        let mut ledger = self.ledger(account_index)?.clone();
        let mut report = HealReport {
            account_index,
            ..HealReport::default()
        };

        for entry in ledger.entries.values_mut() {
            let present = self.root.mirror_path(&dir, &entry.name).is_file();
            if entry.local_present != present {
                entry.local_present = present;
                report.changed.push(entry.name.clone());
            }
        }
        let names: Vec<String> = ledger.entries.keys().cloned().collect();
        for name in names {
            if ledger.settle(&name).is_none() {
                report.pruned.push(name);
            }
        }

        let tracked: BTreeSet<&str> = ledger.entries.keys().map(String::as_str).collect();
        report.untracked = self
            .root
            .payload_files(&dir)?
            .into_iter()
            .filter(|(name, _)| !tracked.contains(name.as_str()))
            .map(|(name, size_bytes)| UntrackedFile { name, size_bytes })
            .collect();

        if !report.is_noop() {
            layout::write_json(&self.root.ledger_file(&dir), &ledger)?;
            self.ledgers.insert(account_index, ledger);
            info!(
                "healed account {account_index}: {} changed, {} pruned",
                report.changed.len(),
                report.pruned.len()
            );
        }
        if !report.untracked.is_empty() {
            warn!(
                "account {account_index} has {} untracked local file(s)",
                report.untracked.len()
            );
        }
        Ok(report)
    }

    fn dir(&self, account_index: u32) -> ChainResult<&str> {
        self.dirs
            .get(&account_index)
            .map(String::as_str)
            .ok_or(ChainError::UnknownAccount(account_index))
    }

    fn mutate<R>(
        &mut self,
        account_index: u32,
        f: impl FnOnce(&mut Ledger) -> ChainResult<R>,
    ) -> ChainResult<R> {
        let path = self.root.ledger_file(self.dir(account_index)?);
        let mut ledger = self.ledger(account_index)?.clone();
        let out = f(&mut ledger)?;
        layout::write_json(&path, &ledger)?;
        self.ledgers.insert(account_index, ledger);
        Ok(out)
    }
}
