//! Account chain state machine.
//!
//! The chain is an ordered, gapless list of accounts. Only the last one is
//! `Active`; every transition that adds an account exhausts the previous
//! one. All transitions persist the chain file before returning and leave
//! memory untouched if that write fails.

use crate::error::{ChainError, ChainResult};
use crate::layout::{self, LocalRoot};
use crate::naming::{self, MAX_INDEX};
use crate::types::{Account, AccountStatus, ChainState, QuotaSnapshot};
use chrono::Utc;
use std::fs;
use std::io;
use tracing::{debug, info, warn};

/// Owns the chain state of one local root.
pub struct ChainManager {
    root: LocalRoot,
    domain: String,
    state: Option<ChainState>,
}

impl ChainManager {
    /// Loads the chain file under `root` if one exists.
    ///
    /// `domain` is used for a chain created later by [`initialize`]; an
    /// existing chain keeps the domain it was created with.
    ///
    /// [`initialize`]: ChainManager::initialize
    pub fn open(root: LocalRoot, domain: &str) -> ChainResult<Self> {
        let state = layout::read_json::<ChainState>(&root.chain_file())
            .map_err(|e| ChainError::CorruptState(e.to_string()))?;

        if let Some(ref s) = state {
            s.check_invariants().map_err(ChainError::CorruptState)?;
            if s.domain != domain {
                warn!(
                    "chain was created for domain {}, ignoring configured {domain}",
                    s.domain
                );
            }
            debug!("loaded chain {} with {} account(s)", s.base, s.accounts.len());
        }

        Ok(Self {
            root,
            domain: domain.to_string(),
            state,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> ChainResult<&ChainState> {
        self.state.as_ref().ok_or(ChainError::NotInitialized)
    }

    /// Committed accounts in index order. Empty before initialization.
    pub fn accounts(&self) -> &[Account] {
        self.state
            .as_ref()
            .map(|s| s.accounts.as_slice())
            .unwrap_or_default()
    }

    pub fn active(&self) -> ChainResult<&Account> {
        self.state()?.active().ok_or(ChainError::NotInitialized)
    }

    pub fn account(&self, index: u32) -> ChainResult<&Account> {
        self.state()?
            .account(index)
            .ok_or(ChainError::UnknownAccount(index))
    }

    /// Creates the chain with its first account, fixing `base` for good.
    pub fn initialize(&mut self, base: &str, first_identifier: &str) -> ChainResult<&Account> {
        if self.state.is_some() {
            return Err(ChainError::AlreadyInitialized);
        }
        naming::validate_base(base)?;
        naming::validate(first_identifier, base, 1, &self.domain)?;

        let state = ChainState {
            base: base.to_string(),
            domain: self.domain.clone(),
            created_at: Utc::now(),
            accounts: vec![Account {
                index: 1,
                identifier: first_identifier.to_string(),
                status: AccountStatus::Active,
                quota: None,
            }],
        };
        self.commit(state)?;
        info!("initialized chain {base} with {first_identifier}");
        self.active()
    }

    /// The account that must be created next. Does not change any state.
    pub fn propose_next(&self) -> ChainResult<Account> {
        let state = self.state()?;
        let next = state.accounts.len() as u32 + 1;
        if next > MAX_INDEX {
            return Err(ChainError::ChainFull(next));
        }
        Ok(Account {
            index: next,
            identifier: naming::format_identifier(&state.base, next, &state.domain),
            status: AccountStatus::Pending,
            quota: None,
        })
    }

    /// Appends the proposed account. Anything but the exact proposed
    /// identifier is a sequence violation; nothing is ever auto-corrected.
    pub fn confirm_add(&mut self, identifier: &str) -> ChainResult<&Account> {
        let proposed = self.propose_next()?;
        let state = self.state()?;
        naming::validate(identifier, &state.base, proposed.index, &state.domain)?;

        let mut next = state.clone();
        if let Some(current) = next.accounts.last_mut() {
            current.status = AccountStatus::Exhausted;
        }
        next.accounts.push(Account {
            status: AccountStatus::Active,
            ..proposed
        });
        self.commit(next)?;
        info!("chain advanced to account {identifier}");
        self.active()
    }

    /// Stores a quota observation for the active account.
    ///
    /// Exhausted accounts receive no further writes, so their snapshot stays
    /// frozen at rollover time.
    pub fn record_quota(&mut self, index: u32, used_bytes: u64, total_bytes: u64) -> ChainResult<()> {
        let account = self.account(index)?;
        if !account.is_active() {
            return Err(ChainError::AccountNotActive {
                index,
                active: self.active()?.index,
            });
        }

        let mut next = self.state()?.clone();
        let pos = index as usize - 1;
        next.accounts[pos].quota = Some(QuotaSnapshot {
            used_bytes,
            total_bytes,
            observed_at: Utc::now(),
        });
        self.commit(next)?;
        debug!("account {index} quota: {used_bytes} of {total_bytes} bytes");
        Ok(())
    }

    /// Whether the active account's latest snapshot crosses the rollover
    /// threshold. No snapshot yet means no rollover.
    pub fn rollover_required(&self) -> ChainResult<bool> {
        Ok(self
            .active()?
            .quota
            .as_ref()
            .is_some_and(QuotaSnapshot::needs_rollover))
    }

    /// Wipes the chain file and every account directory. Remote data is
    /// never touched. Irreversible; confirmation is the caller's job.
    pub fn reset(&mut self) -> ChainResult<()> {
        let Some(state) = self.state.as_ref() else {
            return Err(ChainError::NotInitialized);
        };

        // Directories first: an interrupted reset still has a chain file and
        // can simply be run again.
        for account in &state.accounts {
            self.root.remove_account_dir(account.dir_name())?;
        }
        match fs::remove_file(self.root.chain_file()) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        warn!("chain {} reset, local state wiped", state.base);
        self.state = None;
        Ok(())
    }

    fn commit(&mut self, next: ChainState) -> ChainResult<()> {
        layout::write_json(&self.root.chain_file(), &next)?;
        self.state = Some(next);
        Ok(())
    }
}
