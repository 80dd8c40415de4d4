//! Shared types for chain, ledger and transfer operations.

use crate::naming;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an account in the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// The single account receiving new uploads (always the last one).
    Active,
    /// A full account that has been rolled over. Read-only from here on.
    Exhausted,
    /// A proposed next account that has not been confirmed yet.
    Pending,
}

/// Last observed storage usage of an account.
///
/// Advisory only: refreshed after transfers, never re-checked at write time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub observed_at: DateTime<Utc>,
}

impl QuotaSnapshot {
    pub fn needs_rollover(&self) -> bool {
        crate::quota::needs_rollover(self.used_bytes, self.total_bytes)
    }
}

/// One storage account of the chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub index: u32,
    pub identifier: String,
    pub status: AccountStatus,
    #[serde(default)]
    pub quota: Option<QuotaSnapshot>,
}

impl Account {
    /// Directory name of this account under the local root.
    pub fn dir_name(&self) -> &str {
        naming::local_part(&self.identifier)
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

/// Persisted chain state: the ordered accounts plus the fixed naming parts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    pub base: String,
    pub domain: String,
    pub created_at: DateTime<Utc>,
    pub accounts: Vec<Account>,
}

impl ChainState {
    /// The last account, which is the active one in a well-formed chain.
    pub fn active(&self) -> Option<&Account> {
        self.accounts.last()
    }

    pub fn account(&self, index: u32) -> Option<&Account> {
        let pos = usize::try_from(index).ok()?.checked_sub(1)?;
        self.accounts.get(pos)
    }

    /// Checks the chain invariants: indices `1..=n` without gaps, exactly the
    /// last account active, identifiers consistent with base and domain.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.accounts.is_empty() {
            return Err("chain has no accounts".into());
        }
        let last = self.accounts.len();
        for (pos, account) in self.accounts.iter().enumerate() {
            let expected_index = pos as u32 + 1;
            if account.index != expected_index {
                return Err(format!(
                    "account at position {pos} has index {} (expected {expected_index})",
                    account.index
                ));
            }
            let expected_status = if pos + 1 == last {
                AccountStatus::Active
            } else {
                AccountStatus::Exhausted
            };
            if account.status != expected_status {
                return Err(format!(
                    "account {} is {:?} (expected {expected_status:?})",
                    account.index, account.status
                ));
            }
            naming::validate(&account.identifier, &self.base, account.index, &self.domain)
                .map_err(|e| format!("account {}: {e}", account.index))?;
        }
        Ok(())
    }
}

/// Opaque credential handle for one account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHandle {
    pub account: String,
    pub token: String,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenHandle {
    /// Returns true if the handle will expire within the given seconds.
    /// Handles without an expiry never expire.
    pub fn expires_within_secs(&self, secs: i64) -> bool {
        self.expires_at
            .is_some_and(|at| Utc::now() + chrono::Duration::seconds(secs) >= at)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }
}

/// An account identifier bound to a credential, passed to every remote call.
#[derive(Clone, Debug)]
pub struct AccountSession {
    pub identifier: String,
    pub token: TokenHandle,
}

/// One object listed under the remote backup folder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub remote_id: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}
