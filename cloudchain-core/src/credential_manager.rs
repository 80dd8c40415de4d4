//! Per-account credential lifecycle with cached handles and auto-refresh.
//!
//! Each account in the chain holds its own credential. The manager keeps
//! the handles it has seen in memory and goes back to the provider when a
//! handle is missing or about to expire.

use crate::error::{ChainError, ChainResult};
use crate::layout::{self, LocalRoot};
use crate::naming;
use crate::types::{AccountSession, TokenHandle};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Source of account credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns the stored credential for an account, if any.
    async fn get_active_credential(&self, identifier: &str) -> ChainResult<Option<TokenHandle>>;

    /// Obtains a fresh credential (first use, or the stored one went stale).
    async fn authorize(&self, identifier: &str) -> ChainResult<TokenHandle>;
}

/// Manages account credentials with auto-refresh.
pub struct CredentialManager {
    provider: Arc<dyn CredentialProvider>,
    cache: RwLock<HashMap<String, TokenHandle>>,
    refresh_margin_secs: i64,
}

impl CredentialManager {
    pub fn new(provider: Arc<dyn CredentialProvider>, refresh_margin_secs: i64) -> Self {
        Self {
            provider,
            cache: RwLock::new(HashMap::new()),
            refresh_margin_secs,
        }
    }

    /// Gets a valid credential for `identifier`, refreshing if needed.
    pub async fn get_credentials(&self, identifier: &str) -> ChainResult<TokenHandle> {
        {
            let cache = self.cache.read().await;
            if let Some(handle) = cache.get(identifier) {
                if !handle.expires_within_secs(self.refresh_margin_secs) {
                    return Ok(handle.clone());
                }
                debug!(
                    "credential for {identifier} expiring within {}s, refreshing",
                    self.refresh_margin_secs
                );
            }
        }

        if let Some(stored) = self.provider.get_active_credential(identifier).await? {
            if !stored.expires_within_secs(self.refresh_margin_secs) {
                self.cache
                    .write()
                    .await
                    .insert(identifier.to_string(), stored.clone());
                return Ok(stored);
            }
        }

        self.refresh(identifier).await
    }

    /// Forces a new authorization for `identifier`.
    pub async fn refresh(&self, identifier: &str) -> ChainResult<TokenHandle> {
        let handle = self.provider.authorize(identifier).await.map_err(|e| {
            warn!("authorization for {identifier} failed: {e}");
            e
        })?;
        if handle.account != identifier {
            return Err(ChainError::Credential(format!(
                "provider returned a credential for {} when asked for {identifier}",
                handle.account
            )));
        }

        self.cache
            .write()
            .await
            .insert(identifier.to_string(), handle.clone());
        Ok(handle)
    }

    /// Binds `identifier` to a valid credential for remote calls.
    pub async fn session(&self, identifier: &str) -> ChainResult<AccountSession> {
        Ok(AccountSession {
            identifier: identifier.to_string(),
            token: self.get_credentials(identifier).await?,
        })
    }

    /// Drops every cached handle (after a reset or restore).
    pub fn clear(&mut self) {
        self.cache.get_mut().clear();
    }
}

/// Provider that keeps each account's handle in `token.json` inside its
/// account directory. Authorizing mints a random non-expiring token.
pub struct LocalTokenProvider {
    root: LocalRoot,
}

impl LocalTokenProvider {
    pub fn new(root: LocalRoot) -> Self {
        Self { root }
    }
}

#[async_trait]
impl CredentialProvider for LocalTokenProvider {
    async fn get_active_credential(&self, identifier: &str) -> ChainResult<Option<TokenHandle>> {
        let path = self.root.token_file(naming::local_part(identifier));
        let handle = layout::read_json::<TokenHandle>(&path)
            .map_err(|e| ChainError::Credential(format!("{}: {e}", path.display())))?;
        Ok(handle.filter(|h| h.account == identifier))
    }

    async fn authorize(&self, identifier: &str) -> ChainResult<TokenHandle> {
        let handle = TokenHandle {
            account: identifier.to_string(),
            token: uuid::Uuid::new_v4().to_string(),
            issued_at: Utc::now(),
            expires_at: None,
        };
        let path = self.root.token_file(naming::local_part(identifier));
        layout::write_secret(&path, &serde_json::to_vec_pretty(&handle)?)?;
        info!("authorized {identifier}");
        Ok(handle)
    }
}
