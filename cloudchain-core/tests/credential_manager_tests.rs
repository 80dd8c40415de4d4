//! Credential lifecycle: cache hits, stored handles, refresh inside the
//! expiry margin, and the token.json provider.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use cloudchain_core::layout::LocalRoot;
use cloudchain_core::*;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

const ACCOUNT: &str = "mybackup001.cloudchain@gmail.com";
const MARGIN: i64 = 300;

fn handle(account: &str, token: &str, expires_in_secs: Option<i64>) -> TokenHandle {
    TokenHandle {
        account: account.to_string(),
        token: token.to_string(),
        issued_at: Utc::now(),
        expires_at: expires_in_secs.map(|s| Utc::now() + Duration::seconds(s)),
    }
}

/// Provider with one stored handle that counts every call. Authorizing
/// mints `token-<n>` valid for `ttl_secs`.
struct CountingProvider {
    stored: Mutex<Option<TokenHandle>>,
    ttl_secs: Option<i64>,
    lookups: AtomicU32,
    authorizations: AtomicU32,
}

impl CountingProvider {
    fn new(stored: Option<TokenHandle>, ttl_secs: Option<i64>) -> Arc<Self> {
        Arc::new(Self {
            stored: Mutex::new(stored),
            ttl_secs,
            lookups: AtomicU32::new(0),
            authorizations: AtomicU32::new(0),
        })
    }

    fn lookups(&self) -> u32 {
        self.lookups.load(Ordering::SeqCst)
    }

    fn authorizations(&self) -> u32 {
        self.authorizations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for CountingProvider {
    async fn get_active_credential(&self, identifier: &str) -> ChainResult<Option<TokenHandle>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .stored
            .lock()
            .unwrap()
            .clone()
            .filter(|h| h.account == identifier))
    }

    async fn authorize(&self, identifier: &str) -> ChainResult<TokenHandle> {
        let n = self.authorizations.fetch_add(1, Ordering::SeqCst) + 1;
        let minted = handle(identifier, &format!("token-{n}"), self.ttl_secs);
        *self.stored.lock().unwrap() = Some(minted.clone());
        Ok(minted)
    }
}

/// Provider that answers for the wrong account.
struct ConfusedProvider;

#[async_trait]
impl CredentialProvider for ConfusedProvider {
    async fn get_active_credential(&self, _identifier: &str) -> ChainResult<Option<TokenHandle>> {
        Ok(None)
    }

    async fn authorize(&self, _identifier: &str) -> ChainResult<TokenHandle> {
        Ok(handle("someoneelse001.cloudchain@gmail.com", "x", None))
    }
}

// ── Cache ──

#[tokio::test]
async fn first_use_authorizes_then_hits_cache() {
    let provider = CountingProvider::new(None, None);
    let manager = CredentialManager::new(provider.clone(), MARGIN);

    let first = manager.get_credentials(ACCOUNT).await.unwrap();
    let second = manager.get_credentials(ACCOUNT).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.token, "token-1");
    assert_eq!(provider.lookups(), 1);
    assert_eq!(provider.authorizations(), 1);
}

#[tokio::test]
async fn stored_handle_is_used_without_authorizing() {
    let stored = handle(ACCOUNT, "stored", Some(3600));
    let provider = CountingProvider::new(Some(stored.clone()), None);
    let manager = CredentialManager::new(provider.clone(), MARGIN);

    assert_eq!(manager.get_credentials(ACCOUNT).await.unwrap(), stored);
    assert_eq!(manager.get_credentials(ACCOUNT).await.unwrap(), stored);
    assert_eq!(provider.lookups(), 1);
    assert_eq!(provider.authorizations(), 0);
}

#[tokio::test]
async fn stored_handle_inside_margin_is_replaced() {
    let provider = CountingProvider::new(Some(handle(ACCOUNT, "stale", Some(MARGIN - 60))), None);
    let manager = CredentialManager::new(provider.clone(), MARGIN);

    let got = manager.get_credentials(ACCOUNT).await.unwrap();
    assert_eq!(got.token, "token-1");
    assert_eq!(provider.authorizations(), 1);
}

#[tokio::test]
async fn cached_handle_inside_margin_is_refreshed() {
    // Every minted handle already sits inside the margin.
    let provider = CountingProvider::new(None, Some(MARGIN / 2));
    let manager = CredentialManager::new(provider.clone(), MARGIN);

    assert_eq!(manager.get_credentials(ACCOUNT).await.unwrap().token, "token-1");
    assert_eq!(manager.get_credentials(ACCOUNT).await.unwrap().token, "token-2");
    assert_eq!(provider.authorizations(), 2);
}

#[tokio::test]
async fn handle_outside_margin_is_kept() {
    let provider = CountingProvider::new(None, Some(MARGIN + 3600));
    let manager = CredentialManager::new(provider.clone(), MARGIN);

    manager.get_credentials(ACCOUNT).await.unwrap();
    manager.get_credentials(ACCOUNT).await.unwrap();
    assert_eq!(provider.authorizations(), 1);
}

#[tokio::test]
async fn clear_forces_a_new_lookup() {
    let provider = CountingProvider::new(Some(handle(ACCOUNT, "stored", None)), None);
    let mut manager = CredentialManager::new(provider.clone(), MARGIN);

    manager.get_credentials(ACCOUNT).await.unwrap();
    manager.clear();
    manager.get_credentials(ACCOUNT).await.unwrap();

    assert_eq!(provider.lookups(), 2);
    assert_eq!(provider.authorizations(), 0);
}

#[tokio::test]
async fn handles_are_cached_per_account() {
    let provider = CountingProvider::new(None, None);
    let manager = CredentialManager::new(provider.clone(), MARGIN);

    let one = manager.get_credentials(ACCOUNT).await.unwrap();
    let two = manager
        .get_credentials("mybackup002.cloudchain@gmail.com")
        .await
        .unwrap();

    assert_eq!(one.account, ACCOUNT);
    assert_eq!(two.account, "mybackup002.cloudchain@gmail.com");
    assert_eq!(provider.authorizations(), 2);
}

// ── Refresh ──

#[tokio::test]
async fn refresh_rejects_handle_for_another_account() {
    let manager = CredentialManager::new(Arc::new(ConfusedProvider), MARGIN);
    let err = manager.get_credentials(ACCOUNT).await.unwrap_err();
    assert!(matches!(err, ChainError::Credential(_)));
}

#[tokio::test]
async fn session_binds_identifier_to_handle() {
    let provider = CountingProvider::new(None, None);
    let manager = CredentialManager::new(provider, MARGIN);

    let session = manager.session(ACCOUNT).await.unwrap();
    assert_eq!(session.identifier, ACCOUNT);
    assert_eq!(session.token.account, ACCOUNT);
}

// ── Token file provider ──

#[tokio::test]
async fn local_provider_persists_and_reuses_token() {
    let dir = tempfile::tempdir().unwrap();
    let root = LocalRoot::new(dir.path());
    let token_file = dir.path().join("mybackup001.cloudchain").join("token.json");

    let first = {
        let manager =
            CredentialManager::new(Arc::new(LocalTokenProvider::new(root.clone())), MARGIN);
        manager.get_credentials(ACCOUNT).await.unwrap()
    };
    assert!(token_file.is_file());
    assert_eq!(first.expires_at, None);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&token_file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    // A fresh manager finds the stored handle instead of minting one.
    let manager = CredentialManager::new(Arc::new(LocalTokenProvider::new(root)), MARGIN);
    assert_eq!(manager.get_credentials(ACCOUNT).await.unwrap(), first);
}

#[tokio::test]
async fn local_provider_ignores_token_of_other_account() {
    let dir = tempfile::tempdir().unwrap();
    let root = LocalRoot::new(dir.path());
    let account_dir = dir.path().join("mybackup001.cloudchain");
    std::fs::create_dir_all(&account_dir).unwrap();
    let foreign = handle("mybackup001.cloudchain@outlook.com", "foreign", None);
    std::fs::write(
        account_dir.join("token.json"),
        serde_json::to_vec(&foreign).unwrap(),
    )
    .unwrap();

    let provider = LocalTokenProvider::new(root);
    assert_eq!(provider.get_active_credential(ACCOUNT).await.unwrap(), None);
}

#[tokio::test]
async fn unreadable_token_file_is_a_credential_error() {
    let dir = tempfile::tempdir().unwrap();
    let account_dir = dir.path().join("mybackup001.cloudchain");
    std::fs::create_dir_all(&account_dir).unwrap();
    std::fs::write(account_dir.join("token.json"), b"not json").unwrap();

    let provider = LocalTokenProvider::new(LocalRoot::new(dir.path()));
    assert!(matches!(
        provider.get_active_credential(ACCOUNT).await,
        Err(ChainError::Credential(_))
    ));
}
