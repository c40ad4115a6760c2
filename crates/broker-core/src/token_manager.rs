//! Token refresh. Holds no account state of its own; every call reads a
//! fresh snapshot through [`AccountRepository`] and writes the refreshed
//! pair back through it. The per-account `Mutex` only coordinates *when* a
//! refresh happens, not what the refreshed value is — concurrent callers
//! for the same account must observe a single refresh.

use std::collections::HashMap;
use std::sync::Arc;

use broker_common::{Account, AccountId, CredentialShape};
use broker_provider_core::ProviderAdapter;
use broker_storage::{AccountRepository, StorageError};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("provider refresh failed: {0}")]
    Provider(#[from] broker_provider_core::ProviderError),
    /// Terminal: the refresh token itself was rejected (`invalid_grant`).
    /// The caller must treat this account as unavailable, not retry it.
    #[error("account requires re-authentication")]
    ReauthRequired,
}

pub type TokenResult<T> = Result<T, TokenError>;

/// The credential the dispatcher hands to [`ProviderAdapter::prepare_headers`].
#[derive(Clone, Debug)]
pub enum Credential {
    ApiKey(String),
    AccessToken(String),
}

pub struct TokenManager {
    accounts: Arc<dyn AccountRepository>,
    refresh_locks: RwLock<HashMap<AccountId, Arc<Mutex<()>>>>,
}

impl TokenManager {
    pub fn new(accounts: Arc<dyn AccountRepository>) -> Self {
        Self {
            accounts,
            refresh_locks: RwLock::new(HashMap::new()),
        }
    }

    /// Returns a credential usable right now, refreshing first if the
    /// account's OAuth token is within `refresh_leeway_ms` of expiry.
    /// `account` is a caller-held snapshot; on a live refresh the returned
    /// credential reflects the refreshed value, not the stale snapshot.
    pub async fn access_token_for(
        &self,
        account: &Account,
        adapter: &dyn ProviderAdapter,
        refresh_leeway_ms: i64,
        now_ms: i64,
    ) -> TokenResult<Credential> {
        match &account.credential {
            CredentialShape::ApiKey { api_key } => Ok(Credential::ApiKey(api_key.clone())),
            CredentialShape::OAuth {
                refresh_token,
                access_token,
                expires_at,
            } => {
                if now_ms + refresh_leeway_ms < *expires_at {
                    return Ok(Credential::AccessToken(access_token.clone()));
                }
                self.refresh(account.id, refresh_token, adapter, now_ms).await
            }
        }
    }

    /// Single-flight refresh: the first caller for an account performs the
    /// network round-trip; every other concurrent caller waits on the same
    /// lock, then re-reads storage instead of refreshing again.
    async fn refresh(
        &self,
        account_id: AccountId,
        stale_refresh_token: &str,
        adapter: &dyn ProviderAdapter,
        now_ms: i64,
    ) -> TokenResult<Credential> {
        let lock = self.lock_for(account_id).await;
        let _guard = lock.lock().await;

        // Double-checked read: another waiter may have already refreshed
        // this account while we queued for the lock.
        let current = self
            .accounts
            .get_by_id(account_id)
            .await?
            .ok_or(TokenError::ReauthRequired)?;
        if let CredentialShape::OAuth {
            refresh_token,
            access_token,
            expires_at,
        } = &current.credential
        {
            if refresh_token != stale_refresh_token || now_ms < *expires_at {
                return Ok(Credential::AccessToken(access_token.clone()));
            }
        }

        match adapter.refresh_token(stale_refresh_token).await {
            Ok(exchange) => {
                self.accounts
                    .update_tokens(
                        account_id,
                        exchange.access_token.clone(),
                        exchange.refresh_token,
                        exchange.expires_at,
                    )
                    .await?;
                Ok(Credential::AccessToken(exchange.access_token))
            }
            Err(broker_provider_core::ProviderError::OAuthExchange(msg)) if msg == "invalid_grant" => {
                self.accounts.mark_reauth_required(account_id).await?;
                Err(TokenError::ReauthRequired)
            }
            Err(e) => Err(TokenError::Provider(e)),
        }
    }

    async fn lock_for(&self, account_id: AccountId) -> Arc<Mutex<()>> {
        if let Some(lock) = self.refresh_locks.read().await.get(&account_id) {
            return lock.clone();
        }
        let mut locks = self.refresh_locks.write().await;
        locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use broker_provider_core::provider::{AuthKind, OAuthExchange, ProviderDescriptor};
    use broker_storage::StorageResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FakeRepo {
        account: StdMutex<Account>,
        refresh_calls: AtomicUsize,
    }

    #[async_trait]
    impl AccountRepository for FakeRepo {
        async fn list(&self) -> StorageResult<Vec<Account>> {
            Ok(vec![self.account.lock().unwrap().clone()])
        }
        async fn get_by_id(&self, _id: AccountId) -> StorageResult<Option<Account>> {
            Ok(Some(self.account.lock().unwrap().clone()))
        }
        async fn get_by_name(&self, _name: &str) -> StorageResult<Option<Account>> {
            unimplemented!()
        }
        async fn insert(&self, account: Account) -> StorageResult<Account> {
            Ok(account)
        }
        async fn remove(&self, _id: AccountId) -> StorageResult<()> {
            Ok(())
        }
        async fn mark_rate_limited(&self, _id: AccountId, _until_ms: i64) -> StorageResult<()> {
            Ok(())
        }
        async fn clear_rate_limit(&self, _id: AccountId) -> StorageResult<()> {
            Ok(())
        }
        async fn pause(&self, _id: AccountId) -> StorageResult<()> {
            Ok(())
        }
        async fn resume(&self, _id: AccountId) -> StorageResult<()> {
            Ok(())
        }
        async fn set_priority(&self, _id: AccountId, _priority: i32) -> StorageResult<()> {
            Ok(())
        }
        async fn touch_usage(&self, _id: AccountId, _now_ms: i64, _session_window_ms: i64) -> StorageResult<()> {
            Ok(())
        }
        async fn update_tokens(
            &self,
            _id: AccountId,
            access_token: String,
            refresh_token: Option<String>,
            expires_at: i64,
        ) -> StorageResult<()> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            let mut account = self.account.lock().unwrap();
            account.credential = CredentialShape::OAuth {
                refresh_token: refresh_token.unwrap_or_else(|| "rt".to_string()),
                access_token,
                expires_at,
            };
            Ok(())
        }
        async fn mark_reauth_required(&self, _id: AccountId) -> StorageResult<()> {
            Ok(())
        }
        async fn reset_stats(&self) -> StorageResult<()> {
            Ok(())
        }
    }

    struct FakeAdapter {
        descriptor: ProviderDescriptor,
        calls: AtomicUsize,
        reject: bool,
    }

    #[async_trait]
    impl ProviderAdapter for FakeAdapter {
        fn name(&self) -> &str {
            "fake"
        }
        fn descriptor(&self) -> &ProviderDescriptor {
            &self.descriptor
        }
        async fn refresh_token(
            &self,
            _refresh_token: &str,
        ) -> broker_provider_core::ProviderResult<OAuthExchange> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                return Err(broker_provider_core::ProviderError::OAuthExchange("invalid_grant".to_string()));
            }
            Ok(OAuthExchange {
                access_token: "new-token".to_string(),
                refresh_token: Some("rt".to_string()),
                expires_at: 10_000_000,
            })
        }
    }

    fn oauth_account(expires_at: i64) -> Account {
        Account {
            id: AccountId::new(),
            name: "acct".into(),
            provider: "fake".into(),
            credential: CredentialShape::OAuth {
                refresh_token: "rt".into(),
                access_token: "old-token".into(),
                expires_at,
            },
            priority: 50,
            paused: false,
            tier: 1,
            custom_endpoint: None,
            model_mappings: None,
            request_count: 0,
            total_requests: 0,
            session_request_count: 0,
            session_start: None,
            rate_limited_until: None,
            last_used_at: None,
            last_error: None,
            created_at: 0,
        }
    }

    fn adapter(reject: bool) -> FakeAdapter {
        FakeAdapter {
            descriptor: ProviderDescriptor {
                name: "fake",
                auth_kind: AuthKind::OAuthAnthropic,
                default_base_url: "",
                supports_streaming: true,
            },
            calls: AtomicUsize::new(0),
            reject,
        }
    }

    #[tokio::test]
    async fn returns_current_access_token_when_not_near_expiry() {
        let repo = Arc::new(FakeRepo {
            account: StdMutex::new(oauth_account(1_000_000)),
            refresh_calls: AtomicUsize::new(0),
        });
        let manager = TokenManager::new(repo);
        let account = oauth_account(1_000_000);
        let adapter = adapter(false);

        let cred = manager.access_token_for(&account, &adapter, 60_000, 0).await.unwrap();
        match cred {
            Credential::AccessToken(token) => assert_eq!(token, "old-token"),
            _ => panic!("expected access token"),
        }
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refreshes_when_within_leeway_of_expiry() {
        let repo = Arc::new(FakeRepo {
            account: StdMutex::new(oauth_account(1_000)),
            refresh_calls: AtomicUsize::new(0),
        });
        let manager = TokenManager::new(repo.clone());
        let account = oauth_account(1_000);
        let adapter = adapter(false);

        let cred = manager.access_token_for(&account, &adapter, 60_000, 0).await.unwrap();
        match cred {
            Credential::AccessToken(token) => assert_eq!(token, "new-token"),
            _ => panic!("expected refreshed token"),
        }
        assert_eq!(repo.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_grant_marks_reauth_required() {
        let repo = Arc::new(FakeRepo {
            account: StdMutex::new(oauth_account(1_000)),
            refresh_calls: AtomicUsize::new(0),
        });
        let manager = TokenManager::new(repo);
        let account = oauth_account(1_000);
        let adapter = adapter(true);

        let err = manager.access_token_for(&account, &adapter, 60_000, 0).await.unwrap_err();
        assert!(matches!(err, TokenError::ReauthRequired));
    }

    #[tokio::test]
    async fn api_key_credential_never_refreshes() {
        let repo = Arc::new(FakeRepo {
            account: StdMutex::new(oauth_account(1_000)),
            refresh_calls: AtomicUsize::new(0),
        });
        let manager = TokenManager::new(repo);
        let account = Account {
            credential: CredentialShape::ApiKey { api_key: "sk-abc".into() },
            ..oauth_account(1_000)
        };
        let adapter = adapter(false);

        let cred = manager.access_token_for(&account, &adapter, 60_000, 0).await.unwrap();
        match cred {
            Credential::ApiKey(key) => assert_eq!(key, "sk-abc"),
            _ => panic!("expected api key"),
        }
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }
}
