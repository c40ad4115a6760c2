//! Interactive OAuth orchestration (`begin`/`complete`). The pending PKCE
//! state lives only in this process's memory, keyed by a generated session
//! id that doubles as the `state` parameter: single-process, in-memory,
//! 10-minute TTL, pruned lazily on each `begin`.

use std::collections::HashMap;
use std::sync::Arc;

use broker_common::{Account, AccountId, CredentialShape, DEFAULT_TIER};
use broker_provider_core::provider::OAuthMode;
use broker_provider_core::{Pkce, ProviderAdapter, ProviderError};
use thiserror::Error;
use tokio::sync::RwLock;

const SESSION_TTL_MS: i64 = 10 * 60 * 1000;

#[derive(Debug, Error)]
pub enum OAuthFlowError {
    #[error("oauth session not found or expired")]
    SessionNotFound,
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

struct PendingSession {
    pkce: Pkce,
    mode: OAuthMode,
    account_name: String,
    created_at: i64,
}

/// A started-but-not-yet-completed OAuth authorization, handed back to the
/// caller so it can redirect the user.
pub struct AuthorizationStart {
    pub session_id: String,
    pub authorize_url: String,
}

pub struct OAuthFlow {
    sessions: RwLock<HashMap<String, PendingSession>>,
}

impl OAuthFlow {
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }

    /// Starts a new authorization. `account_name` is carried through to
    /// `complete` so the caller doesn't have to thread it separately.
    pub async fn begin(
        &self,
        adapter: &dyn ProviderAdapter,
        mode: OAuthMode,
        account_name: String,
        now_ms: i64,
    ) -> Result<AuthorizationStart, OAuthFlowError> {
        let pkce = Pkce::generate();
        let session_id = uuid::Uuid::new_v4().to_string();
        let authorize_url = adapter.authorize_url(&pkce, &session_id, mode)?;

        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, session| now_ms - session.created_at < SESSION_TTL_MS);
        sessions.insert(
            session_id.clone(),
            PendingSession { pkce, mode, account_name, created_at: now_ms },
        );

        Ok(AuthorizationStart { session_id, authorize_url })
    }

    /// Completes a pending authorization: exchanges the code, mints an API
    /// key when the provider handed back no refresh token (console mode),
    /// and returns a ready-to-insert [`Account`].
    pub async fn complete(
        &self,
        adapter: &dyn ProviderAdapter,
        session_id: &str,
        code: &str,
        now_ms: i64,
    ) -> Result<Account, OAuthFlowError> {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions.retain(|_, session| now_ms - session.created_at < SESSION_TTL_MS);
            sessions.remove(session_id).ok_or(OAuthFlowError::SessionNotFound)?
        };

        let exchange = adapter.exchange_code(code, &session.pkce.verifier, session.mode).await?;

        let credential = match (session.mode, exchange.refresh_token) {
            (OAuthMode::Console, _) | (_, None) => {
                let api_key = adapter.mint_api_key(&exchange.access_token).await?;
                CredentialShape::ApiKey { api_key }
            }
            (OAuthMode::Max, Some(refresh_token)) => CredentialShape::OAuth {
                refresh_token,
                access_token: exchange.access_token,
                expires_at: exchange.expires_at,
            },
        };

        Ok(Account {
            id: AccountId::new(),
            name: session.account_name,
            provider: adapter.name().to_string(),
            credential,
            priority: broker_common::DEFAULT_PRIORITY,
            paused: false,
            tier: DEFAULT_TIER,
            custom_endpoint: None,
            model_mappings: None,
            request_count: 0,
            total_requests: 0,
            session_request_count: 0,
            session_start: None,
            rate_limited_until: None,
            last_used_at: None,
            last_error: None,
            created_at: now_ms,
        })
    }
}

impl Default for OAuthFlow {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience alias used by the composition root, which holds the flow
/// behind an `Arc` shared with the router layer.
pub type SharedOAuthFlow = Arc<OAuthFlow>;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use broker_provider_core::provider::{AuthKind, OAuthExchange, ProviderDescriptor};
    use broker_provider_core::ProviderResult;

    struct FakeAdapter {
        descriptor: ProviderDescriptor,
        grants_refresh_token: bool,
    }

    #[async_trait]
    impl ProviderAdapter for FakeAdapter {
        fn name(&self) -> &str {
            "fake-oauth"
        }
        fn descriptor(&self) -> &ProviderDescriptor {
            &self.descriptor
        }
        fn authorize_url(&self, pkce: &Pkce, state: &str, _mode: OAuthMode) -> ProviderResult<String> {
            Ok(format!("https://example.com/authorize?challenge={}&state={state}", pkce.challenge))
        }
        async fn exchange_code(&self, _code: &str, _verifier: &str, _mode: OAuthMode) -> ProviderResult<OAuthExchange> {
            Ok(OAuthExchange {
                access_token: "access".to_string(),
                refresh_token: if self.grants_refresh_token { Some("refresh".to_string()) } else { None },
                expires_at: 1_000_000,
            })
        }
        async fn mint_api_key(&self, _access_token: &str) -> ProviderResult<String> {
            Ok("minted-key".to_string())
        }
    }

    fn adapter(grants_refresh_token: bool) -> FakeAdapter {
        FakeAdapter {
            descriptor: ProviderDescriptor {
                name: "fake-oauth",
                auth_kind: AuthKind::OAuthAnthropic,
                default_base_url: "",
                supports_streaming: true,
            },
            grants_refresh_token,
        }
    }

    #[tokio::test]
    async fn max_mode_round_trip_yields_oauth_credential() {
        let flow = OAuthFlow::new();
        let adapter = adapter(true);
        let start = flow.begin(&adapter, OAuthMode::Max, "acct".to_string(), 0).await.unwrap();
        let account = flow.complete(&adapter, &start.session_id, "code", 1_000).await.unwrap();
        assert!(matches!(account.credential, CredentialShape::OAuth { .. }));
        assert_eq!(account.name, "acct");
    }

    #[tokio::test]
    async fn console_mode_without_refresh_token_mints_an_api_key() {
        let flow = OAuthFlow::new();
        let adapter = adapter(false);
        let start = flow.begin(&adapter, OAuthMode::Console, "acct".to_string(), 0).await.unwrap();
        let account = flow.complete(&adapter, &start.session_id, "code", 1_000).await.unwrap();
        match account.credential {
            CredentialShape::ApiKey { api_key } => assert_eq!(api_key, "minted-key"),
            _ => panic!("expected api key credential"),
        }
    }

    #[tokio::test]
    async fn console_mode_with_refresh_token_still_mints_an_api_key() {
        let flow = OAuthFlow::new();
        let adapter = adapter(true);
        let start = flow.begin(&adapter, OAuthMode::Console, "acct".to_string(), 0).await.unwrap();
        let account = flow.complete(&adapter, &start.session_id, "code", 1_000).await.unwrap();
        match account.credential {
            CredentialShape::ApiKey { api_key } => assert_eq!(api_key, "minted-key"),
            _ => panic!("console mode must always mint an api key, even if a refresh token came back"),
        }
    }

    #[tokio::test]
    async fn completing_an_unknown_session_fails() {
        let flow = OAuthFlow::new();
        let adapter = adapter(true);
        let err = flow.complete(&adapter, "unknown", "code", 0).await.unwrap_err();
        assert!(matches!(err, OAuthFlowError::SessionNotFound));
    }

    #[tokio::test]
    async fn expired_session_cannot_be_completed() {
        let flow = OAuthFlow::new();
        let adapter = adapter(true);
        let start = flow.begin(&adapter, OAuthMode::Max, "acct".to_string(), 0).await.unwrap();
        let err = flow
            .complete(&adapter, &start.session_id, "code", SESSION_TTL_MS + 1)
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthFlowError::SessionNotFound));
    }
}
