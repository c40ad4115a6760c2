//! The Anthropic OAuth adapter (`max` and `console` modes): URL/header
//! building plus the token-exchange/refresh wire mechanics, trimmed to a
//! bare OAuth contract — no CLI-impersonation system prelude, no
//! 1M-context model juggling beyond the one header it implies.

use async_trait::async_trait;
use broker_provider_core::provider::{AuthKind, OAuthExchange, OAuthMode, ProviderDescriptor};
use broker_provider_core::{ProviderAdapter, ProviderError, ProviderResult};
use serde::Deserialize;

const DEFAULT_API_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_AUTHORIZE_BASE_URL: &str = "https://claude.ai";
const DEFAULT_CONSOLE_BASE_URL: &str = "https://platform.claude.com";
const OAUTH_SCOPE: &str = "user:profile user:inference";
const HEADER_BETA: &str = "anthropic-beta";
const OAUTH_BETA: &str = "oauth-2025-04-20";

pub struct AnthropicOAuthProvider {
    client: reqwest::Client,
    client_id: String,
    redirect_uri: String,
    descriptor: ProviderDescriptor,
}

impl AnthropicOAuthProvider {
    pub fn new(client_id: String, redirect_uri: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id,
            redirect_uri,
            descriptor: ProviderDescriptor {
                name: "anthropic-oauth",
                auth_kind: AuthKind::OAuthAnthropic,
                default_base_url: DEFAULT_API_BASE_URL,
                supports_streaming: true,
            },
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

#[derive(Deserialize)]
struct CreateApiKeyResponse {
    raw_key: String,
}

#[async_trait]
impl ProviderAdapter for AnthropicOAuthProvider {
    fn name(&self) -> &str {
        "anthropic-oauth"
    }

    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn can_handle(&self, _path: &str) -> bool {
        true
    }

    fn authorize_url(
        &self,
        pkce: &broker_provider_core::Pkce,
        state: &str,
        _mode: OAuthMode,
    ) -> ProviderResult<String> {
        let query = serde_urlencoded::to_string([
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", OAUTH_SCOPE),
            ("code_challenge", pkce.challenge.as_str()),
            ("code_challenge_method", "S256"),
            ("state", state),
        ])
        .map_err(|e| ProviderError::Other(e.to_string()))?;
        Ok(format!("{DEFAULT_AUTHORIZE_BASE_URL}/oauth/authorize?{query}"))
    }

    async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        _mode: OAuthMode,
    ) -> ProviderResult<OAuthExchange> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", verifier),
        ];
        let resp = self
            .client
            .post(format!("{DEFAULT_API_BASE_URL}/v1/oauth/token"))
            .form(&form)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ProviderError::OAuthExchange(format!(
                "token endpoint returned {}",
                resp.status()
            )));
        }
        let body: TokenResponse = resp.json().await?;
        Ok(to_exchange(body))
    }

    async fn refresh_token(&self, refresh_token: &str) -> ProviderResult<OAuthExchange> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];
        let resp = self
            .client
            .post(format!("{DEFAULT_API_BASE_URL}/v1/oauth/token"))
            .form(&form)
            .send()
            .await?;
        if resp.status().as_u16() == 400 {
            let body = resp.text().await.unwrap_or_default();
            if body.contains("invalid_grant") {
                return Err(ProviderError::OAuthExchange("invalid_grant".to_string()));
            }
            return Err(ProviderError::OAuthExchange(body));
        }
        if !resp.status().is_success() {
            return Err(ProviderError::OAuthExchange(format!(
                "refresh endpoint returned {}",
                resp.status()
            )));
        }
        let body: TokenResponse = resp.json().await?;
        Ok(to_exchange(body))
    }

    async fn mint_api_key(&self, access_token: &str) -> ProviderResult<String> {
        let resp = self
            .client
            .post(format!("{DEFAULT_CONSOLE_BASE_URL}/api/oauth/claude_cli/create_api_key"))
            .bearer_auth(access_token)
            .header(HEADER_BETA, OAUTH_BETA)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ProviderError::OAuthExchange(format!(
                "create_api_key returned {}",
                resp.status()
            )));
        }
        let body: CreateApiKeyResponse = resp.json().await?;
        Ok(body.raw_key)
    }
}

fn to_exchange(body: TokenResponse) -> OAuthExchange {
    let expires_at = now_ms() + body.expires_in * 1000;
    OAuthExchange {
        access_token: body.access_token,
        refresh_token: body.refresh_token,
        expires_at,
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_provider_core::Pkce;

    #[test]
    fn authorize_url_carries_pkce_challenge_and_state() {
        let provider = AnthropicOAuthProvider::new("client-123".into(), "https://example.com/cb".into());
        let pkce = Pkce::generate();
        let url = provider.authorize_url(&pkce, "state-abc", OAuthMode::Max).unwrap();
        assert!(url.starts_with("https://claude.ai/oauth/authorize?"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("state=state-abc"));
    }
}
