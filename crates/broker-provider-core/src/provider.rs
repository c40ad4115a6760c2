//! The provider registry & adapter contract.
//!
//! `ProviderAdapter` is the capability set a back-end implements: URL
//! building, header preparation, rate-limit parsing, and (for the Anthropic
//! OAuth adapter only) the OAuth wire mechanics. Shared behaviour lives as
//! default trait-method bodies, never as a base struct other adapters
//! inherit from — a provider is modeled as a capability set.

use async_trait::async_trait;
use broker_common::Account;
use serde_json::Value;

use crate::errors::ProviderResult;
use crate::headers::Headers;
use crate::pkce::Pkce;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// Static, per-provider-tag descriptor.
#[derive(Clone, Debug)]
pub struct ProviderDescriptor {
    pub name: &'static str,
    pub auth_kind: AuthKind,
    pub default_base_url: &'static str,
    pub supports_streaming: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthKind {
    Bearer,
    ApiKeyHeader,
    OAuthAnthropic,
}

/// Mode an Anthropic OAuth account was (or will be) authorized under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OAuthMode {
    Max,
    Console,
}

/// The upstream-facing request an adapter has finished building. The
/// dispatcher is the only caller that turns this into bytes on the wire;
/// adapters never perform I/O for ordinary request forwarding.
#[derive(Clone, Debug)]
pub struct UpstreamRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: bytes::Bytes,
}

/// The subset of an upstream response an adapter needs to classify it:
/// status and headers, never the body (which is streamed independently).
#[derive(Clone, Debug)]
pub struct UpstreamResponseMeta {
    pub status: u16,
    pub headers: Headers,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RateLimitInfo {
    pub is_rate_limited: bool,
    /// Epoch milliseconds.
    pub reset_time: Option<i64>,
    pub remaining: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UsageInfo {
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub cache_read_input_tokens: Option<i64>,
    pub cache_creation_input_tokens: Option<i64>,
    pub model: Option<String>,
}

/// Result of a successful OAuth code exchange or refresh.
#[derive(Clone, Debug)]
pub struct OAuthExchange {
    pub access_token: String,
    /// Absent when the provider does not hand out a refresh token (the
    /// dispatcher mints an API key in that case).
    pub refresh_token: Option<String>,
    /// Epoch milliseconds.
    pub expires_at: i64,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn descriptor(&self) -> &ProviderDescriptor;

    /// Does this adapter serve this path? The registry calls this in
    /// registration order and takes the first match.
    fn can_handle(&self, _path: &str) -> bool {
        true
    }

    /// Honours `account.custom_endpoint` if set, otherwise the adapter
    /// default; trailing slashes collapsed.
    fn build_url(&self, path: &str, query: Option<&str>, account: &Account) -> String {
        let base = account
            .custom_endpoint
            .as_deref()
            .unwrap_or(self.descriptor().default_base_url);
        let base = base.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        match query {
            Some(q) if !q.is_empty() => format!("{base}/{path}?{q}"),
            _ => format!("{base}/{path}"),
        }
    }

    /// Strips hop-by-hop headers, sets the account's credential into the
    /// appropriate header, passes `content-type`/`accept`/`anthropic-*`
    /// through, injects `anthropic-version` where required.
    fn prepare_headers(
        &self,
        incoming: &Headers,
        access_token: Option<&str>,
        api_key: Option<&str>,
    ) -> Headers {
        let mut headers = crate::headers::strip_inbound(incoming);
        match self.descriptor().auth_kind {
            AuthKind::Bearer | AuthKind::OAuthAnthropic => {
                if let Some(token) = access_token {
                    crate::headers::header_set(&mut headers, "authorization", format!("Bearer {token}"));
                }
            }
            AuthKind::ApiKeyHeader => {
                if let Some(key) = api_key {
                    crate::headers::header_set(&mut headers, "x-api-key", key);
                }
            }
        }
        if crate::headers::header_get(&headers, "anthropic-version").is_none() {
            crate::headers::header_set(&mut headers, "anthropic-version", "2023-06-01");
        }
        headers
    }

    /// Reads per-provider rate-limit headers; on a 429 with no reset,
    /// defaults to *now + 60s*.
    fn parse_rate_limit(&self, resp: &UpstreamResponseMeta, now_ms: i64) -> RateLimitInfo {
        if resp.status != 429 {
            return RateLimitInfo::default();
        }
        let reset_time = crate::headers::header_get(&resp.headers, "retry-after")
            .and_then(|v| v.parse::<i64>().ok())
            .map(|secs| now_ms + secs * 1000)
            .or_else(|| {
                crate::headers::header_get(&resp.headers, "anthropic-ratelimit-requests-reset")
                    .and_then(|v| v.parse::<i64>().ok())
            })
            .unwrap_or(now_ms + 60_000);
        RateLimitInfo {
            is_rate_limited: true,
            reset_time: Some(reset_time),
            remaining: crate::headers::header_get(&resp.headers, "anthropic-ratelimit-requests-remaining")
                .and_then(|v| v.parse::<i64>().ok()),
        }
    }

    /// Passes through unchanged by default; overridden to record
    /// provider-volunteered tier upgrades.
    fn process_response(&self, resp: UpstreamResponseMeta, _account: &Account) -> UpstreamResponseMeta {
        resp
    }

    /// Applies `account.model_mappings` to the JSON body when a mapping
    /// exists for the requested model; `Ok(None)` means "forward
    /// byte-identical."
    fn transform_request_body(&self, body: &[u8], account: &Account) -> ProviderResult<Option<bytes::Bytes>> {
        let Some(mappings) = account.model_mappings.as_ref().filter(|m| !m.is_empty()) else {
            return Ok(None);
        };
        let mut value: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };
        let Some(model) = value.get("model").and_then(Value::as_str) else {
            return Ok(None);
        };
        let Some(mapped) = mappings.get(model) else {
            return Ok(None);
        };
        value["model"] = Value::String(mapped.clone());
        let rewritten = serde_json::to_vec(&value)
            .map_err(|e| crate::errors::ProviderError::Other(e.to_string()))?;
        Ok(Some(bytes::Bytes::from(rewritten)))
    }

    /// Extracts the final aggregated usage from a single JSON body (the
    /// non-streaming path; the usage recorder handles the streaming
    /// accumulation of the same field shape separately). Every adapter in
    /// this registry speaks Anthropic-shaped usage fields, so the default
    /// implementation covers all of them.
    fn extract_usage_info(&self, body: &[u8]) -> Option<UsageInfo> {
        let value: Value = serde_json::from_slice(body).ok()?;
        let usage = value.get("usage")?;
        Some(UsageInfo {
            input_tokens: usage.get("input_tokens").and_then(Value::as_i64),
            output_tokens: usage.get("output_tokens").and_then(Value::as_i64),
            cache_read_input_tokens: usage.get("cache_read_input_tokens").and_then(Value::as_i64),
            cache_creation_input_tokens: usage
                .get("cache_creation_input_tokens")
                .and_then(Value::as_i64),
            model: value.get("model").and_then(Value::as_str).map(str::to_string),
        })
    }

    /// `content-type` starts with `text/event-stream`.
    fn is_streaming_response(&self, resp: &UpstreamResponseMeta) -> bool {
        crate::headers::header_get(&resp.headers, "content-type")
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false)
    }

    // ---- OAuth contract, meaningful only for the Anthropic OAuth adapter ----

    fn authorize_url(&self, _pkce: &Pkce, _state: &str, _mode: OAuthMode) -> ProviderResult<String> {
        Err(crate::errors::ProviderError::Unsupported(format!(
            "{} does not support interactive OAuth",
            self.name()
        )))
    }

    async fn exchange_code(&self, _code: &str, _verifier: &str, _mode: OAuthMode) -> ProviderResult<OAuthExchange> {
        Err(crate::errors::ProviderError::Unsupported(format!(
            "{} does not support interactive OAuth",
            self.name()
        )))
    }

    /// Console-mode API-key minting: a POST to the provider's console
    /// using a freshly-minted access token.
    async fn mint_api_key(&self, _access_token: &str) -> ProviderResult<String> {
        Err(crate::errors::ProviderError::Unsupported(format!(
            "{} does not support API key minting",
            self.name()
        )))
    }

    async fn refresh_token(&self, _refresh_token: &str) -> ProviderResult<OAuthExchange> {
        Err(crate::errors::ProviderError::Unsupported(format!(
            "{} does not support token refresh",
            self.name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_common::CredentialShape;

    struct DummyAdapter(ProviderDescriptor);

    #[async_trait]
    impl ProviderAdapter for DummyAdapter {
        fn name(&self) -> &str {
            "dummy"
        }
        fn descriptor(&self) -> &ProviderDescriptor {
            &self.0
        }
    }

    fn account(model_mappings: Option<std::collections::HashMap<String, String>>) -> Account {
        Account {
            id: broker_common::AccountId::new(),
            name: "acct".into(),
            provider: "dummy".into(),
            credential: CredentialShape::ApiKey { api_key: "k".into() },
            priority: 50,
            paused: false,
            tier: 1,
            custom_endpoint: None,
            model_mappings,
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

    fn adapter() -> DummyAdapter {
        DummyAdapter(ProviderDescriptor {
            name: "dummy",
            auth_kind: AuthKind::ApiKeyHeader,
            default_base_url: "https://api.example.com",
            supports_streaming: true,
        })
    }

    #[test]
    fn build_url_prefers_custom_endpoint() {
        let a = adapter();
        let mut acct = account(None);
        acct.custom_endpoint = Some("https://custom.example.com/".into());
        assert_eq!(
            a.build_url("/v1/messages", None, &acct),
            "https://custom.example.com/v1/messages"
        );
    }

    #[test]
    fn build_url_default_base_when_no_custom_endpoint() {
        let a = adapter();
        let acct = account(None);
        assert_eq!(
            a.build_url("v1/messages", Some("beta=1"), &acct),
            "https://api.example.com/v1/messages?beta=1"
        );
    }

    #[test]
    fn transform_request_body_rewrites_mapped_model_only() {
        let a = adapter();
        let mut mappings = std::collections::HashMap::new();
        mappings.insert("opus".to_string(), "X".to_string());
        let acct = account(Some(mappings));

        let body = br#"{"model":"opus","messages":[]}"#;
        let rewritten = a.transform_request_body(body, &acct).unwrap().unwrap();
        let value: Value = serde_json::from_slice(&rewritten).unwrap();
        assert_eq!(value["model"], "X");
        assert_eq!(value["messages"], serde_json::json!([]));

        let body_unmapped = br#"{"model":"haiku","messages":[]}"#;
        assert!(a.transform_request_body(body_unmapped, &acct).unwrap().is_none());
    }

    #[test]
    fn parse_rate_limit_defaults_to_sixty_seconds_without_retry_after() {
        let a = adapter();
        let resp = UpstreamResponseMeta { status: 429, headers: vec![] };
        let info = a.parse_rate_limit(&resp, 1_000);
        assert!(info.is_rate_limited);
        assert_eq!(info.reset_time, Some(61_000));
    }

    #[test]
    fn parse_rate_limit_honours_retry_after_header() {
        let a = adapter();
        let resp = UpstreamResponseMeta {
            status: 429,
            headers: vec![("retry-after".to_string(), "30".to_string())],
        };
        let info = a.parse_rate_limit(&resp, 1_000);
        assert_eq!(info.reset_time, Some(31_000));
    }

    #[test]
    fn is_streaming_response_checks_content_type_prefix() {
        let a = adapter();
        let resp = UpstreamResponseMeta {
            status: 200,
            headers: vec![("content-type".to_string(), "text/event-stream; charset=utf-8".to_string())],
        };
        assert!(a.is_streaming_response(&resp));
    }
}
