//! The proxy dispatcher. One call to [`Dispatcher::dispatch`] per inbound
//! request: resolve a provider, rank candidate accounts, try each in order
//! until one can be committed to, and tee usage accounting onto the
//! response without the client ever waiting on it.

use std::sync::Arc;

use broker_common::{RequestRecord, NO_ACCOUNT_ID};
use broker_provider_core::provider::{HttpMethod, UpstreamRequest, UpstreamResponseMeta};
use broker_provider_core::headers::Headers;
use broker_provider_core::ProviderRegistry;
use broker_storage::{AccountRepository, RequestRepository};
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::CoreConfig;
use crate::error_taxonomy::{classify_status, ErrorKind};
use crate::load_balancer::rank_candidates;
use crate::token_manager::{Credential, TokenError, TokenManager};
use crate::upstream_client::UpstreamClient;
use crate::usage_recorder::{compute_cost, total_tokens, SseUsageAccumulator};

pub struct DispatchRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Option<String>,
    pub headers: Headers,
    pub body: Bytes,
}

pub enum ResponseBody {
    Buffered(Bytes),
    Streaming(BoxStream<'static, Result<Bytes, std::io::Error>>),
}

pub struct DispatchResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: ResponseBody,
}

impl DispatchResponse {
    fn error(kind: ErrorKind, details: Option<serde_json::Value>) -> Self {
        let body = serde_json::to_vec(&kind.body(details)).unwrap_or_default();
        Self {
            status: kind.http_status().as_u16(),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: ResponseBody::Buffered(Bytes::from(body)),
        }
    }
}

pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    accounts: Arc<dyn AccountRepository>,
    requests: Arc<dyn RequestRepository>,
    token_manager: Arc<TokenManager>,
    upstream: Arc<UpstreamClient>,
    config: Arc<CoreConfig>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        accounts: Arc<dyn AccountRepository>,
        requests: Arc<dyn RequestRepository>,
        token_manager: Arc<TokenManager>,
        upstream: Arc<UpstreamClient>,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self { registry, accounts, requests, token_manager, upstream, config }
    }

    pub async fn dispatch(&self, request: DispatchRequest, now_ms: i64) -> DispatchResponse {
        let mut record = RequestRecord::new(now_ms, request.method.as_str(), request.path.clone());

        if self.registry.resolve_path(&request.path).is_none() {
            record.status_code = Some(404);
            record.error = Some("no_route".to_string());
            let _ = self.requests.insert(record).await;
            return DispatchResponse::error(ErrorKind::Validation, Some(serde_json::json!({ "path": request.path })));
        }

        let Ok(mut record) = self.requests.insert(record).await else {
            return DispatchResponse::error(ErrorKind::Fatal, None);
        };

        let all_accounts = match self.accounts.list().await {
            Ok(accounts) => accounts,
            Err(_) => return DispatchResponse::error(ErrorKind::Fatal, None),
        };
        let candidates = rank_candidates(&all_accounts, None, now_ms, self.config.session_window_ms);

        for account in candidates {
            let Some(adapter) = self.registry.get(&account.provider) else {
                continue;
            };

            let credential = match self
                .token_manager
                .access_token_for(&account, adapter.as_ref(), self.config.refresh_leeway_ms, now_ms)
                .await
            {
                Ok(credential) => credential,
                Err(TokenError::ReauthRequired) => continue,
                Err(_) => continue,
            };
            let (access_token, api_key) = match credential {
                Credential::AccessToken(token) => (Some(token), None),
                Credential::ApiKey(key) => (None, Some(key)),
            };

            let url = adapter.build_url(&request.path, request.query.as_deref(), &account);
            let headers = adapter.prepare_headers(&request.headers, access_token.as_deref(), api_key.as_deref());
            let body = adapter
                .transform_request_body(&request.body, &account)
                .ok()
                .flatten()
                .unwrap_or_else(|| request.body.clone());

            let upstream_request = UpstreamRequest { method: request.method, url, headers, body };
            let started = std::time::Instant::now();
            let response = match self.upstream.send(upstream_request).await {
                Ok(response) => response,
                Err(_) => continue,
            };

            let meta = UpstreamResponseMeta {
                status: response.status().as_u16(),
                headers: response
                    .headers()
                    .iter()
                    .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                    .collect(),
            };
            let meta = adapter.process_response(meta, &account);

            let rate_limit = adapter.parse_rate_limit(&meta, now_ms);
            if rate_limit.is_rate_limited {
                if let Some(reset_time) = rate_limit.reset_time {
                    let _ = self.accounts.mark_rate_limited(account.id, reset_time).await;
                }
                continue;
            }

            if let Some(kind) = classify_status(meta.status) {
                if kind.is_retryable() {
                    continue;
                }
            }

            // Commit: from here on this account's response is the one the
            // client sees, regardless of what happens downstream.
            let _ = self.accounts.touch_usage(account.id, now_ms, self.config.session_window_ms).await;
            record.account_id = account.id.to_string();
            record.status_code = Some(meta.status);

            if adapter.is_streaming_response(&meta) {
                return self.commit_streaming(record, response, meta, started, now_ms).await;
            }
            return self.commit_buffered(record, response, meta, started, adapter.as_ref()).await;
        }

        record.status_code = Some(ErrorKind::NoAccount.http_status().as_u16());
        record.error = Some("no_healthy_account".to_string());
        record.account_id = NO_ACCOUNT_ID.to_string();
        let _ = self.requests.finalize(record).await;
        DispatchResponse::error(ErrorKind::NoAccount, None)
    }

    async fn commit_buffered(
        &self,
        mut record: RequestRecord,
        response: reqwest::Response,
        meta: UpstreamResponseMeta,
        started: std::time::Instant,
        adapter: &dyn broker_provider_core::ProviderAdapter,
    ) -> DispatchResponse {
        let bytes = response.bytes().await.unwrap_or_default();
        record.response_time_ms = Some(started.elapsed().as_millis() as i64);

        if let Some(usage) = adapter.extract_usage_info(&bytes) {
            record.input_tokens = usage.input_tokens;
            record.output_tokens = usage.output_tokens;
            record.cache_read_input_tokens = usage.cache_read_input_tokens;
            record.cache_creation_input_tokens = usage.cache_creation_input_tokens;
            record.total_tokens = total_tokens(&usage);
            record.cost_usd = compute_cost(&usage, &self.config.pricing);
            record.model = usage.model;
        }
        let _ = self.requests.finalize(record).await;

        DispatchResponse { status: meta.status, headers: meta.headers, body: ResponseBody::Buffered(bytes) }
    }

    async fn commit_streaming(
        &self,
        mut record: RequestRecord,
        response: reqwest::Response,
        meta: UpstreamResponseMeta,
        started: std::time::Instant,
        _now_ms: i64,
    ) -> DispatchResponse {
        let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(32);
        let requests = Arc::clone(&self.requests);
        let pricing = self.config.pricing.clone();
        let idle_timeout = self.upstream.idle_timeout();

        tokio::spawn(async move {
            let mut upstream_stream = response.bytes_stream();
            let mut accumulator = SseUsageAccumulator::new();

            loop {
                let next = tokio::time::timeout(idle_timeout, upstream_stream.next()).await;
                let chunk = match next {
                    Ok(Some(Ok(chunk))) => chunk,
                    Ok(Some(Err(_))) => {
                        record.error = Some("transport_error".to_string());
                        break;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        record.error = Some("idle_timeout".to_string());
                        break;
                    }
                };
                accumulator.push(&chunk);
                if tx.send(Ok(chunk)).await.is_err() {
                    // Client disconnected; stop reading, which drops
                    // `upstream_stream` and cancels the upstream read.
                    record.error = Some("client_abort".to_string());
                    break;
                }
            }

            let usage = accumulator.finish();
            record.response_time_ms = Some(started.elapsed().as_millis() as i64);
            record.input_tokens = usage.input_tokens;
            record.output_tokens = usage.output_tokens;
            record.cache_read_input_tokens = usage.cache_read_input_tokens;
            record.cache_creation_input_tokens = usage.cache_creation_input_tokens;
            record.total_tokens = total_tokens(&usage);
            record.cost_usd = compute_cost(&usage, &pricing);
            record.model = usage.model;
            let _ = requests.finalize(record).await;
        });

        let body_stream = ReceiverStream::new(rx);
        DispatchResponse { status: meta.status, headers: meta.headers, body: ResponseBody::Streaming(Box::pin(body_stream)) }
    }
}
