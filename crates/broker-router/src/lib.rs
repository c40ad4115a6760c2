//! The HTTP front door. A single catch-all route: no per-protocol routes,
//! no aggregate endpoints, no admin UI — everything funnels into the
//! dispatcher, which already knows how to resolve a provider from the path.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use broker_core::dispatcher::{DispatchRequest, DispatchResponse, ResponseBody};
use broker_core::Dispatcher;
use broker_provider_core::provider::HttpMethod;
use bytes::Bytes;

#[derive(Clone)]
pub struct RouterState {
    pub dispatcher: Arc<Dispatcher>,
}

pub fn build_router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/{*path}", any(handle))
        .with_state(RouterState { dispatcher })
}

async fn handle(
    State(state): State<RouterState>,
    method: Method,
    uri: axum::http::Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(method) = convert_method(&method) else {
        return (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed").into_response();
    };

    let trace_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(trace_id, path = uri.path(), "dispatching request");

    let mut forwarded_headers = strip_client_auth(&headers);
    forwarded_headers.push(("x-broker-trace-id".to_string(), trace_id));

    let request = DispatchRequest {
        method,
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers: forwarded_headers,
        body,
    };

    let now_ms = now_ms();
    let response = state.dispatcher.dispatch(request, now_ms).await;
    to_axum_response(response)
}

fn convert_method(method: &Method) -> Option<HttpMethod> {
    match method.as_str() {
        "GET" => Some(HttpMethod::Get),
        "POST" => Some(HttpMethod::Post),
        "PUT" => Some(HttpMethod::Put),
        "PATCH" => Some(HttpMethod::Patch),
        "DELETE" => Some(HttpMethod::Delete),
        _ => None,
    }
}

/// Only the client's own `Authorization`/`x-api-key` are stripped; every
/// other header is forwarded byte-transparent.
fn strip_client_auth(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| {
            !matches!(name.as_str().to_ascii_lowercase().as_str(), "authorization" | "x-api-key" | "host" | "content-length")
        })
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect()
}

fn to_axum_response(response: DispatchResponse) -> Response {
    let mut builder = Response::builder().status(response.status);
    if let Some(map) = builder.headers_mut() {
        for (name, value) in &response.headers {
            if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("transfer-encoding") {
                continue;
            }
            if let (Ok(name), Ok(value)) =
                (axum::http::HeaderName::from_bytes(name.as_bytes()), axum::http::HeaderValue::from_str(value))
            {
                map.append(name, value);
            }
        }
    }

    let body = match response.body {
        ResponseBody::Buffered(bytes) => Body::from(bytes),
        ResponseBody::Streaming(stream) => Body::from_stream(stream),
    };

    builder.body(body).unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response())
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
