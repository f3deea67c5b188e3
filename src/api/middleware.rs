//! Request middleware: request ids, then authentication and rate limiting.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::error::ApiError;
use super::state::AppState;
use crate::dispatch::RateLimitDecision;
use crate::types::{Error, RequestId};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");
pub const X_TENANT_ID: HeaderName = HeaderName::from_static("x-tenant-id");
pub const IDEMPOTENCY_KEY: HeaderName = HeaderName::from_static("idempotency-key");
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Principal for callers without an API key.
pub const ANONYMOUS: &str = "anonymous";

const MAX_REQUEST_ID_LEN: usize = 128;

/// Non-empty, trimmed header value.
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Echo the caller's `X-Request-Id` or mint one; expose it to handlers as an
/// extension and on the response.
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let id = header_str(request.headers(), &X_REQUEST_ID)
        .filter(|v| v.len() <= MAX_REQUEST_ID_LEN)
        .and_then(|v| RequestId::from_string(v.to_string()).ok())
        .unwrap_or_default();
    request.extensions_mut().insert(id.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}

/// Authenticate the caller, then charge one token from its bucket.
pub async fn admission(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .cloned()
        .unwrap_or_default();

    let api_key = header_str(request.headers(), &X_API_KEY).map(str::to_string);
    let keys = &state.config.auth.api_keys;
    if !keys.is_empty() && !api_key.as_ref().is_some_and(|k| keys.contains(k)) {
        tracing::debug!(request_id = %request_id, "api_key_rejected");
        return ApiError::new(Error::unauthorized("missing or invalid API key"), &request_id)
            .into_response();
    }

    let principal = api_key.as_deref().unwrap_or(ANONYMOUS);
    let decision = state.limiter.check(principal, None);
    let mut response = match decision.into_result() {
        Ok(_) => next.run(request).await,
        Err(e) => ApiError::new(e, &request_id).into_response(),
    };
    rate_limit_headers(response.headers_mut(), &decision);
    response
}

fn rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
}
