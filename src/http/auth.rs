//! `X-API-Key` authorization for the `/api` routes.

use super::AppState;
use super::handlers::ApiError;
use crate::Error;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Digest of an API key. Keys are compared by digest so the comparison
/// time does not depend on how long a matching prefix is.
#[must_use]
pub fn key_digest(key: &str) -> [u8; 32] {
    Sha256::digest(key.as_bytes()).into()
}

/// Rejects requests whose `X-API-Key` does not match the configured key.
///
/// With no key configured every request is rejected.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    let authorized = match (state.api_key_digest, presented) {
        (Some(expected), Some(key)) => key_digest(key) == expected,
        _ => false,
    };

    if !authorized {
        tracing::warn!(
            path = %request.uri().path(),
            key_present = presented.is_some(),
            "Rejected request with invalid API key"
        );
        metrics::counter!("fingerlink_http_auth_failures_total").increment(1);
        return ApiError(Error::Unauthorized("invalid API key".to_string())).into_response();
    }

    next.run(request).await
}
