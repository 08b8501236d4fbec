//! Admin API key check.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the admin key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Reject requests without the configured `X-API-Key`.
///
/// When no key is configured every request passes.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.api_key() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if provided.is_empty() {
        warn!(
            "Missing API key on {} {}",
            request.method(),
            request.uri().path()
        );
        return Err(ApiError::Unauthorized("Missing X-API-Key header".into()));
    }
    if provided != expected {
        warn!(
            "Invalid API key attempt on {} {}",
            request.method(),
            request.uri().path()
        );
        return Err(ApiError::Unauthorized("Invalid API key".into()));
    }

    Ok(next.run(request).await)
}
