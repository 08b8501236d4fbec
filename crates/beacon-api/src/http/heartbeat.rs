//! Inbound heartbeat endpoint for passive sources.
//!
//! Monitored services call `/webhooks/incoming/{token}` to report that they
//! are alive. The endpoint is public; the token identifies the source, and
//! optional header and body expectations guard against stray callers.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
};
use beacon_storage::{CheckOutcome, MonitoredSource};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Record a heartbeat for the source owning `token`.
pub async fn incoming_heartbeat(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let source = state
        .repo
        .find_source_by_token(&token)
        .await?
        .ok_or_else(|| ApiError::NotFound("Webhook not found".into()))?;

    if !source.enabled {
        debug!("Heartbeat for paused source {} ignored", source.name);
        return Ok(Json(json!({ "status": "ok", "note": "Source is paused" })));
    }

    validate_heartbeat(&source, &headers, &body)?;

    let now = Utc::now();
    state.repo.record_heartbeat(&source.id, now).await?;

    match state.supervisor().monitor() {
        Some(monitor) => {
            let outcome = monitor.record_heartbeat_received(&source.id, now);
            if matches!(outcome, Some(CheckOutcome::Transition(_))) {
                info!("Heartbeat brought {} back online", source.name);
            }
        }
        None => debug!("Notifying process down, heartbeat for {} only persisted", source.name),
    }

    Ok(Json(json!({ "status": "ok" })))
}

/// Check the request against the source's header and body expectations.
pub fn validate_heartbeat(
    source: &MonitoredSource,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), ApiError> {
    for (name, expected) in &source.expected_headers {
        let actual = headers.get(name.as_str()).and_then(|v| v.to_str().ok());
        if actual != Some(expected.as_str()) {
            warn!("Heartbeat for {}: header {} mismatch", source.name, name);
            return Err(ApiError::Unauthorized("Header validation failed".into()));
        }
    }

    if let Some(expected) = source.expected_content.as_deref().filter(|c| !c.is_empty()) {
        if body.is_empty() {
            return Err(ApiError::BadRequest("Expected content in body".into()));
        }
        if !String::from_utf8_lossy(body).contains(expected) {
            warn!("Heartbeat for {}: body content mismatch", source.name);
            return Err(ApiError::Unauthorized("Content validation failed".into()));
        }
    }

    Ok(())
}
