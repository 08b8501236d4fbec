//! Operator endpoints: live configuration, forced reload and event history.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use beacon_config::keys;
use beacon_storage::StatusChangeEvent;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_EVENT_LIMIT: usize = 50;
const MAX_EVENT_LIMIT: usize = 500;

/// Body of `PUT /config/{key}`.
#[derive(Debug, Deserialize)]
pub struct UpdateConfigRequest {
    pub value: String,
}

/// Query of `GET /sources/{id}/events`.
#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub source_id: String,
    pub events: Vec<StatusChangeEvent>,
}

/// Every setting, secrets masked.
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, String>> {
    Json(state.config.masked_snapshot().into_iter().collect())
}

/// Persist one setting. The restart follows from the change notification.
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(request): Json<UpdateConfigRequest>,
) -> Result<Json<Value>, ApiError> {
    ensure_known(&key)?;
    if request.value.trim().is_empty() {
        return Err(ApiError::BadRequest("Value cannot be empty".into()));
    }

    state.config.set(&key, &request.value, "api").await?;
    info!("Config updated via API: {}", key);

    Ok(Json(json!({
        "message": "Config updated successfully",
        "key": key,
        "restarting": true,
    })))
}

/// Drop a stored setting so its default applies again.
pub async fn delete_config(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    ensure_known(&key)?;
    state.config.delete(&key).await?;
    info!("Config deleted via API: {}", key);

    Ok(Json(json!({
        "message": "Config deleted",
        "key": key,
        "restarting": true,
    })))
}

/// Restart the notifying process now, bypassing any armed backoff timer.
pub async fn reload(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    info!("Manual reload requested via API");
    // Runs detached; progress is visible through /health.
    let _ = state.coordinator.force_reload();
    (
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Notifying process restart initiated" })),
    )
}

/// Recent status changes of one source, newest first.
pub async fn source_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    if state.repo.get_source(&id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Source not found: {}", id)));
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .clamp(1, MAX_EVENT_LIMIT);
    let events = state.repo.status_changes(&id, limit).await?;

    Ok(Json(EventsResponse {
        source_id: id,
        events,
    }))
}

fn ensure_known(key: &str) -> Result<(), ApiError> {
    if keys::ALL.contains(&key) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("Unknown config key: {}", key)))
    }
}
