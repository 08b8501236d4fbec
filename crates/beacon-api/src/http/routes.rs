//! HTTP route definitions.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post, put},
};

use crate::http::{admin, auth, heartbeat, monitoring};
use crate::state::AppState;

/// Build the router.
///
/// ## Route Structure
///
/// ```text
/// Public
///   GET|POST /webhooks/incoming/{token} - Inbound heartbeat
///   GET      /health                    - Notifying process health
///   GET      /health/live               - Liveness probe
///
/// Admin (X-API-Key when API_KEY is set)
///   GET      /config                    - Masked settings
///   PUT      /config/{key}              - Update a setting
///   DELETE   /config/{key}              - Reset a setting to its default
///   POST     /admin/reload              - Restart the notifying process
///   GET      /sources/{id}/events       - Status change history
/// ```
pub fn create_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route(
            "/webhooks/incoming/{token}",
            get(heartbeat::incoming_heartbeat).post(heartbeat::incoming_heartbeat),
        )
        .route("/health", get(monitoring::health))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route("/config", get(admin::get_config))
        .route(
            "/config/{key}",
            put(admin::update_config).delete(admin::delete_config),
        )
        .route("/admin/reload", post(admin::reload))
        .route("/sources/{id}/events", get(admin::source_events))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .with_state(state);

    // Liveness probe has no state dependency
    let liveness_route = Router::new().route("/health/live", get(monitoring::liveness_probe));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .merge(liveness_route)
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
