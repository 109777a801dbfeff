//! Admin endpoints: store health and per-key inspection.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use crate::ratelimit::{KeyState, RateLimitKey};
use crate::store::StoreError;

use super::gate::GateState;

/// Build the admin router.
///
/// - `GET /health`: pings the counter store
/// - `GET /admin/keys/{key}`: current state of a key
/// - `DELETE /admin/keys/{key}`: lift a block / drop a counter
pub fn admin_router(state: Arc<GateState>) -> Router {
    Router::new()
        .route("/health", get(health))
        // Catch-all so tokens containing '/' stay addressable.
        .route("/admin/keys/{*key}", get(inspect_key).delete(reset_key))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct KeyReport {
    key: String,
    quota: i64,
    #[serde(flatten)]
    state: KeyState,
}

async fn health(State(state): State<Arc<GateState>>) -> Response {
    match state.limiter.store().ping().await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(e) => {
            error!(error = %e, "Counter store health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn inspect_key(State(state): State<Arc<GateState>>, Path(raw): Path<String>) -> Response {
    let key = match raw.parse::<RateLimitKey>() {
        Ok(key) => key,
        Err(e) => return bad_key(e),
    };
    let quota = state.classifier.quota_for(key.scope);

    match state.limiter.inspect(&key.to_store_key(), quota).await {
        Ok(key_state) => Json(KeyReport {
            key: key.to_store_key(),
            quota,
            state: key_state,
        })
        .into_response(),
        Err(e) => store_failure(e),
    }
}

async fn reset_key(State(state): State<Arc<GateState>>, Path(raw): Path<String>) -> Response {
    let key = match raw.parse::<RateLimitKey>() {
        Ok(key) => key,
        Err(e) => return bad_key(e),
    };

    match state.limiter.reset(&key.to_store_key()).await {
        Ok(true) => {
            info!(scope = key.scope.tag(), "Rate limit key reset via admin API");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => store_failure(e),
    }
}

fn bad_key(e: impl std::fmt::Display) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
}

fn store_failure(e: StoreError) -> Response {
    error!(error = %e, "Admin request failed on counter store");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
        .into_response()
}
