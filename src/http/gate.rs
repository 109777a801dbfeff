//! Rate limiting middleware for the HTTP listener.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use tracing::{error, instrument, trace, warn};

use crate::ratelimit::{Classifier, Decision, RateLimiter};

/// Header carrying the client's API key.
pub const API_KEY_HEADER: &str = "api_key";

/// Body of every 429 response.
pub const RATE_LIMITED_MESSAGE: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// Body of every 500 response.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Source address used when the listener provides no connection info.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Shared references the gate needs for every request.
pub struct GateState {
    /// Maps a request to its key and quota
    pub classifier: Classifier,
    /// Makes the allow/deny decision
    pub limiter: Arc<RateLimiter>,
}

impl GateState {
    pub fn new(classifier: Classifier, limiter: Arc<RateLimiter>) -> Self {
        Self {
            classifier,
            limiter,
        }
    }
}

/// Wrap `downstream` so every request passes the rate limiter first.
pub fn gated(downstream: Router, state: Arc<GateState>) -> Router {
    downstream.layer(middleware::from_fn_with_state(state, rate_limit_gate))
}

/// The default downstream handler.
pub async fn accept_request() -> &'static str {
    "Request accepted"
}

/// Classify the request, ask the limiter, and either forward it or answer
/// 429 / 500 without calling the downstream handler.
#[instrument(
    skip_all,
    fields(method = %request.method(), path = %request.uri().path())
)]
pub async fn rate_limit_gate(
    State(state): State<Arc<GateState>>,
    request: Request,
    next: Next,
) -> Response {
    let source = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| UNKNOWN_SOURCE.to_string());
    // Header values may carry any non-control byte; the token is opaque.
    let token = request
        .headers()
        .get(API_KEY_HEADER)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());

    let classification = state.classifier.classify(&source, token.as_deref());
    let scope = classification.key.scope.tag();
    let key = classification.key.to_store_key();

    match state.limiter.decide(&key, classification.quota).await {
        Ok(Decision::Allowed) => {
            trace!(scope, "Request allowed");
            next.run(request).await
        }
        Ok(Decision::Limited) => {
            warn!(scope, quota = classification.quota, "Request rate limited");
            (StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_MESSAGE).into_response()
        }
        Err(e) => {
            error!(scope, error = %e, "Rate limit decision failed");
            (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE).into_response()
        }
    }
}
