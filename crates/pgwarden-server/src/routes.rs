// ABOUTME: Route definitions for the pgwarden webhook listener.
// ABOUTME: Assembles the liveness and webhook routes into one Axum Router with request tracing.

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::api;
use crate::app_state::SharedState;

/// Anything that is not a webhook call answers like the liveness probe.
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/api", get(alive))
        .route(
            "/api/webhooks/backup-new",
            post(api::webhooks::backup_new).fallback(alive),
        )
        .route(
            "/api/webhooks/dump-new",
            post(api::webhooks::dump_new).fallback(alive),
        )
        .fallback(alive)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn alive() -> StatusCode {
    StatusCode::NO_CONTENT
}
