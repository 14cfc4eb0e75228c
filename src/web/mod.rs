// src/web/mod.rs
// HTTP surface for the gateway

pub mod api;
pub mod messages;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Create the public router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(api::health))
        .route("/metrics", get(api::metrics))
        .route(
            "/debug/session",
            get(api::debug_session).delete(api::delete_session),
        )
        .route("/v1/messages", post(messages::post_messages))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
