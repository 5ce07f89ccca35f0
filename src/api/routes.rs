use axum::extract::DefaultBodyLimit;
use axum::{Router, routing::{get, post}};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use crate::AppState;
use crate::api::handlers;

pub fn router(state: Arc<AppState>) -> Router {
    // Browsers call this from arbitrary origins.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/facematch/v1", get(handlers::index))
        .route("/api/facematch/v1/verify", post(handlers::verify))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(cors)
        .with_state(state)
}
