//! API route modules.

pub mod health;
pub mod jobs;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/jobs", jobs::router())
        .nest("/api/health", health::router())
        .with_state(state)
}
