//! Health check route.

use axum::{Json, Router, extract::State, routing::get};

use crate::api::error::ApiResult;
use crate::api::models::HealthResponse;
use crate::api::server::AppState;
use crate::jobs::JobStatus;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let queued_jobs = state
        .jobs
        .list()
        .iter()
        .filter(|job| job.status == JobStatus::Queued)
        .count();
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        running_job: state.jobs.running_job(),
        queued_jobs,
    }))
}
