//! Job submission and status routes.

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::Html,
    routing::get,
};
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{JobCreateResponse, JobListResponse, JobLogsResponse, JobStatusResponse, JobUrls, LogsQuery};
use crate::api::server::AppState;
use crate::jobs::{JobStatus, JobSubmission};

const MAX_LOG_TAIL: usize = 5000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs).post(create_job))
        .route("/{id}", get(get_job))
        .route("/{id}/html", get(get_job_html))
        .route("/{id}/logs", get(get_job_logs))
}

/// Queue a pipeline run. Responds `202 Accepted` immediately.
async fn create_job(
    State(state): State<AppState>,
    payload: Result<Json<JobSubmission>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<JobCreateResponse>)> {
    let Json(submission) = payload.map_err(|e| ApiError::InvalidSubmission(e.body_text()))?;
    let (job, queue_position) = state.jobs.submit(&submission).await?;
    info!(job_id = %job.job_id, ?queue_position, "Job accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(JobCreateResponse {
            urls: JobUrls::for_job(&job.job_id),
            job_id: job.job_id,
            status: job.status,
            queue_position,
        }),
    ))
}

async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<JobListResponse>> {
    let items: Vec<_> = state
        .jobs
        .list()
        .into_iter()
        .map(|job| {
            let position = state.jobs.queue_position(&job.job_id);
            JobStatusResponse::new(job, position)
        })
        .collect();
    Ok(Json(JobListResponse {
        total: items.len(),
        items,
    }))
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<JobStatusResponse>> {
    let job = state.jobs.get(&id).ok_or_else(|| ApiError::JobNotFound(id.clone()))?;
    let position = state.jobs.queue_position(&id);
    Ok(Json(JobStatusResponse::new(job, position)))
}

/// The rendered report, once the job has succeeded.
async fn get_job_html(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Html<String>> {
    let job = state.jobs.get(&id).ok_or_else(|| ApiError::JobNotFound(id.clone()))?;
    if job.status != JobStatus::Succeeded {
        return Err(ApiError::ReportNotReady { id, status: job.status });
    }
    match tokio::fs::read_to_string(&job.html_path).await {
        Ok(html) => Ok(Html(html)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ApiError::ReportMissing(id)),
        Err(e) => Err(crate::utils::fs::io_error("reading", &job.html_path, e).into()),
    }
}

async fn get_job_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<JobLogsResponse>> {
    let tail = query.tail.clamp(1, MAX_LOG_TAIL);
    let job = state.jobs.get(&id).ok_or_else(|| ApiError::JobNotFound(id.clone()))?;
    let log = state.jobs.log_tail(&id, tail).await?;
    Ok(Json(JobLogsResponse {
        job_id: job.job_id,
        status: job.status,
        tail,
        log,
    }))
}
