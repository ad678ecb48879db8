//! API request and response bodies.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{PipelineMode, ReportLayout};
use crate::jobs::{Job, JobStatus};

/// Polling URLs of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobUrls {
    pub status_url: String,
    pub html_url: String,
    pub logs_url: String,
}

impl JobUrls {
    pub fn for_job(job_id: &str) -> Self {
        let base = format!("/api/jobs/{job_id}");
        Self {
            html_url: format!("{base}/html"),
            logs_url: format!("{base}/logs"),
            status_url: base,
        }
    }
}

/// `202 Accepted` body of a submission.
#[derive(Debug, Clone, Serialize)]
pub struct JobCreateResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub queue_position: Option<usize>,
    #[serde(flatten)]
    pub urls: JobUrls,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub queue_position: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub mode: PipelineMode,
    pub report_layout: ReportLayout,
    pub return_code: Option<i32>,
    pub error: Option<String>,
    pub work_dir: PathBuf,
    pub html_path: PathBuf,
    pub log_path: PathBuf,
    pub artifact_dir: Option<PathBuf>,
    pub runtime_log_path: Option<PathBuf>,
    #[serde(flatten)]
    pub urls: JobUrls,
}

impl JobStatusResponse {
    pub fn new(job: Job, queue_position: Option<usize>) -> Self {
        Self {
            urls: JobUrls::for_job(&job.job_id),
            job_id: job.job_id,
            status: job.status,
            queue_position,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            mode: job.mode,
            report_layout: job.report_layout,
            return_code: job.return_code,
            error: job.error,
            work_dir: job.work_dir,
            html_path: job.html_path,
            log_path: job.log_path,
            artifact_dir: job.artifact_dir,
            runtime_log_path: job.runtime_log_path,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobListResponse {
    pub items: Vec<JobStatusResponse>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobLogsResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub tail: usize,
    pub log: String,
}

/// Query parameters of the logs endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct LogsQuery {
    /// Number of trailing lines, clamped to `1..=5000`.
    #[serde(default = "default_tail")]
    pub tail: usize,
}

fn default_tail() -> usize {
    200
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub running_job: Option<String>,
    pub queued_jobs: usize,
}
