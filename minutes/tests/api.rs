//! HTTP surface of the job API, driven through the router without a socket.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tokio::process::Command;
use tower::ServiceExt;

use minutes::api::{ApiServer, ApiServerConfig, AppState};
use minutes::jobs::{Job, JobQueueConfig, JobQueueManager, PipelineLauncher};

/// Writes a fixed report, like a pipeline run that succeeded.
struct WritesReport;

impl PipelineLauncher for WritesReport {
    fn command(&self, job: &Job) -> minutes::Result<Command> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("echo rendering; echo '<html><h1>Meeting Report</h1></html>' > \"$REPORT\"")
            .env("REPORT", &job.html_path);
        Ok(cmd)
    }
}

fn app(root: &std::path::Path) -> (Router, Arc<JobQueueManager>) {
    let jobs = Arc::new(JobQueueManager::new(
        JobQueueConfig {
            jobs_root: root.to_path_buf(),
            poll_interval: Duration::from_millis(20),
            ..JobQueueConfig::default()
        },
        Arc::new(WritesReport),
    ));
    let server = ApiServer::new(ApiServerConfig::default(), AppState::new(jobs.clone()));
    (server.build_router(), jobs)
}

fn submission() -> Value {
    json!({
        "MEETING_INFO": "Quarterly review",
        "AGENDA_TEXT": "1. Revenue",
        "segments": [{"speaker": "A", "start": 0, "end": 3, "text": "Revenue grew"}]
    })
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::get(uri).body(Body::empty()).unwrap();
    let (status, body) = send(router, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_json(router: &Router, body: String) -> (StatusCode, Value) {
    let request = Request::post("/api/jobs")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();
    let (status, body) = send(router, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_reports_queue() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _jobs) = app(dir.path());

    let (status, body) = get_json(&router, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["queued_jobs"], 0);
    assert!(body["running_job"].is_null());
}

#[tokio::test]
async fn test_submit_returns_accepted_with_urls() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _jobs) = app(dir.path());

    let (status, body) = post_json(&router, submission().to_string()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();
    assert!(job_id.starts_with("job_"));
    assert_eq!(body["status"], "queued");
    assert_eq!(body["queue_position"], 1);
    assert_eq!(body["status_url"], format!("/api/jobs/{job_id}"));
    assert_eq!(body["html_url"], format!("/api/jobs/{job_id}/html"));
    assert_eq!(body["logs_url"], format!("/api/jobs/{job_id}/logs"));

    let (status, body) = get_json(&router, &format!("/api/jobs/{job_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "agenda");
    assert_eq!(body["report_layout"], "official");

    let (_, body) = get_json(&router, "/api/jobs").await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["job_id"], job_id.as_str());

    let (_, body) = get_json(&router, "/api/health").await;
    assert_eq!(body["queued_jobs"], 1);
}

#[tokio::test]
async fn test_invalid_submissions_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _jobs) = app(dir.path());

    let mut body = submission();
    body.as_object_mut().unwrap().remove("MEETING_INFO");
    let (status, error) = post_json(&router, body.to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "INVALID_SUBMISSION");
    assert!(error["message"].as_str().unwrap().contains("MEETING_INFO"));

    let (status, _) = post_json(&router, json!({"MEETING_INFO": "x", "segments": []}).to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, error) = post_json(&router, "{not json".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "INVALID_SUBMISSION");
}

#[tokio::test]
async fn test_unknown_and_unfinished_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _jobs) = app(dir.path());

    let (status, error) = get_json(&router, "/api/jobs/job_missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], "JOB_NOT_FOUND");
    let (status, _) = get_json(&router, "/api/jobs/job_missing/logs").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, created) = post_json(&router, submission().to_string()).await;
    let html_url = created["html_url"].as_str().unwrap();
    let (status, error) = get_json(&router, html_url).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["code"], "REPORT_NOT_READY");
    assert!(error["message"].as_str().unwrap().contains("queued"));

    let (status, logs) = get_json(&router, created["logs_url"].as_str().unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs["tail"], 200);
    assert_eq!(logs["log"], "");
}

#[cfg(unix)]
#[tokio::test]
async fn test_finished_job_serves_report_and_logs() {
    let dir = tempfile::tempdir().unwrap();
    let (router, jobs) = app(dir.path());
    jobs.start().await.unwrap();

    let (_, created) = post_json(&router, submission().to_string()).await;
    let job_id = created["job_id"].as_str().unwrap();
    let job = jobs.wait_for_terminal(job_id, Duration::from_secs(5)).await.unwrap();
    assert_eq!(job.status, minutes::jobs::JobStatus::Succeeded, "{:?}", job.error);

    let request = Request::get(created["html_url"].as_str().unwrap()).body(Body::empty()).unwrap();
    let (status, html) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(html).unwrap().contains("Meeting Report"));

    let uri = format!("{}?tail=0", created["logs_url"].as_str().unwrap());
    let (status, logs) = get_json(&router, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs["status"], "succeeded");
    assert_eq!(logs["tail"], 1);
    assert_eq!(logs["log"], "rendering");

    let (_, body) = get_json(&router, &format!("/api/jobs/{job_id}")).await;
    assert_eq!(body["queue_position"], Value::Null);
    assert_eq!(body["return_code"], 0);

    jobs.stop().await;
}
