//! Per-job directories under the jobs root.
//!
//! ```text
//! <root>/<job_id>/
//!   transcript.json  config.json  capture_ocr_results.json
//!   orchestrator.log  meeting_report.html  job_state.json
//!   artifacts/<run_id>/...
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::warn;

use super::model::{Job, JobSubmission, JobStatus, new_job_id};
use crate::Result;
use crate::utils::fs::{ensure_dir_all_with_op, io_error, tail_lines, write_json_pretty};

pub const TRANSCRIPT_FILE: &str = "transcript.json";
pub const CONFIG_FILE: &str = "config.json";
pub const CAPTURES_FILE: &str = "capture_ocr_results.json";
pub const REPORT_FILE: &str = "meeting_report.html";
pub const LOG_FILE: &str = "orchestrator.log";
pub const STATE_FILE: &str = "job_state.json";
pub const ARTIFACTS_DIR: &str = "artifacts";

#[derive(Serialize)]
struct JobStateRecord<'a> {
    #[serde(flatten)]
    job: &'a Job,
    updated_at: DateTime<Utc>,
}

/// Durable side of the queue: job inputs and the state record.
#[derive(Debug, Clone)]
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    /// Create the job directory, write the input snapshots and return the
    /// new `queued` job.
    pub async fn create(&self, submission: &JobSubmission) -> Result<Job> {
        let job_id = new_job_id();
        let work_dir = self.job_dir(&job_id);
        ensure_dir_all_with_op("creating job directory", &work_dir).await?;

        let transcript_path = work_dir.join(TRANSCRIPT_FILE);
        write_json_pretty(
            &transcript_path,
            &json!({
                "segments": submission.segments,
                "full_text": submission.resolved_full_text(),
            }),
        )
        .await?;

        let mut config = serde_json::Map::new();
        config.insert("MEETING_INFO".to_string(), submission.meeting_info.clone().into());
        if let Some(agenda) = submission.agenda() {
            config.insert("AGENDA_TEXT".to_string(), agenda.into());
        }
        let config_path = work_dir.join(CONFIG_FILE);
        write_json_pretty(&config_path, &config).await?;

        let manifest = submission.capture_manifest();
        let captures = manifest.get("captures").and_then(Value::as_array).map_or(0, Vec::len);
        let captures_path = work_dir.join(CAPTURES_FILE);
        write_json_pretty(&captures_path, &manifest).await?;

        Ok(Job {
            job_id,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            mode: submission.resolved_mode(),
            report_layout: submission.report_layout,
            image_insert_enabled: submission.image_insert_enabled,
            save_artifacts: submission.save_artifacts,
            resume_artifact_dir: submission.resume_dir(),
            transcript_path,
            config_path,
            captures_path,
            html_path: work_dir.join(REPORT_FILE),
            log_path: work_dir.join(LOG_FILE),
            captures,
            work_dir,
            artifact_dir: None,
            runtime_log_path: None,
            return_code: None,
            error: None,
        })
    }

    /// Overwrite `job_state.json`. Failures are logged, never raised: the
    /// in-memory record stays authoritative.
    pub async fn save_state(&self, job: &Job) {
        let path = job.work_dir.join(STATE_FILE);
        let record = JobStateRecord {
            job,
            updated_at: Utc::now(),
        };
        if let Err(e) = write_json_pretty(&path, &record).await {
            warn!(job_id = %job.job_id, error = %e, "Failed to persist job state");
        }
    }

    /// Newest run directory under `<work_dir>/artifacts`, by modification time.
    pub async fn latest_artifacts_dir(&self, work_dir: &Path) -> Result<Option<PathBuf>> {
        let root = work_dir.join(ARTIFACTS_DIR);
        let mut entries = match tokio::fs::read_dir(&root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("reading", &root, e)),
        };
        let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error("reading", &root, e))? {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_dir() {
                continue;
            }
            let modified = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
            if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
                newest = Some((modified, entry.path()));
            }
        }
        Ok(newest.map(|(_, path)| path))
    }

    /// Last `lines` lines of the job's log; empty when nothing was written yet.
    pub async fn log_tail(&self, job: &Job, lines: usize) -> Result<String> {
        tail_lines(&job.log_path, lines).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineMode;

    fn submission() -> JobSubmission {
        serde_json::from_value(json!({
            "MEETING_INFO": "Board meeting",
            "AGENDA_TEXT": "1. Budget",
            "segments": [{"speaker": "A", "start": 0, "end": 2, "text": "hello"}],
            "captures": [{"timestamp_sec": 3, "image_path": "a.png"}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_writes_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path());
        let job = store.create(&submission()).await.unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.mode, PipelineMode::Agenda);
        assert_eq!(job.captures, 1);
        assert!(job.work_dir.starts_with(dir.path()));

        let transcript: Value = crate::utils::fs::read_json(&job.transcript_path).await.unwrap();
        assert_eq!(transcript["full_text"], "hello");
        let config: Value = crate::utils::fs::read_json(&job.config_path).await.unwrap();
        assert_eq!(config["AGENDA_TEXT"], "1. Budget");
        let captures: Value = crate::utils::fs::read_json(&job.captures_path).await.unwrap();
        assert_eq!(captures["captures"][0]["capture_index"], 1);
    }

    #[tokio::test]
    async fn test_save_state_includes_updated_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path());
        let job = store.create(&submission()).await.unwrap();
        store.save_state(&job).await;

        let state: Value = crate::utils::fs::read_json(&job.work_dir.join(STATE_FILE)).await.unwrap();
        assert_eq!(state["job_id"], job.job_id.as_str());
        assert_eq!(state["status"], "queued");
        assert!(state["updated_at"].is_string());
    }

    #[tokio::test]
    async fn test_latest_artifacts_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path());
        assert!(store.latest_artifacts_dir(dir.path()).await.unwrap().is_none());

        let runs = dir.path().join(ARTIFACTS_DIR);
        tokio::fs::create_dir_all(runs.join("run_a")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        tokio::fs::create_dir_all(runs.join("run_b")).await.unwrap();
        tokio::fs::write(runs.join("stray.txt"), "x").await.unwrap();

        let latest = store.latest_artifacts_dir(dir.path()).await.unwrap().unwrap();
        assert_eq!(latest.file_name().unwrap(), "run_b");
    }
}
