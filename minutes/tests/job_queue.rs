//! Job queue behaviour with real child processes standing in for the pipeline.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::process::Command;

use minutes::jobs::store::STATE_FILE;
use minutes::jobs::{Job, JobQueueConfig, JobQueueManager, JobStatus, JobSubmission, PipelineLauncher};

/// Runs a shell script with the job's report path in `$REPORT`.
struct Shell(&'static str);

impl PipelineLauncher for Shell {
    fn command(&self, job: &Job) -> minutes::Result<Command> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(self.0).env("REPORT", &job.html_path);
        Ok(cmd)
    }
}

fn manager(root: &std::path::Path, script: &'static str) -> JobQueueManager {
    let config = JobQueueConfig {
        jobs_root: root.to_path_buf(),
        poll_interval: Duration::from_millis(20),
        join_timeout: Duration::from_millis(200),
        terminate_grace: Duration::from_millis(300),
        log_tail_lines: 5,
        ..JobQueueConfig::default()
    };
    JobQueueManager::new(config, Arc::new(Shell(script)))
}

fn submission() -> JobSubmission {
    serde_json::from_value(json!({
        "MEETING_INFO": "Weekly sync",
        "segments": [{"speaker": "A", "start": 0, "end": 3, "text": "hello"}]
    }))
    .unwrap()
}

/// True while `pid` names a live process; a reaped child no longer answers `kill -0`.
fn process_exists(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

async fn wait_until_running(manager: &JobQueueManager, job_id: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.running_job().as_deref() != Some(job_id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job never started");
}

#[tokio::test]
async fn test_jobs_run_one_at_a_time_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path(), "echo working; sleep 1; echo '<html></html>' > \"$REPORT\"");
    manager.start().await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let (job, _) = manager.submit(&submission()).await.unwrap();
        ids.push(job.job_id);
    }

    wait_until_running(&manager, &ids[0]).await;
    let positions: Vec<_> = ids.iter().map(|id| manager.queue_position(id)).collect();
    assert_eq!(positions, vec![Some(0), Some(1), Some(2)]);

    let mut finished = Vec::new();
    for id in &ids {
        let job = manager.wait_for_terminal(id, Duration::from_secs(15)).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded, "{:?}", job.error);
        assert_eq!(job.return_code, Some(0));
        assert!(job.html_path.is_file());
        finished.push(job);
    }
    for pair in finished.windows(2) {
        assert!(pair[0].finished_at.unwrap() <= pair[1].started_at.unwrap());
    }

    let log = manager.log_tail(&ids[0], 10).await.unwrap();
    assert!(log.starts_with("$ sh -c"), "{log}");
    assert!(log.contains("working"));

    let state: Value =
        serde_json::from_str(&tokio::fs::read_to_string(finished[2].work_dir.join(STATE_FILE)).await.unwrap()).unwrap();
    assert_eq!(state["status"], "succeeded");
    assert_eq!(state["return_code"], 0);

    manager.stop().await;
}

#[tokio::test]
async fn test_failed_job_carries_log_tail_and_next_job_runs() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path(), "echo 'stage knowledge failed' >&2; exit 3");
    manager.start().await.unwrap();

    let (first, _) = manager.submit(&submission()).await.unwrap();
    let (second, _) = manager.submit(&submission()).await.unwrap();

    let job = manager.wait_for_terminal(&first.job_id, Duration::from_secs(5)).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.return_code, Some(3));
    let error = job.error.unwrap();
    assert!(error.contains("pipeline exited with code 3"), "{error}");
    assert!(error.contains("stage knowledge failed"), "{error}");

    let job = manager.wait_for_terminal(&second.job_id, Duration::from_secs(5)).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(manager.queue_position(&second.job_id), None);

    manager.stop().await;
}

#[tokio::test]
async fn test_clean_exit_without_report_fails() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path(), "echo done");
    manager.start().await.unwrap();

    let (job, _) = manager.submit(&submission()).await.unwrap();
    let job = manager.wait_for_terminal(&job.job_id, Duration::from_secs(5)).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.return_code, Some(0));

    manager.stop().await;
}

#[tokio::test]
async fn test_stop_kills_a_child_that_ignores_terminate() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path(), "trap '' TERM; while :; do :; done");
    manager.start().await.unwrap();

    let (job, _) = manager.submit(&submission()).await.unwrap();
    wait_until_running(&manager, &job.job_id).await;
    let pid = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(pid) = manager.running_pid() {
                return pid;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("child never spawned");
    // Let the shell install its trap before the TERM arrives.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(process_exists(pid));

    tokio::time::timeout(Duration::from_secs(5), manager.stop())
        .await
        .expect("stop did not finish");

    assert!(!process_exists(pid), "pipeline child {pid} survived stop");
    assert_eq!(manager.running_pid(), None);

    let job = manager.get(&job.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.return_code, None);
    assert!(job.error.unwrap().contains("terminated by signal"));
    assert_eq!(manager.running_job(), None);
}

#[tokio::test]
async fn test_stop_leaves_unstarted_jobs_queued() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path(), "exec sleep 2");
    manager.start().await.unwrap();

    let (first, _) = manager.submit(&submission()).await.unwrap();
    let (second, _) = manager.submit(&submission()).await.unwrap();
    wait_until_running(&manager, &first.job_id).await;

    manager.stop().await;

    assert!(manager.get(&first.job_id).unwrap().status.is_terminal());
    assert_eq!(manager.get(&second.job_id).unwrap().status, JobStatus::Queued);
}

#[tokio::test]
async fn test_queue_restarts_after_stop() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path(), "echo '<html></html>' > \"$REPORT\"");
    manager.start().await.unwrap();
    manager.stop().await;

    let (job, _) = manager.submit(&submission()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.get(&job.job_id).unwrap().status, JobStatus::Queued);

    manager.start().await.unwrap();
    let job = manager.wait_for_terminal(&job.job_id, Duration::from_secs(5)).await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded, "{:?}", job.error);

    manager.stop().await;
}
