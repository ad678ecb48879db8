//! Child process execution of one job.
//!
//! The pipeline runs in its own process so a crash inside a run cannot take
//! the queue down with it. Its stdout and stderr are merged line by line into
//! the job log, which starts with a `$ <command line>` header.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use process_utils::tokio_command;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::model::{Job, JobStatus};
use super::store::JobStore;
use crate::pipeline::artifacts::RUNTIME_LOG_FILE;
use crate::utils::fs::{ensure_parent_dir, io_error};
use crate::{Error, Result};

/// Output readers get this long to drain after the child exits.
const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds the command that executes one job.
pub trait PipelineLauncher: Send + Sync {
    fn command(&self, job: &Job) -> Result<Command>;
}

/// Re-executes a `minutes` binary with `run` and the job's paths and flags.
#[derive(Debug, Clone)]
pub struct SelfLauncher {
    program: PathBuf,
}

impl SelfLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    /// Launcher for the running executable.
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe().map_err(|e| Error::config(format!("cannot locate own executable: {e}")))?;
        Ok(Self::new(program))
    }
}

impl PipelineLauncher for SelfLauncher {
    fn command(&self, job: &Job) -> Result<Command> {
        let mut cmd = tokio_command(&self.program);
        cmd.arg("run")
            .arg("--transcript")
            .arg(&job.transcript_path)
            .arg("--config")
            .arg(&job.config_path)
            .arg("--captures")
            .arg(&job.captures_path)
            .arg("--output")
            .arg(&job.html_path)
            .arg("--mode")
            .arg(job.mode.to_string())
            .arg("--report-layout")
            .arg(job.report_layout.to_string())
            .arg("--save-artifacts")
            .arg(job.save_artifacts.to_string());
        if let Some(dir) = &job.resume_artifact_dir {
            cmd.arg("--resume-artifact-dir").arg(dir);
        }
        cmd.env("ARTIFACTS_ROOT", job.work_dir.join(super::store::ARTIFACTS_DIR))
            .env("INCLUDE_OCR", (job.captures > 0).to_string())
            .env("IMAGE_INSERT_ENABLED", job.image_insert_enabled.to_string());
        Ok(cmd)
    }
}

/// Terminal fields of a finished job.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub status: JobStatus,
    pub return_code: Option<i32>,
    pub artifact_dir: Option<PathBuf>,
    pub runtime_log_path: Option<PathBuf>,
    pub error: Option<String>,
}

impl Completion {
    pub fn apply(self, job: &mut Job) -> Result<()> {
        job.transition(self.status)?;
        job.return_code = self.return_code;
        job.artifact_dir = self.artifact_dir;
        job.runtime_log_path = self.runtime_log_path;
        job.error = self.error;
        Ok(())
    }
}

/// Process handles shared with the queue's shutdown path.
#[derive(Debug, Default)]
pub struct ActiveChild {
    pid: Mutex<Option<u32>>,
}

impl ActiveChild {
    pub fn pid(&self) -> Option<u32> {
        *self.pid.lock()
    }

    fn set(&self, pid: Option<u32>) {
        *self.pid.lock() = pid;
    }
}

/// Everything one execution needs from the manager.
pub struct JobRunner {
    pub launcher: Arc<dyn PipelineLauncher>,
    pub store: JobStore,
    pub child_env: Vec<(String, String)>,
    pub log_tail_lines: usize,
    pub active: Arc<ActiveChild>,
    /// Cancelled to force-kill the active child.
    pub kill: CancellationToken,
}

impl JobRunner {
    /// Run `job` to completion. Never fails: runner errors become a failed
    /// completion.
    pub async fn run(&self, job: &Job) -> Completion {
        match self.try_run(job).await {
            Ok(completion) => completion,
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "Job runner exception");
                Completion {
                    status: JobStatus::Failed,
                    return_code: None,
                    artifact_dir: None,
                    runtime_log_path: None,
                    error: Some(format!("job runner exception: {e}")),
                }
            }
        }
    }

    async fn try_run(&self, job: &Job) -> Result<Completion> {
        let mut cmd = self.launcher.command(job)?;
        cmd.envs(self.child_env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let code = execute(cmd, &job.log_path, &self.active, &self.kill).await?;

        let artifact_dir = self.store.latest_artifacts_dir(&job.work_dir).await?;
        let runtime_log_path = artifact_dir
            .as_ref()
            .map(|dir| dir.join(RUNTIME_LOG_FILE))
            .filter(|p| p.is_file());
        let html_exists = tokio::fs::try_exists(&job.html_path).await.unwrap_or(false);

        if code == Some(0) && html_exists {
            info!(job_id = %job.job_id, "Job succeeded");
            return Ok(Completion {
                status: JobStatus::Succeeded,
                return_code: code,
                artifact_dir,
                runtime_log_path,
                error: None,
            });
        }

        let code_text = code.map_or_else(|| "unknown (terminated by signal)".to_string(), |c| c.to_string());
        let mut error = format!("pipeline exited with code {code_text}");
        if code == Some(0) {
            error.push_str(" but produced no report");
        }
        let tail = self.store.log_tail(job, self.log_tail_lines).await.unwrap_or_default();
        if !tail.trim().is_empty() {
            error.push('\n');
            error.push_str(&tail);
        }
        warn!(job_id = %job.job_id, exit_code = ?code, "Job failed");
        Ok(Completion {
            status: JobStatus::Failed,
            return_code: code,
            artifact_dir,
            runtime_log_path,
            error: Some(error),
        })
    }
}

/// Render a command as a shell-like line for the log header.
pub fn command_line(cmd: &Command) -> String {
    let inner = cmd.as_std();
    std::iter::once(inner.get_program())
        .chain(inner.get_args())
        .map(|part| {
            let part = part.to_string_lossy();
            if part.is_empty() || part.contains(char::is_whitespace) {
                format!("'{part}'")
            } else {
                part.into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Spawn `cmd`, stream its output into `log_path` and wait for it to exit or
/// for `kill` to fire. Returns the exit code, `None` when the process was
/// ended by a signal.
async fn execute(mut cmd: Command, log_path: &Path, active: &ActiveChild, kill: &CancellationToken) -> Result<Option<i32>> {
    ensure_parent_dir(log_path).await?;
    let mut log = tokio::fs::File::create(log_path)
        .await
        .map_err(|e| io_error("creating", log_path, e))?;
    let header = format!("$ {}\n", command_line(&cmd));
    log.write_all(header.as_bytes())
        .await
        .map_err(|e| io_error("writing", log_path, e))?;

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Other(format!("failed to spawn pipeline: {e}")))?;
    active.set(child.id());
    debug!(pid = ?child.id(), "Pipeline process started");

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(forward_lines(stderr, tx.clone()));
    }
    drop(tx);

    let log_path_owned = log_path.to_path_buf();
    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let written = async {
                log.write_all(line.as_bytes()).await?;
                log.write_all(b"\n").await?;
                log.flush().await
            }
            .await;
            if let Err(e) = written {
                warn!(path = %log_path_owned.display(), error = %e, "Failed to write job log");
                break;
            }
        }
    });

    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill.cancelled() => {
            warn!(pid = ?child.id(), "Force-killing pipeline process");
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "Failed to kill pipeline process");
            }
            child.wait().await
        }
    };
    active.set(None);
    let status = status.map_err(|e| Error::Other(format!("failed to wait for pipeline: {e}")))?;

    // A grandchild holding the pipes open must not stall the queue.
    let drained = tokio::time::timeout(LOG_DRAIN_TIMEOUT, async {
        for reader in &mut readers {
            let _ = reader.await;
        }
    })
    .await;
    if drained.is_err() {
        warn!("Pipeline output did not close in time, truncating job log");
        for reader in &readers {
            reader.abort();
        }
    }
    let _ = writer.await;

    Ok(status.code())
}

fn forward_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineMode, ReportLayout};
    use std::ffi::OsStr;

    fn job(dir: &Path) -> Job {
        Job {
            job_id: "job_test".to_string(),
            status: JobStatus::Running,
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
            mode: PipelineMode::Agenda,
            report_layout: ReportLayout::Official,
            image_insert_enabled: false,
            save_artifacts: true,
            resume_artifact_dir: Some(dir.join("resume")),
            work_dir: dir.to_path_buf(),
            transcript_path: dir.join("transcript.json"),
            config_path: dir.join("config.json"),
            captures_path: dir.join("capture_ocr_results.json"),
            html_path: dir.join("meeting_report.html"),
            log_path: dir.join("orchestrator.log"),
            captures: 0,
            artifact_dir: None,
            runtime_log_path: None,
            return_code: None,
            error: None,
        }
    }

    #[test]
    fn test_self_launcher_arguments() {
        let dir = Path::new("/jobs/job_1");
        let cmd = SelfLauncher::new("/usr/bin/minutes").command(&job(dir)).unwrap();
        let line = command_line(&cmd);
        assert!(line.starts_with("/usr/bin/minutes run --transcript /jobs/job_1/transcript.json"));
        assert!(line.contains("--mode agenda"));
        assert!(line.contains("--report-layout official"));
        assert!(line.contains("--save-artifacts true"));
        assert!(line.ends_with("--resume-artifact-dir /jobs/job_1/resume"));

        let envs: Vec<_> = cmd.as_std().get_envs().collect();
        let has = |k: &str, v: &str| envs.contains(&(OsStr::new(k), Some(OsStr::new(v))));
        assert!(has("INCLUDE_OCR", "false"));
        assert!(has("IMAGE_INSERT_ENABLED", "false"));
    }

    #[test]
    fn test_command_line_quotes_spaces() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo hi");
        assert_eq!(command_line(&cmd), "sh -c 'echo hi'");
    }

    #[cfg(unix)]
    mod unix {
        use super::*;

        struct Shell(&'static str);

        impl PipelineLauncher for Shell {
            fn command(&self, job: &Job) -> Result<Command> {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(self.0).env("HTML", &job.html_path);
                Ok(cmd)
            }
        }

        fn runner(dir: &Path, script: &'static str) -> JobRunner {
            JobRunner {
                launcher: Arc::new(Shell(script)),
                store: JobStore::new(dir),
                child_env: vec![("EXTRA".to_string(), "from-env".to_string())],
                log_tail_lines: 80,
                active: Arc::new(ActiveChild::default()),
                kill: CancellationToken::new(),
            }
        }

        #[tokio::test]
        async fn test_success_needs_exit_zero_and_report() {
            let dir = tempfile::tempdir().unwrap();
            let job = job(dir.path());

            let ok = runner(dir.path(), "echo \"$EXTRA\"; echo '<html/>' > \"$HTML\"").run(&job).await;
            assert_eq!(ok.status, JobStatus::Succeeded);
            assert_eq!(ok.return_code, Some(0));
            let log = tokio::fs::read_to_string(&job.log_path).await.unwrap();
            assert!(log.starts_with("$ sh -c "));
            assert!(log.contains("from-env"));

            tokio::fs::remove_file(&job.html_path).await.unwrap();
            let missing = runner(dir.path(), "exit 0").run(&job).await;
            assert_eq!(missing.status, JobStatus::Failed);
            assert!(missing.error.unwrap().contains("no report"));
        }

        #[tokio::test]
        async fn test_failure_carries_log_tail() {
            let dir = tempfile::tempdir().unwrap();
            let job = job(dir.path());
            let done = runner(dir.path(), "echo first; echo boom >&2; exit 3").run(&job).await;
            assert_eq!(done.status, JobStatus::Failed);
            assert_eq!(done.return_code, Some(3));
            let error = done.error.unwrap();
            assert!(error.starts_with("pipeline exited with code 3\n"));
            assert!(error.contains("boom"));
        }

        #[tokio::test]
        async fn test_spawn_error_is_a_runner_exception() {
            struct Missing;
            impl PipelineLauncher for Missing {
                fn command(&self, _job: &Job) -> Result<Command> {
                    Ok(Command::new("/definitely/not/a/binary"))
                }
            }
            let dir = tempfile::tempdir().unwrap();
            let mut runner = runner(dir.path(), "true");
            runner.launcher = Arc::new(Missing);
            let done = runner.run(&job(dir.path())).await;
            assert_eq!(done.status, JobStatus::Failed);
            assert!(done.error.unwrap().starts_with("job runner exception: "));
        }

        #[tokio::test]
        async fn test_kill_token_stops_child() {
            let dir = tempfile::tempdir().unwrap();
            let job = job(dir.path());
            let runner = runner(dir.path(), "trap '' TERM; while true; do sleep 1; done");
            let kill = runner.kill.clone();
            let active = runner.active.clone();

            let handle = tokio::spawn(async move { runner.run(&job).await });
            while active.pid().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            kill.cancel();
            let done = tokio::time::timeout(Duration::from_secs(10), handle).await.unwrap().unwrap();
            assert_eq!(done.status, JobStatus::Failed);
            assert!(active.pid().is_none());
        }
    }
}
