//! Job queue.
//!
//! Submitted jobs are persisted under the jobs root and run strictly in
//! submission order by a single background worker, one child process at a
//! time. Every state change is written to the job's `job_state.json`; the
//! in-memory table serves all live queries.

pub mod model;
pub mod runner;
pub mod store;

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::env;
use crate::{Error, Result};

pub use model::{Job, JobStatus, JobSubmission, SubmissionLimits};
pub use runner::{PipelineLauncher, SelfLauncher};

use runner::{ActiveChild, JobRunner};
use store::JobStore;

/// Configuration for the job queue.
#[derive(Debug, Clone, Serialize)]
pub struct JobQueueConfig {
    pub jobs_root: PathBuf,
    /// How long `stop` waits for the worker before terminating the child.
    pub join_timeout: Duration,
    /// How long a terminated child gets before it is killed.
    pub terminate_grace: Duration,
    /// Idle worker wake-up interval, also used by `wait_for_terminal`.
    pub poll_interval: Duration,
    /// Log lines copied into a failed job's error.
    pub log_tail_lines: usize,
    #[serde(skip)]
    pub limits: SubmissionLimits,
    /// Environment applied to every child process.
    pub child_env: Vec<(String, String)>,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            jobs_root: PathBuf::from("output/api_jobs"),
            join_timeout: Duration::from_secs(10),
            terminate_grace: Duration::from_secs(5),
            poll_interval: Duration::from_millis(500),
            log_tail_lines: 80,
            limits: SubmissionLimits::default(),
            child_env: vec![
                ("PIPELINE_MAX_CONCURRENCY".to_string(), "1".to_string()),
                ("IMAGE_MIN_FILE_SIZE_KB".to_string(), "0".to_string()),
            ],
        }
    }
}

impl JobQueueConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(root) = env::string("API_JOBS_ROOT") {
            config.jobs_root = PathBuf::from(root);
        }
        config.join_timeout = Duration::from_secs(env::parse_or("API_WORKER_JOIN_TIMEOUT_SEC", 10u64).max(1));
        config.terminate_grace = Duration::from_secs(env::parse_or("API_PROCESS_TERMINATE_GRACE_SEC", 5u64).max(1));
        config.log_tail_lines = env::usize_min("API_LOG_TAIL_LINES", config.log_tail_lines, 1);
        config.limits = SubmissionLimits::from_env();
        config
    }
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<String, Job>,
    /// Submission order, for listing.
    order: Vec<String>,
    pending: VecDeque<String>,
    running: Option<String>,
}

/// Stop signals for one worker run. `start` installs a fresh pair, so a
/// stopped queue can be started again.
#[derive(Clone, Default)]
struct WorkerSignals {
    /// Exit after the current job.
    shutdown: CancellationToken,
    /// Force-kill the active child.
    kill: CancellationToken,
}

struct Inner {
    config: JobQueueConfig,
    store: JobStore,
    state: Mutex<QueueState>,
    notify: Notify,
    signals: Mutex<WorkerSignals>,
    active: Arc<ActiveChild>,
    launcher: Arc<dyn PipelineLauncher>,
}

/// Single-worker FIFO job queue.
pub struct JobQueueManager {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueueManager {
    pub fn new(config: JobQueueConfig, launcher: Arc<dyn PipelineLauncher>) -> Self {
        let store = JobStore::new(&config.jobs_root);
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                signals: Mutex::new(WorkerSignals::default()),
                active: Arc::new(ActiveChild::default()),
                launcher,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &JobQueueConfig {
        &self.inner.config
    }

    /// Spawn the worker. Calling it again while the worker runs is a no-op;
    /// after `stop` it starts a new worker on the jobs still queued.
    pub async fn start(&self) -> Result<()> {
        crate::utils::fs::ensure_dir_all_with_op("creating jobs root", self.inner.store.root()).await?;
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }
        info!(root = %self.inner.store.root().display(), "Job queue worker starting");
        let signals = WorkerSignals::default();
        *self.inner.signals.lock() = signals.clone();
        let inner = self.inner.clone();
        *worker = Some(tokio::spawn(async move { inner.worker_loop(signals).await }));
        Ok(())
    }

    /// Validate, persist and enqueue a submission. Returns the queued job and
    /// its queue position.
    pub async fn submit(&self, submission: &JobSubmission) -> Result<(Job, Option<usize>)> {
        submission.validate(&self.inner.config.limits)?;
        let job = self.inner.store.create(submission).await?;
        self.inner.store.save_state(&job).await;

        let position = {
            let mut state = self.inner.state.lock();
            state.jobs.insert(job.job_id.clone(), job.clone());
            state.order.push(job.job_id.clone());
            state.pending.push_back(job.job_id.clone());
            position_in(&state, &job.job_id)
        };
        self.inner.notify.notify_one();
        info!(job_id = %job.job_id, queue_position = ?position, "Job queued");
        Ok((job, position))
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.inner.state.lock().jobs.get(job_id).cloned()
    }

    /// All known jobs in submission order.
    pub fn list(&self) -> Vec<Job> {
        let state = self.inner.state.lock();
        state.order.iter().filter_map(|id| state.jobs.get(id).cloned()).collect()
    }

    /// `0` while running, the 1-based FIFO position while queued, `None`
    /// once terminal or unknown.
    pub fn queue_position(&self, job_id: &str) -> Option<usize> {
        position_in(&self.inner.state.lock(), job_id)
    }

    /// Last `lines` lines of the job's log.
    pub async fn log_tail(&self, job_id: &str, lines: usize) -> Result<String> {
        let job = self.get(job_id).ok_or_else(|| Error::not_found("Job", job_id))?;
        self.inner.store.log_tail(&job, lines).await
    }

    /// Poll until the job reaches a terminal state or `timeout` elapses.
    pub async fn wait_for_terminal(&self, job_id: &str, timeout: Duration) -> Result<Job> {
        let poll = self.inner.config.poll_interval.min(Duration::from_millis(100));
        let wait = async {
            loop {
                let job = self.get(job_id).ok_or_else(|| Error::not_found("Job", job_id))?;
                if job.status.is_terminal() {
                    return Ok::<_, Error>(job);
                }
                tokio::time::sleep(poll).await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::Other(format!("timed out waiting for job {job_id}")))?
    }

    /// Id of the job currently running, if any.
    pub fn running_job(&self) -> Option<String> {
        self.inner.state.lock().running.clone()
    }

    /// Process id of the running pipeline child, if one is alive.
    pub fn running_pid(&self) -> Option<u32> {
        self.inner.active.pid()
    }

    /// Stop the worker, escalating until no child process is left.
    ///
    /// 1. Ask the worker to exit after its current job and wait `join_timeout`.
    /// 2. If it is still busy, terminate the child and wait `terminate_grace`.
    /// 3. Force-kill the child, then abort the worker if it still has not exited.
    pub async fn stop(&self) {
        let handle = self.worker.lock().take();
        let Some(mut handle) = handle else {
            return;
        };
        let config = &self.inner.config;
        let signals = self.inner.signals.lock().clone();
        info!("Job queue worker stopping");
        signals.shutdown.cancel();

        if tokio::time::timeout(config.join_timeout, &mut handle).await.is_ok() {
            info!("Job queue worker stopped");
            return;
        }

        if let Some(pid) = self.inner.active.pid() {
            warn!(
                pid,
                timeout_secs = config.join_timeout.as_secs(),
                "Worker did not stop in time, terminating pipeline process"
            );
            match process_utils::request_terminate(pid).await {
                Ok(true) => {}
                Ok(false) => debug!(pid, "Pipeline process already gone"),
                Err(e) => warn!(pid, error = %e, "Failed to signal pipeline process"),
            }
            if tokio::time::timeout(config.terminate_grace, &mut handle).await.is_ok() {
                info!("Job queue worker stopped");
                return;
            }
            warn!(pid, "Pipeline process did not terminate, killing");
        }

        signals.kill.cancel();
        if tokio::time::timeout(config.terminate_grace, &mut handle).await.is_err() {
            error!("Job queue worker still alive after kill, aborting");
            handle.abort();
            let _ = handle.await;
        } else {
            info!("Job queue worker stopped");
        }
    }
}

fn position_in(state: &QueueState, job_id: &str) -> Option<usize> {
    let job = state.jobs.get(job_id)?;
    match job.status {
        JobStatus::Running => Some(0),
        JobStatus::Queued => state.pending.iter().position(|id| id == job_id).map(|i| i + 1),
        _ => None,
    }
}

impl Inner {
    async fn worker_loop(self: Arc<Self>, signals: WorkerSignals) {
        let runner = JobRunner {
            launcher: self.launcher.clone(),
            store: self.store.clone(),
            child_env: self.config.child_env.clone(),
            log_tail_lines: self.config.log_tail_lines,
            active: self.active.clone(),
            kill: signals.kill.clone(),
        };

        loop {
            if signals.shutdown.is_cancelled() {
                break;
            }
            match self.take_next() {
                Some(job) => {
                    self.store.save_state(&job).await;
                    info!(job_id = %job.job_id, "Job started");
                    let completion = runner.run(&job).await;
                    self.finish(&job.job_id, completion).await;
                }
                None => {
                    tokio::select! {
                        _ = signals.shutdown.cancelled() => break,
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }
        debug!("Job queue worker exiting");
    }

    /// Pop the next pending job and mark it running.
    fn take_next(&self) -> Option<Job> {
        let mut state = self.state.lock();
        while let Some(id) = state.pending.pop_front() {
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            if let Err(e) = job.transition(JobStatus::Running) {
                warn!(job_id = %id, error = %e, "Skipping job that cannot start");
                continue;
            }
            let job = job.clone();
            state.running = Some(id);
            return Some(job);
        }
        None
    }

    async fn finish(&self, job_id: &str, completion: runner::Completion) {
        let finished = {
            let mut state = self.state.lock();
            state.running = None;
            state.jobs.get_mut(job_id).and_then(|job| match completion.apply(job) {
                Ok(()) => Some(job.clone()),
                Err(e) => {
                    error!(job_id, error = %e, "Failed to record job completion");
                    None
                }
            })
        };
        if let Some(job) = finished {
            info!(job_id, status = %job.status, "Job finished");
            self.store.save_state(&job).await;
        }
    }
}
