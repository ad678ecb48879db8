//! Per-run artifact directory and run metadata.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::Result;
use crate::config::{ImageEmbedMode, PipelineConfig, PipelineMode, ReportLayout};
use crate::gateway::CallAttempt;
use crate::recovery::MapReport;
use crate::utils::fs::{ensure_dir_all_with_op, write_json_pretty};

pub const CLEANED_FILE: &str = "stage1_cleaned.json";
pub const KNOWLEDGE_FILE: &str = "stage2_knowledge.json";
pub const IMAGES_FILE: &str = "stage25_images.json";
pub const TOPICS_FILE: &str = "stage3_topics.json";
pub const SUMMARIES_FILE: &str = "stage4_summaries.json";
pub const METADATA_FILE: &str = "run_metadata.json";
pub const RUNTIME_LOG_FILE: &str = "runtime.log";

/// Run id of the form `run_YYYYmmdd_HHMMSS`, in local time.
pub fn new_run_id() -> String {
    chrono::Local::now().format("run_%Y%m%d_%H%M%S").to_string()
}

/// Files of one run under `<artifacts_root>/<run_id>/`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    save_intermediate: bool,
}

impl ArtifactStore {
    pub fn new(root: &Path, run_id: &str, save_intermediate: bool) -> Self {
        Self {
            dir: root.join(run_id),
            save_intermediate,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn runtime_log(&self) -> PathBuf {
        self.dir.join(RUNTIME_LOG_FILE)
    }

    pub async fn prepare(&self) -> Result<()> {
        ensure_dir_all_with_op("creating artifact directory", &self.dir).await
    }

    /// Write a stage artifact when intermediate saving is enabled. Failures
    /// are logged and never abort the run.
    pub async fn save_stage<T: Serialize + ?Sized>(&self, name: &str, value: &T) {
        if !self.save_intermediate {
            return;
        }
        let path = self.dir.join(name);
        match write_json_pretty(&path, value).await {
            Ok(()) => debug!(path = %path.display(), "Stage artifact saved"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to save stage artifact"),
        }
    }

    pub async fn save_metadata(&self, metadata: &RunMetadata) {
        let path = self.dir.join(METADATA_FILE);
        if let Err(e) = write_json_pretty(&path, metadata).await {
            warn!(path = %path.display(), error = %e, "Failed to save run metadata");
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: String,
    pub elapsed_ms: u64,
}

/// Summary of one run, written to `run_metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub mode: PipelineMode,
    pub layout: ReportLayout,
    pub include_ocr: bool,
    pub image_insert_enabled: bool,
    pub image_embed_mode: ImageEmbedMode,
    pub max_concurrency: usize,
    pub resume_artifact_dir: Option<PathBuf>,
    pub output_html_path: PathBuf,
    pub segments: usize,
    pub captures: usize,
    /// `model` or `template`.
    pub renderer: Option<String>,
    pub stage_timings: Vec<StageTiming>,
    pub chunk_reports: Vec<MapReport>,
    pub provider_calls: Vec<CallAttempt>,
    pub error: Option<String>,
}

impl RunMetadata {
    pub fn new(run_id: &str, config: &PipelineConfig) -> Self {
        Self {
            run_id: run_id.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            mode: config.mode,
            layout: config.layout,
            include_ocr: config.images.include_ocr,
            image_insert_enabled: config.images.insert_enabled,
            image_embed_mode: config.images.embed_mode,
            max_concurrency: config.recovery.max_concurrency,
            resume_artifact_dir: config.paths.resume_artifact_dir.clone(),
            output_html_path: config.paths.output_html.clone(),
            segments: 0,
            captures: 0,
            renderer: None,
            stage_timings: Vec::new(),
            chunk_reports: Vec::new(),
            provider_calls: Vec::new(),
            error: None,
        }
    }
}
