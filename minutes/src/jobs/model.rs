//! Job records and the submission payload.

use std::path::PathBuf;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::env;
use crate::config::{PipelineMode, ReportLayout};
use crate::utils::time::{hms_to_sec, sec_to_hms};
use crate::{Error, Result};

/// Remote captures with no known size count as this many bytes so they stay
/// eligible for insertion.
pub const REMOTE_CAPTURE_SIZE: u64 = 1024 * 1024;

/// Capture fields that may carry the image location, in preference order.
const IMAGE_PATH_KEYS: [&str; 7] = [
    "image_presigned_url",
    "image_url",
    "presigned_url",
    "s3_presigned_url",
    "s3_url",
    "url",
    "image_path",
];

/// Lifecycle of a job. Terminal states are absorbing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether `self → next` is a legal edge.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running) | (Self::Running, Self::Succeeded | Self::Failed)
        )
    }
}

/// One submitted pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub mode: PipelineMode,
    pub report_layout: ReportLayout,
    pub image_insert_enabled: bool,
    pub save_artifacts: bool,
    pub resume_artifact_dir: Option<PathBuf>,
    pub work_dir: PathBuf,
    pub transcript_path: PathBuf,
    pub config_path: PathBuf,
    pub captures_path: PathBuf,
    pub html_path: PathBuf,
    pub log_path: PathBuf,
    /// Number of captures written with the job inputs.
    pub captures: usize,
    pub artifact_dir: Option<PathBuf>,
    pub runtime_log_path: Option<PathBuf>,
    pub return_code: Option<i32>,
    pub error: Option<String>,
}

impl Job {
    /// Move to `next`, stamping the start or finish time.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        match next {
            JobStatus::Running => {
                self.started_at = Some(now);
                self.finished_at = None;
                self.error = None;
            }
            JobStatus::Succeeded | JobStatus::Failed => self.finished_at = Some(now),
            JobStatus::Queued => {}
        }
        self.status = next;
        Ok(())
    }
}

/// `job_YYYYmmdd_HHMMSS_<8 hex>`.
pub fn new_job_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", Local::now().format("job_%Y%m%d_%H%M%S_"), &hex[..8])
}

/// Input size limits checked on submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionLimits {
    pub max_segments: usize,
    pub max_captures: usize,
    pub max_meeting_info_chars: usize,
    pub max_agenda_chars: usize,
    pub max_full_text_chars: usize,
}

impl Default for SubmissionLimits {
    fn default() -> Self {
        Self {
            max_segments: 10_000,
            max_captures: 30_000,
            max_meeting_info_chars: 200_000,
            max_agenda_chars: 500_000,
            max_full_text_chars: 1_500_000,
        }
    }
}

impl SubmissionLimits {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_segments: env::usize_min("API_MAX_SEGMENTS", d.max_segments, 1),
            max_captures: env::usize_min("API_MAX_CAPTURES", d.max_captures, 1),
            max_meeting_info_chars: env::usize_min("API_MAX_MEETING_INFO_CHARS", d.max_meeting_info_chars, 1),
            max_agenda_chars: env::usize_min("API_MAX_AGENDA_TEXT_CHARS", d.max_agenda_chars, 1),
            max_full_text_chars: env::usize_min("API_MAX_FULL_TEXT_CHARS", d.max_full_text_chars, 1),
        }
    }
}

/// Request body of a job submission.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobSubmission {
    #[serde(rename = "MEETING_INFO", alias = "meeting_info", default)]
    pub meeting_info: String,
    #[serde(default)]
    pub segments: Vec<Value>,
    #[serde(default)]
    pub full_text: Option<String>,
    #[serde(rename = "AGENDA_TEXT", alias = "agenda_text", default)]
    pub agenda_text: Option<String>,
    #[serde(alias = "capture_ocr_results.json", default)]
    pub capture_ocr_results: Option<Map<String, Value>>,
    #[serde(default)]
    pub captures: Option<Vec<Value>>,
    #[serde(default)]
    pub mode: Option<PipelineMode>,
    #[serde(default = "default_layout")]
    pub report_layout: ReportLayout,
    #[serde(default = "default_true")]
    pub image_insert_enabled: bool,
    #[serde(default = "default_true")]
    pub save_artifacts: bool,
    #[serde(default)]
    pub resume_artifact_dir: Option<String>,
}

fn default_layout() -> ReportLayout {
    ReportLayout::Official
}

fn default_true() -> bool {
    true
}

impl JobSubmission {
    /// Reject payloads that cannot produce a run.
    pub fn validate(&self, limits: &SubmissionLimits) -> Result<()> {
        if self.meeting_info.trim().is_empty() {
            return Err(Error::validation("MEETING_INFO is required"));
        }
        if self.meeting_info.chars().count() > limits.max_meeting_info_chars {
            return Err(Error::validation(format!(
                "MEETING_INFO exceeds limit ({} chars)",
                limits.max_meeting_info_chars
            )));
        }
        if self.segments.is_empty() {
            return Err(Error::validation("segments is required and cannot be empty"));
        }
        if self.segments.len() > limits.max_segments {
            return Err(Error::validation(format!(
                "segments exceeds limit ({} items)",
                limits.max_segments
            )));
        }
        if let Some(pos) = self.segments.iter().position(|s| !s.is_object()) {
            return Err(Error::validation(format!("segments[{pos}] must be an object")));
        }
        if let Some(text) = &self.full_text
            && text.chars().count() > limits.max_full_text_chars
        {
            return Err(Error::validation(format!(
                "full_text exceeds limit ({} chars)",
                limits.max_full_text_chars
            )));
        }
        if let Some(agenda) = &self.agenda_text
            && agenda.chars().count() > limits.max_agenda_chars
        {
            return Err(Error::validation(format!(
                "AGENDA_TEXT exceeds limit ({} chars)",
                limits.max_agenda_chars
            )));
        }
        if self.captures.as_ref().is_some_and(|c| c.len() > limits.max_captures) {
            return Err(Error::validation(format!(
                "captures exceeds limit ({} items)",
                limits.max_captures
            )));
        }
        if self.embedded_captures().is_some_and(|c| c.len() > limits.max_captures) {
            return Err(Error::validation(format!(
                "capture_ocr_results.captures exceeds limit ({} items)",
                limits.max_captures
            )));
        }
        Ok(())
    }

    fn embedded_captures(&self) -> Option<&Vec<Value>> {
        self.capture_ocr_results
            .as_ref()
            .and_then(|m| m.get("captures"))
            .and_then(Value::as_array)
    }

    pub fn agenda(&self) -> Option<&str> {
        self.agenda_text.as_deref().map(str::trim).filter(|a| !a.is_empty())
    }

    /// Explicit mode, else `agenda` when agenda text is present.
    pub fn resolved_mode(&self) -> PipelineMode {
        self.mode.unwrap_or(if self.agenda().is_some() {
            PipelineMode::Agenda
        } else {
            PipelineMode::Auto
        })
    }

    /// The supplied full text, or the segment texts joined line by line.
    pub fn resolved_full_text(&self) -> String {
        match self.full_text.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(text) => text.to_string(),
            None => self
                .segments
                .iter()
                .filter_map(|s| s.get("text").and_then(Value::as_str))
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Capture manifest body: the embedded object with `captures` replaced by
    /// the direct list when given, and every row normalized.
    pub fn capture_manifest(&self) -> Map<String, Value> {
        let mut manifest = self.capture_ocr_results.clone().unwrap_or_default();
        let rows = match &self.captures {
            Some(direct) => direct.clone(),
            None => self.embedded_captures().cloned().unwrap_or_default(),
        };
        manifest.insert("captures".to_string(), Value::Array(normalize_capture_rows(rows)));
        manifest
    }

    pub fn resume_dir(&self) -> Option<PathBuf> {
        self.resume_artifact_dir
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
    }
}

/// Normalize raw capture rows, keeping any extra fields they carry.
///
/// Rows that are not objects are dropped. The result is sorted by
/// `capture_index`.
pub fn normalize_capture_rows(rows: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Map<String, Value>> = rows
        .into_iter()
        .enumerate()
        .filter_map(|(position, row)| match row {
            Value::Object(map) => Some(normalize_capture_row(map, position + 1)),
            _ => None,
        })
        .collect();
    out.sort_by_key(|row| as_i64(row.get("capture_index")).unwrap_or(0));
    out.into_iter().map(Value::Object).collect()
}

fn normalize_capture_row(mut row: Map<String, Value>, position: usize) -> Map<String, Value> {
    let index = as_i64(row.get("capture_index")).filter(|i| *i > 0).unwrap_or(position as i64);
    row.insert("capture_index".to_string(), index.into());

    let hms = as_str(row.get("timestamp_hms")).unwrap_or_default();
    let mut sec = as_f64(row.get("timestamp_sec")).unwrap_or(-1.0);
    if sec < 0.0 && !hms.is_empty() {
        sec = hms_to_sec(&hms) as f64;
    }
    let sec = sec.max(0.0);
    let hms = if hms.is_empty() { sec_to_hms(sec) } else { hms };
    row.insert("timestamp_sec".to_string(), sec.into());
    row.insert("timestamp_hms".to_string(), hms.into());

    let image_path = IMAGE_PATH_KEYS
        .iter()
        .find_map(|key| as_str(row.get(*key)).filter(|v| !v.is_empty()))
        .unwrap_or_default();
    if !image_path.is_empty() {
        row.insert("image_path".to_string(), image_path.clone().into());
    }

    if !row.contains_key("ocr_text") {
        let text = as_str(row.get("text")).unwrap_or_default();
        row.insert("ocr_text".to_string(), text.into());
    }

    let size = match as_i64(row.get("ocr_file_size_bytes")).filter(|s| *s >= 0) {
        Some(size) => size as u64,
        None if is_remote(&image_path) => REMOTE_CAPTURE_SIZE,
        None => as_i64(row.get("image_size_bytes")).filter(|s| *s >= 0).unwrap_or(0) as u64,
    };
    row.insert("ocr_file_size_bytes".to_string(), size.into());
    row
}

fn is_remote(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn as_str(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
