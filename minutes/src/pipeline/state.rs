//! Typed records threaded through the pipeline stages.
//!
//! Inputs come from files written by other systems and outputs come from a
//! language model, so almost every field is read through the lenient
//! deserializers in [`crate::utils::lenient`]: a stray `null` or a number sent
//! as a string degrades to a default instead of failing the stage.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::heuristics::{ContentType, RenderAs};
use crate::config::{PipelineMode, ReportLayout};
use crate::gateway::ModelOutput;
use crate::utils::lenient;
use crate::utils::time::{hms_to_sec, sec_to_hms};

pub const UNKNOWN_SPEAKER: &str = "Unknown";
pub const UNMAPPED_TOPIC: &str = "UNMAPPED";

/// One speaker turn of the raw transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(default, deserialize_with = "lenient::string")]
    pub speaker: String,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub start: f64,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub end: f64,
    #[serde(default, deserialize_with = "lenient::string")]
    pub text: String,
}

/// Read records from either `{"<key>": [...]}` or a bare list, skipping
/// entries that are not objects of the expected shape.
pub fn records_from_json<T: DeserializeOwned>(value: Value, key: &str) -> Vec<T> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    items
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}

/// One screen capture with its OCR text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    /// 1-based position in the capture manifest.
    #[serde(default, deserialize_with = "lenient::u32")]
    pub capture_index: u32,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub timestamp_sec: f64,
    #[serde(default, deserialize_with = "lenient::string")]
    pub timestamp_hms: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub image_path: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub ocr_text: String,
    #[serde(default, alias = "image_size_bytes", deserialize_with = "lenient::u64")]
    pub ocr_file_size_bytes: u64,
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub ocr_skipped_reason: Option<String>,
}

impl Capture {
    /// Fill the index from the manifest position and derive whichever of the
    /// two timestamp forms is missing.
    pub fn normalize(&mut self, position: usize) {
        if self.capture_index == 0 {
            self.capture_index = position as u32 + 1;
        }
        if self.timestamp_sec <= 0.0 && !self.timestamp_hms.is_empty() {
            self.timestamp_sec = hms_to_sec(&self.timestamp_hms) as f64;
        }
        if self.timestamp_hms.is_empty() {
            self.timestamp_hms = sec_to_hms(self.timestamp_sec);
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.ocr_skipped_reason.is_some()
    }
}

/// Meeting configuration supplied with the transcript.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeetingConfig {
    #[serde(rename = "MEETING_INFO", alias = "meeting_info", default, deserialize_with = "lenient::string")]
    pub meeting_info: String,
    #[serde(rename = "AGENDA_TEXT", alias = "agenda_text", default, deserialize_with = "lenient::string")]
    pub agenda_text: String,
}

impl MeetingConfig {
    pub fn agenda_lines(&self) -> Vec<String> {
        self.agenda_text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attendee {
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub department: String,
    /// `main` or `supplementary`.
    #[serde(rename = "type", default = "main_attendee", deserialize_with = "lenient::string")]
    pub kind: String,
}

fn main_attendee() -> String {
    "main".to_string()
}

impl Attendee {
    pub fn is_main(&self) -> bool {
        self.kind.is_empty() || self.kind == "main"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeetingMeta {
    #[serde(default, deserialize_with = "lenient::string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub date: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub time_range: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub platform: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub company: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub chairperson: String,
    #[serde(default, deserialize_with = "lenient::vec_skip_invalid")]
    pub attendees: Vec<Attendee>,
}

impl MeetingMeta {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// One normalized speaker turn of the cleaned timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineRow {
    #[serde(default, deserialize_with = "lenient::f64")]
    pub timestamp_sec: f64,
    #[serde(default, deserialize_with = "lenient::string")]
    pub timestamp_hms: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub speaker: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub text: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub slide_context: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Slide {
    #[serde(default, deserialize_with = "lenient::string")]
    pub timestamp_hms: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub image_path: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub ocr_text: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub title: String,
    #[serde(default)]
    pub has_table: bool,
    #[serde(default)]
    pub has_figure: bool,
}

impl Slide {
    pub fn from_capture(capture: &Capture) -> Self {
        let lowered = capture.ocr_text.to_lowercase();
        Self {
            timestamp_hms: capture.timestamp_hms.clone(),
            image_path: capture.image_path.clone(),
            ocr_text: capture.ocr_text.clone(),
            title: first_line(&capture.ocr_text).to_string(),
            has_table: lowered.contains("<table"),
            has_figure: lowered.contains("<figure"),
        }
    }

    pub fn seconds(&self) -> u64 {
        hms_to_sec(&self.timestamp_hms)
    }
}

/// First non-blank line, trimmed.
pub fn first_line(text: &str) -> &str {
    text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}

/// Output of clean & align.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanedTranscript {
    #[serde(default)]
    pub meeting_meta: MeetingMeta,
    #[serde(default, deserialize_with = "lenient::vec_skip_invalid")]
    pub timeline: Vec<TimelineRow>,
    #[serde(default, deserialize_with = "lenient::vec_skip_invalid")]
    pub slides: Vec<Slide>,
}

impl ModelOutput for CleanedTranscript {
    const REQUIRED_KEYS: &'static [&'static str] = &["meeting_meta", "timeline", "slides"];
}

/// Entity lists of the knowledge graph. Entries are opaque objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default, deserialize_with = "lenient::value_list")]
    pub people: Vec<Value>,
    #[serde(default, deserialize_with = "lenient::value_list")]
    pub projects: Vec<Value>,
    #[serde(default, deserialize_with = "lenient::value_list")]
    pub equipment: Vec<Value>,
    #[serde(default, deserialize_with = "lenient::value_list")]
    pub financials: Vec<Value>,
    #[serde(default, deserialize_with = "lenient::value_list")]
    pub issues: Vec<Value>,
    #[serde(default, deserialize_with = "lenient::value_list")]
    pub decisions: Vec<Value>,
    #[serde(default, deserialize_with = "lenient::value_list")]
    pub action_items: Vec<Value>,
}

impl Entities {
    pub fn categories_mut(&mut self) -> [&mut Vec<Value>; 7] {
        [
            &mut self.people,
            &mut self.projects,
            &mut self.equipment,
            &mut self.financials,
            &mut self.issues,
            &mut self.decisions,
            &mut self.action_items,
        ]
    }

    pub fn into_categories(self) -> [Vec<Value>; 7] {
        [
            self.people,
            self.projects,
            self.equipment,
            self.financials,
            self.issues,
            self.decisions,
            self.action_items,
        ]
    }
}

/// A derived segment of the discussion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    #[serde(default, deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default, alias = "title", deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub department: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub start_timestamp: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub end_timestamp: String,
    #[serde(default, deserialize_with = "lenient::i64")]
    pub duration_minutes: i64,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub key_speakers: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub slide_timestamps: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub summary_points: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub issues: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub decisions: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub action_items: Vec<String>,
    /// Similarity vector; never serialized.
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

impl Topic {
    pub fn start_sec(&self) -> u64 {
        hms_to_sec(&self.start_timestamp)
    }

    pub fn end_sec(&self) -> u64 {
        hms_to_sec(&self.end_timestamp).max(self.start_sec())
    }

    /// Text embedded for similarity matching: the name followed by the summary points.
    pub fn embedding_text(&self) -> String {
        let mut text = self.name.clone();
        for point in &self.summary_points {
            text.push(' ');
            text.push_str(point);
        }
        text.trim().to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    #[serde(default)]
    pub entities: Entities,
    #[serde(default, deserialize_with = "lenient::vec_skip_invalid")]
    pub topics: Vec<Topic>,
}

impl ModelOutput for KnowledgeGraph {
    const REQUIRED_KEYS: &'static [&'static str] = &["entities", "topics"];
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

impl TimeRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Start and end in seconds; an end before the start collapses onto it.
    pub fn seconds(&self) -> (u64, u64) {
        let start = hms_to_sec(&self.start);
        (start, hms_to_sec(&self.end).max(start))
    }

    pub fn display(&self) -> String {
        format!("{} – {}", self.start, self.end)
    }
}

impl<'de> Deserialize<'de> for TimeRange {
    /// Accepts `{"start": .., "end": ..}` or a `"start - end"` string.
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Object(map) => Self::new(
                map.get("start").map(lenient::value_to_string).unwrap_or_default(),
                map.get("end").map(lenient::value_to_string).unwrap_or_default(),
            ),
            Value::String(s) => {
                let normalized = s.replace('–', "-");
                let mut parts = normalized.splitn(2, '-').map(str::trim);
                let start = parts.next().unwrap_or_default().to_string();
                let end = parts.next().unwrap_or_default().to_string();
                Self::new(start, end)
            }
            _ => Self::default(),
        })
    }
}

/// The unit of summarization, produced by either topic branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicItem {
    pub topic_id: String,
    pub agenda_number: String,
    pub title: String,
    pub department: String,
    pub status: String,
    pub time_range: TimeRange,
    pub key_speaker: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgendaEntry {
    #[serde(default, deserialize_with = "lenient::string")]
    pub agenda_number: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub agenda_title: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub agenda_department: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub status: String,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub mapped_topics: Vec<String>,
    #[serde(default)]
    pub time_range: TimeRange,
    #[serde(default, deserialize_with = "lenient::string")]
    pub key_speaker: String,
}

/// Result of the agenda-mapping branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgendaMapping {
    #[serde(default, deserialize_with = "lenient::vec_skip_invalid")]
    pub agenda_mapping: Vec<AgendaEntry>,
    #[serde(default)]
    pub coverage_stats: Value,
}

impl ModelOutput for AgendaMapping {
    const REQUIRED_KEYS: &'static [&'static str] = &["agenda_mapping", "coverage_stats"];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTopic {
    #[serde(default, deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub number: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub department: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub start_timestamp: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub end_timestamp: String,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub key_speakers: Vec<String>,
}

/// Result of the topic-discovery branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicDiscovery {
    #[serde(default, deserialize_with = "lenient::vec_skip_invalid")]
    pub extracted_topics: Vec<ExtractedTopic>,
    #[serde(default)]
    pub topic_flow: Value,
}

impl ModelOutput for TopicDiscovery {
    const REQUIRED_KEYS: &'static [&'static str] = &["extracted_topics", "topic_flow"];
}

/// Output of whichever topic branch ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "branch", rename_all = "snake_case")]
pub enum TopicMap {
    Agenda(AgendaMapping),
    Discovery(TopicDiscovery),
}

impl TopicMap {
    /// Normalize either branch into the items summarized downstream.
    pub fn topic_items(&self) -> Vec<TopicItem> {
        match self {
            Self::Agenda(mapping) => mapping
                .agenda_mapping
                .iter()
                .map(|entry| TopicItem {
                    topic_id: entry.mapped_topics.first().cloned().unwrap_or_default(),
                    agenda_number: entry.agenda_number.clone(),
                    title: entry.agenda_title.clone(),
                    department: entry.agenda_department.clone(),
                    status: entry.status.clone(),
                    time_range: entry.time_range.clone(),
                    key_speaker: entry.key_speaker.clone(),
                })
                .collect(),
            Self::Discovery(discovery) => discovery
                .extracted_topics
                .iter()
                .map(|topic| TopicItem {
                    topic_id: topic.id.clone(),
                    agenda_number: topic.number.clone(),
                    title: topic.title.clone(),
                    department: topic.department.clone(),
                    status: "discussed".to_string(),
                    time_range: TimeRange::new(
                        or_zero_hms(&topic.start_timestamp),
                        or_zero_hms(&topic.end_timestamp),
                    ),
                    key_speaker: topic.key_speakers.join(", "),
                })
                .collect(),
        }
    }
}

fn or_zero_hms(hms: &str) -> String {
    if hms.is_empty() { "00:00:00".to_string() } else { hms.to_string() }
}

/// One classified capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageManifestItem {
    #[serde(default, deserialize_with = "lenient::u32")]
    pub capture_index: u32,
    #[serde(default, deserialize_with = "lenient::string")]
    pub timestamp_hms: String,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub timestamp_sec: f64,
    #[serde(default, deserialize_with = "lenient::string")]
    pub image_path: String,
    #[serde(deserialize_with = "ContentType::deserialize_lenient", default = "slide_text")]
    pub content_type: ContentType,
    #[serde(default, deserialize_with = "lenient::string")]
    pub content_summary: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub topic_id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub topic_name: String,
    #[serde(default, deserialize_with = "lenient::u32")]
    pub insertion_priority: u32,
    #[serde(default, alias = "caption_th", deserialize_with = "lenient::string")]
    pub caption: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub special_pattern: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub pair_index: Option<u32>,
    #[serde(deserialize_with = "RenderAs::deserialize_lenient", default = "slide_text_render")]
    pub render_as: RenderAs,
    #[serde(default, deserialize_with = "lenient::string")]
    pub table_html: String,
    #[serde(default, deserialize_with = "lenient::u64")]
    pub ocr_file_size_bytes: u64,
    /// Path the model reported when it disagreed with the capture manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_image_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_image_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_base64: Option<String>,
}

fn slide_text() -> ContentType {
    ContentType::SlideText
}

fn slide_text_render() -> RenderAs {
    RenderAs::SlideText
}

impl ImageManifestItem {
    pub fn is_before_after(&self) -> bool {
        self.render_as == RenderAs::BeforeAfter
            || self.special_pattern.as_deref() == Some("BEFORE_AFTER")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageStatistics {
    #[serde(default, deserialize_with = "lenient::u64")]
    pub total: u64,
    #[serde(default, deserialize_with = "lenient::u64")]
    pub filtered: u64,
    #[serde(default, deserialize_with = "lenient::count_map")]
    pub by_type: BTreeMap<String, u64>,
    #[serde(default, deserialize_with = "lenient::value_list")]
    pub before_after_pairs: Vec<Value>,
    #[serde(default, deserialize_with = "lenient::value_list")]
    pub data_series: Vec<Value>,
}

/// Per-chunk result of image analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageAnalysis {
    #[serde(default, deserialize_with = "lenient::vec_skip_invalid")]
    pub image_manifest: Vec<ImageManifestItem>,
    #[serde(default)]
    pub statistics: ImageStatistics,
}

impl ModelOutput for ImageAnalysis {
    const REQUIRED_KEYS: &'static [&'static str] = &["image_manifest", "statistics"];
}

/// Final image-analysis output including the per-topic grouping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageReport {
    pub image_manifest: Vec<ImageManifestItem>,
    pub statistics: ImageStatistics,
    pub image_by_topic: BTreeMap<String, Vec<ImageManifestItem>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionItem {
    Task {
        #[serde(default, deserialize_with = "lenient::string")]
        task: String,
        #[serde(default, deserialize_with = "lenient::string")]
        owner: String,
        #[serde(default, deserialize_with = "lenient::string")]
        deadline: String,
    },
    Text(String),
}

impl ActionItem {
    pub fn task(&self) -> &str {
        match self {
            Self::Task { task, .. } => task,
            Self::Text(text) => text,
        }
    }

    pub fn owner(&self) -> Option<&str> {
        match self {
            Self::Task { owner, .. } if !owner.is_empty() => Some(owner),
            _ => None,
        }
    }

    pub fn deadline(&self) -> &str {
        match self {
            Self::Task { deadline, .. } => deadline,
            Self::Text(_) => "",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicSummary {
    #[serde(default, deserialize_with = "lenient::string")]
    pub topic_id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub agenda_number: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub department: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub presenter: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub time_range: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub status: String,
    #[serde(default, alias = "summary_th", deserialize_with = "lenient::string")]
    pub summary: String,
    /// Free-form `{label, value, unit}` objects or plain strings.
    #[serde(default, deserialize_with = "lenient::value_list")]
    pub key_data_points: Vec<Value>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub decisions: Vec<String>,
    #[serde(default, deserialize_with = "lenient::vec_skip_invalid")]
    pub action_items: Vec<ActionItem>,
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub slide_count: Option<u32>,
}

impl TopicSummary {
    /// Start of the time range as `HH:MM:SS`.
    pub fn start_hms(&self) -> String {
        let normalized = self.time_range.replace('–', "-");
        let start = normalized.split('-').next().unwrap_or_default().trim();
        if start.is_empty() { "00:00:00".to_string() } else { start.to_string() }
    }

    /// End of the time range in seconds, if it has two parts.
    pub fn end_sec(&self) -> Option<u64> {
        let normalized = self.time_range.replace('–', "-");
        let parts: Vec<&str> = normalized.split('-').map(str::trim).collect();
        (parts.len() == 2).then(|| hms_to_sec(parts[1]))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicSummaryEnvelope {
    #[serde(default)]
    pub topic_summary: TopicSummary,
}

impl ModelOutput for TopicSummaryEnvelope {
    const REQUIRED_KEYS: &'static [&'static str] = &["topic_summary"];
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutiveSummary {
    #[serde(default, alias = "executive_summary_th", deserialize_with = "lenient::string")]
    pub executive_summary: String,
    #[serde(default, deserialize_with = "lenient::i64")]
    pub total_decisions: i64,
    #[serde(default, deserialize_with = "lenient::i64")]
    pub total_action_items: i64,
    #[serde(default, deserialize_with = "lenient::string")]
    pub meeting_duration: String,
}

impl ModelOutput for ExecutiveSummary {
    const REQUIRED_KEYS: &'static [&'static str] = &[
        "executive_summary",
        "total_decisions",
        "total_action_items",
        "meeting_duration",
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summaries {
    pub topic_summaries: Vec<TopicSummary>,
    pub executive_summary: String,
    pub total_decisions: u64,
    pub total_action_items: u64,
    pub meeting_duration: String,
}

/// Accumulated state of one run. Each stage fills its own slot.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub run_id: String,
    pub mode: PipelineMode,
    pub layout: ReportLayout,
    pub segments: Vec<Segment>,
    pub captures: Vec<Capture>,
    pub meeting: MeetingConfig,
    pub cleaned: Option<CleanedTranscript>,
    pub knowledge: Option<KnowledgeGraph>,
    pub topic_map: Option<TopicMap>,
    pub images: Option<ImageReport>,
    pub summaries: Option<Summaries>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_records_from_either_shape() {
        let segments: Vec<Segment> = records_from_json(
            json!({
                "segments": [{"speaker": "A", "start": "1.5", "end": 3, "text": "hi"}, "junk", [1, 2]]
            }),
            "segments",
        );
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start, 1.5);

        let bare: Vec<Segment> = records_from_json(json!([{"start": 0, "text": "x"}]), "segments");
        assert_eq!(bare[0].speaker, "");

        let none: Vec<Capture> = records_from_json(json!({"other": []}), "captures");
        assert!(none.is_empty());
    }

    #[test]
    fn test_capture_normalization() {
        let mut capture: Capture = serde_json::from_value(json!({
            "timestamp_hms": "00:01:05",
            "image_size_bytes": 40000,
            "ocr_skipped_reason": ""
        }))
        .unwrap();
        capture.normalize(2);
        assert_eq!(capture.capture_index, 3);
        assert_eq!(capture.timestamp_sec, 65.0);
        assert_eq!(capture.ocr_file_size_bytes, 40000);
        assert!(!capture.is_skipped());

        let mut capture = Capture {
            timestamp_sec: 125.0,
            ..Capture::default()
        };
        capture.normalize(0);
        assert_eq!(capture.timestamp_hms, "00:02:05");
    }

    #[test]
    fn test_time_range_accepts_object_and_string() {
        let object: TimeRange =
            serde_json::from_value(json!({"start": "00:01:00", "end": "00:02:00"})).unwrap();
        assert_eq!(object.seconds(), (60, 120));

        let text: TimeRange = serde_json::from_value(json!("00:05:00 – 00:04:00")).unwrap();
        assert_eq!(text.start, "00:05:00");
        assert_eq!(text.seconds(), (300, 300));

        let junk: TimeRange = serde_json::from_value(json!(7)).unwrap();
        assert_eq!(junk, TimeRange::default());
    }

    #[test]
    fn test_topic_items_from_both_branches() {
        let agenda = TopicMap::Agenda(
            serde_json::from_value(json!({
                "agenda_mapping": [{
                    "agenda_number": 1,
                    "agenda_title": "Budget",
                    "mapped_topics": ["T002", "T003"],
                    "status": "discussed",
                    "time_range": {"start": "00:00:10", "end": "00:05:00"}
                }],
                "coverage_stats": {}
            }))
            .unwrap(),
        );
        let items = agenda.topic_items();
        assert_eq!(items[0].topic_id, "T002");
        assert_eq!(items[0].agenda_number, "1");

        let discovery = TopicMap::Discovery(
            serde_json::from_value(json!({
                "extracted_topics": [{"id": "T001", "title": "Safety", "key_speakers": ["A", "B"]}],
                "topic_flow": []
            }))
            .unwrap(),
        );
        let items = discovery.topic_items();
        assert_eq!(items[0].status, "discussed");
        assert_eq!(items[0].key_speaker, "A, B");
        assert_eq!(items[0].time_range.start, "00:00:00");
    }

    #[test]
    fn test_action_items_accept_strings_and_objects() {
        let summary: TopicSummary = serde_json::from_value(json!({
            "action_items": ["call vendor", {"task": "fix pump", "owner": "Ann"}, 5],
            "summary_th": "text"
        }))
        .unwrap();
        assert_eq!(summary.action_items.len(), 2);
        assert_eq!(summary.action_items[0].task(), "call vendor");
        assert_eq!(summary.action_items[1].owner(), Some("Ann"));
        assert_eq!(summary.summary, "text");
    }

    #[test]
    fn test_manifest_item_lenient_enums() {
        let item: ImageManifestItem = serde_json::from_value(json!({
            "capture_index": "4",
            "content_type": "photo",
            "render_as": "nonsense",
            "insertion_priority": 4.0
        }))
        .unwrap();
        assert_eq!(item.capture_index, 4);
        assert_eq!(item.content_type, ContentType::Photo);
        assert_eq!(item.render_as, RenderAs::SlideText);
        assert_eq!(item.insertion_priority, 4);
    }
}
