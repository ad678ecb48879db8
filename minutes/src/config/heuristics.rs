//! Deterministic classification tables used when the model cannot classify a capture.
//!
//! The keyword lists and priorities are business policy, so they live in data
//! that can be overridden from a JSON file rather than in match arms.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::utils::fs::read_json;
use crate::utils::lenient::value_to_string;

/// What a slide capture mostly shows.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    DataTable,
    Chart,
    Photo,
    Document,
    ZoomScreen,
    SlideText,
    Skipped,
}

impl ContentType {
    /// Lenient serde adapter: unknown strings map to `SlideText`.
    pub fn deserialize_lenient<'de, D>(d: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = value_to_string(&serde_json::Value::deserialize(d)?);
        Ok(raw.parse().unwrap_or(Self::SlideText))
    }
}

/// How a capture is placed in the rendered report.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum RenderAs {
    HtmlTable,
    PhotoLightbox,
    ChartEmbed,
    DocumentRef,
    BeforeAfter,
    SlideText,
}

impl RenderAs {
    /// Lenient serde adapter: unknown strings map to `SlideText`.
    pub fn deserialize_lenient<'de, D>(d: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = value_to_string(&serde_json::Value::deserialize(d)?);
        Ok(raw.parse().unwrap_or(Self::SlideText))
    }

    /// Whether the capture is shown as an image (and so benefits from an inline copy).
    pub fn shows_image(&self) -> bool {
        matches!(self, Self::PhotoLightbox | Self::BeforeAfter | Self::ChartEmbed)
    }
}

/// One keyword rule. Matches when every `all_of` needle and at least one
/// `any_of` needle (if any are listed) occur in the lowercased OCR text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRule {
    pub content_type: ContentType,
    #[serde(default)]
    pub all_of: Vec<String>,
    #[serde(default)]
    pub any_of: Vec<String>,
}

impl ClassificationRule {
    fn new(content_type: ContentType, all_of: &[&str], any_of: &[&str]) -> Self {
        Self {
            content_type,
            all_of: all_of.iter().map(|s| s.to_string()).collect(),
            any_of: any_of.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn matches(&self, lowered: &str) -> bool {
        self.all_of.iter().all(|n| lowered.contains(n.as_str()))
            && (self.any_of.is_empty() || self.any_of.iter().any(|n| lowered.contains(n.as_str())))
    }
}

/// Tunable tables for the deterministic fallbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicConfig {
    /// Ordered rules; the first match wins, otherwise `SlideText`.
    pub rules: Vec<ClassificationRule>,
    pub priorities: BTreeMap<ContentType, u8>,
    pub render_as: BTreeMap<ContentType, RenderAs>,
    /// Captures smaller than this are treated as unreadable.
    pub min_capture_bytes: u64,
    /// Only captures at or above this priority are inserted into the report.
    pub min_insert_priority: u8,
    pub synthesis_window_minutes: u32,
    pub max_synthesized_topics: usize,
    pub synthesis_points: usize,
    pub synthesis_speakers: usize,
    pub synthesis_slide_refs: usize,
    pub point_chars: usize,
    pub caption_chars: usize,
    pub max_summary_points: usize,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        use ContentType::*;
        Self {
            rules: vec![
                ClassificationRule::new(DataTable, &["<table"], &[]),
                ClassificationRule::new(Chart, &["<figure"], &["chart", "graph", "แผนภูมิ", "กราฟ"]),
                ClassificationRule::new(Photo, &["<figure"], &[]),
                ClassificationRule::new(
                    Document,
                    &[],
                    &[".pdf", ".ppt", ".pptx", "adobe acrobat", "powerpoint"],
                ),
                ClassificationRule::new(ZoomScreen, &["zoom"], &["participant", "gallery", "ผู้เข้าร่วม"]),
            ],
            priorities: BTreeMap::from([
                (DataTable, 5),
                (Photo, 4),
                (Chart, 4),
                (Document, 3),
                (SlideText, 2),
                (ZoomScreen, 1),
                (Skipped, 0),
            ]),
            render_as: BTreeMap::from([
                (DataTable, RenderAs::HtmlTable),
                (Photo, RenderAs::PhotoLightbox),
                (Chart, RenderAs::ChartEmbed),
                (Document, RenderAs::DocumentRef),
                (SlideText, RenderAs::SlideText),
                (ZoomScreen, RenderAs::SlideText),
                (Skipped, RenderAs::SlideText),
            ]),
            min_capture_bytes: 30_000,
            min_insert_priority: 3,
            synthesis_window_minutes: 12,
            max_synthesized_topics: 20,
            synthesis_points: 4,
            synthesis_speakers: 3,
            synthesis_slide_refs: 8,
            point_chars: 180,
            caption_chars: 180,
            max_summary_points: 5,
        }
    }
}

impl HeuristicConfig {
    /// Load overrides from a JSON file; fields it omits keep their defaults.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => read_json(path).await,
            None => Ok(Self::default()),
        }
    }

    pub fn classify(&self, ocr_text: &str) -> ContentType {
        let lowered = ocr_text.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| rule.content_type)
            .unwrap_or(ContentType::SlideText)
    }

    pub fn priority(&self, content_type: ContentType) -> u8 {
        self.priorities.get(&content_type).copied().unwrap_or(2)
    }

    pub fn render_mode(&self, content_type: ContentType) -> RenderAs {
        self.render_as
            .get(&content_type)
            .copied()
            .unwrap_or(RenderAs::SlideText)
    }
}
