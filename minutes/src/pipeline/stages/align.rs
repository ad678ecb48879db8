//! Clean & align: transcript segments plus nearby captures become one
//! ordered, deduplicated timeline with slide context.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use tracing::info;

use crate::config::{PipelineConfig, ReportDefaults};
use crate::gateway::ModelGateway;
use crate::pipeline::artifacts::CLEANED_FILE;
use crate::pipeline::context::StageContext;
use crate::pipeline::prompts;
use crate::pipeline::state::{
    Attendee, Capture, CleanedTranscript, MeetingConfig, MeetingMeta, Segment, Slide,
    TimelineRow, UNKNOWN_SPEAKER, first_line,
};
use crate::recovery::{ChunkMapper, PartialMerge, WorkUnit};
use crate::utils::text::{
    collapse_whitespace, content_hash, fill_template, remove_stutter, strip_html, truncate_chars,
};
use crate::utils::time::sec_to_hms;
use crate::{Error, Result};

const STAGE: &str = "align";

/// Consecutive same-speaker rows closer than this are merged.
pub const MERGE_GAP_SEC: f64 = 3.0;

static ATTENDEE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+\.\s*(.+)$").unwrap());
static ATTENDEE_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\t+|\s{2,}").unwrap());

pub async fn run(
    ctx: &StageContext,
    segments: &[Segment],
    captures: &[Capture],
    meeting: &MeetingConfig,
) -> Result<CleanedTranscript> {
    let config = &ctx.config;
    let mapper = Arc::new(AlignMapper::new(ctx.gateway.clone(), config, captures, meeting)?);

    let (partials, report) = ctx
        .executor
        .map_reduce(
            STAGE,
            segments,
            config.chunking.align_chunk_size,
            config.chunking.align_overlap,
            mapper,
            |partials| partials,
        )
        .await;
    ctx.record_report(report);

    let cleaned = reduce(
        partials,
        meeting,
        &config.report,
        config.chunking.slide_context_window_sec,
    )?;
    if cleaned.timeline.is_empty() {
        return Err(Error::stage(STAGE, "cleaned timeline is empty"));
    }
    info!(
        timeline = cleaned.timeline.len(),
        slides = cleaned.slides.len(),
        attendees = cleaned.meeting_meta.attendees.len(),
        "Clean & align finished"
    );
    ctx.artifacts.save_stage(CLEANED_FILE, &cleaned).await;
    Ok(cleaned)
}

/// Capture as sent to the model: a short snippet instead of the full OCR body.
#[derive(Debug, Serialize)]
struct CompactCapture<'a> {
    capture_index: u32,
    timestamp_hms: &'a str,
    timestamp_sec: f64,
    image_path: &'a str,
    has_table: bool,
    has_figure: bool,
    title: String,
    ocr_text: String,
}

struct AlignMapper {
    gateway: Arc<ModelGateway>,
    captures: Vec<Capture>,
    meeting_json: String,
    capture_window_sec: f64,
    max_captures: usize,
    snippet_chars: usize,
    slide_window_sec: f64,
}

impl AlignMapper {
    fn new(
        gateway: Arc<ModelGateway>,
        config: &PipelineConfig,
        captures: &[Capture],
        meeting: &MeetingConfig,
    ) -> Result<Self> {
        Ok(Self {
            gateway,
            captures: captures.to_vec(),
            meeting_json: serde_json::to_string(meeting)?,
            capture_window_sec: config.chunking.align_capture_window_sec,
            max_captures: config.chunking.align_max_captures.max(1),
            snippet_chars: config.chunking.ocr_snippet_chars,
            slide_window_sec: config.chunking.slide_context_window_sec,
        })
    }

    /// Captures within the window around the unit, nearest to its midpoint first.
    fn nearby_captures(&self, segments: &[Segment]) -> Vec<&Capture> {
        let (Some(first), Some(last)) = (segments.first(), segments.last()) else {
            return Vec::new();
        };
        let (start, end) = (first.start, last.end.max(first.start));
        let in_window: Vec<&Capture> = self
            .captures
            .iter()
            .filter(|c| {
                (start - self.capture_window_sec) <= c.timestamp_sec
                    && c.timestamp_sec <= (end + self.capture_window_sec)
            })
            .collect();
        let readable: Vec<&Capture> = in_window.iter().copied().filter(|c| !c.is_skipped()).collect();
        let mut chosen = if readable.is_empty() { in_window } else { readable };

        let mid = (start + end) / 2.0;
        chosen.sort_by(|a, b| {
            (a.timestamp_sec - mid)
                .abs()
                .total_cmp(&(b.timestamp_sec - mid).abs())
        });
        chosen.truncate(self.max_captures);
        chosen
    }

    fn compact<'a>(&self, capture: &'a Capture) -> CompactCapture<'a> {
        let lowered = capture.ocr_text.to_lowercase();
        let has_table = lowered.contains("<table");
        let title = first_line(&capture.ocr_text);
        let plain = collapse_whitespace(&strip_html(&capture.ocr_text));
        let mut snippet = truncate_chars(&plain, self.snippet_chars);
        if snippet.len() < plain.len() {
            snippet.push_str("...");
        }
        // Table bodies are heavy and add little to alignment.
        if has_table && !title.is_empty() {
            snippet = truncate_chars(title, self.snippet_chars);
        }
        CompactCapture {
            capture_index: capture.capture_index,
            timestamp_hms: &capture.timestamp_hms,
            timestamp_sec: capture.timestamp_sec,
            image_path: &capture.image_path,
            has_table,
            has_figure: lowered.contains("<figure"),
            title: truncate_chars(title, 220),
            ocr_text: snippet,
        }
    }
}

#[async_trait]
impl ChunkMapper<Segment> for AlignMapper {
    type Output = CleanedTranscript;

    async fn map(&self, unit: &WorkUnit<Segment>) -> Result<CleanedTranscript> {
        let captures: Vec<CompactCapture<'_>> = self
            .nearby_captures(&unit.items)
            .into_iter()
            .map(|c| self.compact(c))
            .collect();
        let transcript = serde_json::to_string(&serde_json::json!({ "segments": unit.items }))?;
        let captures = serde_json::to_string(&serde_json::json!({ "captures": captures }))?;
        let user = fill_template(
            prompts::ALIGN_USER,
            &[
                ("TRANSCRIPT", transcript.as_str()),
                ("CAPTURES", captures.as_str()),
                ("MEETING_CONFIG", self.meeting_json.as_str()),
            ],
        );
        Ok(self
            .gateway
            .call_typed::<CleanedTranscript>(&unit.tag, prompts::ALIGN_SYSTEM, &user)
            .await?)
    }

    fn fallback(&self, unit: &WorkUnit<Segment>) -> CleanedTranscript {
        let slides: Vec<Slide> = self
            .nearby_captures(&unit.items)
            .into_iter()
            .map(Slide::from_capture)
            .collect();
        let timeline = unit
            .items
            .iter()
            .filter_map(|seg| {
                let text = collapse_whitespace(&remove_stutter(&seg.text));
                if text.is_empty() {
                    return None;
                }
                Some(TimelineRow {
                    timestamp_sec: seg.start,
                    timestamp_hms: sec_to_hms(seg.start),
                    speaker: if seg.speaker.is_empty() {
                        UNKNOWN_SPEAKER.to_string()
                    } else {
                        seg.speaker.clone()
                    },
                    slide_context: nearest_slide_context(seg.start, &slides, self.slide_window_sec),
                    text,
                })
            })
            .collect();
        CleanedTranscript {
            meeting_meta: MeetingMeta::default(),
            timeline,
            slides,
        }
    }
}

impl PartialMerge for CleanedTranscript {
    fn merge(parts: Vec<Self>) -> Self {
        let mut out = CleanedTranscript::default();
        for part in parts {
            if out.meeting_meta.is_empty() {
                out.meeting_meta = part.meeting_meta;
            }
            out.timeline.extend(part.timeline);
            out.slides.extend(part.slides);
        }
        out.slides = dedup_slides(out.slides);
        out.timeline = dedup_rows(out.timeline);
        out
    }
}

/// Fold the per-chunk partials into the final cleaned transcript.
pub fn reduce(
    partials: Vec<CleanedTranscript>,
    meeting: &MeetingConfig,
    defaults: &ReportDefaults,
    slide_window_sec: f64,
) -> Result<CleanedTranscript> {
    if partials.is_empty() {
        return Err(Error::stage(STAGE, "no chunk produced output"));
    }
    let merged = CleanedTranscript::merge(partials);
    let meeting_meta = normalize_meeting_meta(merged.meeting_meta, meeting, defaults);
    let slides = merged.slides;

    let mut rows: Vec<TimelineRow> = merged
        .timeline
        .into_iter()
        .filter_map(|mut row| {
            row.text = row.text.trim().to_string();
            if row.text.is_empty() {
                return None;
            }
            row.timestamp_sec = row.timestamp_sec.max(0.0);
            row.timestamp_hms = sec_to_hms(row.timestamp_sec);
            if row.speaker.trim().is_empty() {
                row.speaker = UNKNOWN_SPEAKER.to_string();
            }
            Some(row)
        })
        .collect();
    rows.sort_by(|a, b| a.timestamp_sec.total_cmp(&b.timestamp_sec));

    let mut timeline = merge_turns(rows);
    for row in timeline.iter_mut().filter(|r| r.slide_context.is_none()) {
        row.slide_context = nearest_slide_context(row.timestamp_sec, &slides, slide_window_sec);
    }

    Ok(CleanedTranscript {
        meeting_meta,
        timeline,
        slides,
    })
}

/// Merge consecutive rows of the same speaker that start less than
/// [`MERGE_GAP_SEC`] after the row they would join.
pub fn merge_turns(rows: Vec<TimelineRow>) -> Vec<TimelineRow> {
    let mut merged: Vec<TimelineRow> = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(prev) = merged.last_mut()
            && prev.speaker == row.speaker
            && row.timestamp_sec - prev.timestamp_sec < MERGE_GAP_SEC
        {
            prev.text = format!("{} {}", prev.text, row.text).trim().to_string();
            if prev.slide_context.is_none() {
                prev.slide_context = row.slide_context;
            }
            continue;
        }
        merged.push(row);
    }
    merged
}

fn dedup_slides(slides: Vec<Slide>) -> Vec<Slide> {
    let mut seen = HashSet::new();
    slides
        .into_iter()
        .filter(|s| seen.insert((s.timestamp_hms.clone(), s.image_path.clone())))
        .collect()
}

fn dedup_rows(rows: Vec<TimelineRow>) -> Vec<TimelineRow> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|r| {
            let ts = format!("{:.3}", r.timestamp_sec);
            seen.insert(content_hash(&[&ts, r.speaker.trim(), r.text.trim()]))
        })
        .collect()
}

/// OCR text of the slide closest to `ts`, if one lies within `window_sec`.
pub fn nearest_slide_context(ts: f64, slides: &[Slide], window_sec: f64) -> Option<String> {
    let ts = ts.max(0.0) as u64;
    slides
        .iter()
        .map(|s| (s.seconds().abs_diff(ts), s))
        .filter(|(d, _)| (*d as f64) <= window_sec)
        .min_by_key(|(d, _)| *d)
        .map(|(_, s)| s.ocr_text.clone())
        .filter(|text| !text.is_empty())
}

/// Fill meeting metadata defaults and derive attendees from the numbered
/// `MEETING_INFO` lines when the model returned none.
pub fn normalize_meeting_meta(
    mut meta: MeetingMeta,
    meeting: &MeetingConfig,
    defaults: &ReportDefaults,
) -> MeetingMeta {
    if meta.title.is_empty() {
        meta.title = defaults.title.clone();
    }
    if meta.platform.is_empty() {
        meta.platform = defaults.platform.clone();
    }
    if meta.company.is_empty() {
        meta.company = defaults.company.clone();
    }
    if meta.attendees.is_empty() {
        meta.attendees = parse_attendees(&meeting.meeting_info);
    }
    meta
}

/// Parse lines like `3. Jane Doe<TAB>Engineering`.
pub fn parse_attendees(meeting_info: &str) -> Vec<Attendee> {
    meeting_info
        .lines()
        .filter_map(|line| {
            let caps = ATTENDEE_LINE_RE.captures(line.trim())?;
            let raw = caps.get(1)?.as_str();
            let parts: Vec<&str> = ATTENDEE_SPLIT_RE.split(raw).map(str::trim).collect();
            let name = parts.first().copied().unwrap_or(raw).trim().to_string();
            let department = if parts.len() > 1 {
                parts.last().copied().unwrap_or_default().to_string()
            } else {
                String::new()
            };
            Some(Attendee {
                name,
                department,
                kind: "main".to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ProviderError;
    use crate::gateway::testing::ScriptedProvider;
    use crate::pipeline::context::testing::stage_context;
    use rstest::rstest;

    fn row(ts: f64, speaker: &str, text: &str) -> TimelineRow {
        TimelineRow {
            timestamp_sec: ts,
            timestamp_hms: sec_to_hms(ts),
            speaker: speaker.to_string(),
            text: text.to_string(),
            slide_context: None,
        }
    }

    fn slide(hms: &str, text: &str) -> Slide {
        Slide {
            timestamp_hms: hms.to_string(),
            ocr_text: text.to_string(),
            ..Slide::default()
        }
    }

    #[rstest]
    #[case(2.0, 1)]
    #[case(2.9, 1)]
    #[case(3.0, 2)]
    #[case(5.0, 2)]
    fn test_same_speaker_merge_gap(#[case] gap: f64, #[case] expected: usize) {
        let rows = vec![row(10.0, "A", "first"), row(10.0 + gap, "A", "second")];
        let merged = merge_turns(rows);
        assert_eq!(merged.len(), expected);
        if expected == 1 {
            assert_eq!(merged[0].text, "first second");
        }
    }

    #[test]
    fn test_different_speakers_never_merge() {
        let merged = merge_turns(vec![row(1.0, "A", "x"), row(2.0, "B", "y")]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_nearest_slide_within_window() {
        let slides = vec![slide("00:01:00", "far"), slide("00:02:00", "near")];
        assert_eq!(nearest_slide_context(110.0, &slides, 60.0).as_deref(), Some("near"));
        assert_eq!(nearest_slide_context(500.0, &slides, 60.0), None);
    }

    #[test]
    fn test_parse_attendees() {
        let info = "Meeting of the board\n1. Ann Smith\tSales\n2. Bob  Ops  Lead\n3. Carol\nnot numbered";
        let attendees = parse_attendees(info);
        assert_eq!(attendees.len(), 3);
        assert_eq!(attendees[0].name, "Ann Smith");
        assert_eq!(attendees[0].department, "Sales");
        assert_eq!(attendees[1].department, "Lead");
        assert_eq!(attendees[2].department, "");
    }

    #[test]
    fn test_reduce_orders_dedups_and_attaches_context() {
        let first = CleanedTranscript {
            meeting_meta: MeetingMeta::default(),
            timeline: vec![row(50.0, "B", "later"), row(10.0, "A", "hello")],
            slides: vec![slide("00:00:20", "Agenda slide")],
        };
        let second = CleanedTranscript {
            meeting_meta: MeetingMeta {
                title: "Board".to_string(),
                ..MeetingMeta::default()
            },
            timeline: vec![row(50.0, "B", "later"), row(11.0, "A", "again")],
            slides: vec![slide("00:00:20", "Agenda slide")],
        };
        let meeting = MeetingConfig {
            meeting_info: "1. Ann  Sales".to_string(),
            agenda_text: String::new(),
        };

        let cleaned = reduce(vec![first, second], &meeting, &ReportDefaults::default(), 60.0).unwrap();
        assert_eq!(cleaned.meeting_meta.title, "Board");
        assert_eq!(cleaned.meeting_meta.platform, "ZOOM");
        assert_eq!(cleaned.meeting_meta.attendees.len(), 1);
        assert_eq!(cleaned.slides.len(), 1);
        assert_eq!(cleaned.timeline.len(), 2);
        assert_eq!(cleaned.timeline[0].text, "hello again");
        assert_eq!(cleaned.timeline[0].slide_context.as_deref(), Some("Agenda slide"));
        assert_eq!(cleaned.timeline[1].timestamp_hms, "00:00:50");
    }

    #[test]
    fn test_reduce_without_partials_fails() {
        let err = reduce(Vec::new(), &MeetingConfig::default(), &ReportDefaults::default(), 60.0);
        assert!(err.is_err());
    }

    fn context(provider: ScriptedProvider, dir: &std::path::Path) -> StageContext {
        let mut config = PipelineConfig::default();
        config.chunking.align_chunk_size = 2;
        config.chunking.align_overlap = 0;
        stage_context(provider, None, config, dir)
    }

    fn segment(start: f64, speaker: &str, text: &str) -> Segment {
        Segment {
            speaker: speaker.to_string(),
            start,
            end: start + 1.0,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_failing_model_falls_back_per_segment() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::always("p", Err(ProviderError::Transport("down".into())));
        let ctx = context(provider, dir.path());
        let segments = vec![
            segment(0.0, "A", "we we need the plan"),
            segment(10.0, "B", "agreed"),
            segment(20.0, "A", "next"),
        ];
        let captures = vec![Capture {
            capture_index: 1,
            timestamp_sec: 15.0,
            timestamp_hms: "00:00:15".to_string(),
            ocr_text: "Budget slide".to_string(),
            ocr_file_size_bytes: 50_000,
            ..Capture::default()
        }];

        let cleaned = run(&ctx, &segments, &captures, &MeetingConfig::default())
            .await
            .unwrap();
        assert_eq!(cleaned.timeline.len(), 3);
        assert_eq!(cleaned.timeline[0].text, "we need the plan");
        assert_eq!(cleaned.timeline[1].slide_context.as_deref(), Some("Budget slide"));
        assert_eq!(cleaned.slides.len(), 1);

        let reports = ctx.reports();
        assert_eq!(reports[0].chunks, 2);
        assert_eq!(reports[0].fallbacks, 3);
    }

    #[tokio::test]
    async fn test_model_output_is_used_when_valid() {
        let dir = tempfile::tempdir().unwrap();
        let response = serde_json::json!({
            "meeting_meta": {"title": "Weekly"},
            "timeline": [{"timestamp_sec": 0, "speaker": "A", "text": "cleaned"}],
            "slides": []
        })
        .to_string();
        let provider = ScriptedProvider::always("p", Ok(response));
        let ctx = context(provider, dir.path());

        let cleaned = run(&ctx, &[segment(0.0, "A", "raw raw")], &[], &MeetingConfig::default())
            .await
            .unwrap();
        assert_eq!(cleaned.meeting_meta.title, "Weekly");
        assert_eq!(cleaned.timeline[0].text, "cleaned");
        assert_eq!(ctx.reports()[0].direct, 1);
    }
}
