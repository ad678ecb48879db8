//! Input loading: transcript, meeting config, capture manifest and the
//! optional resume artifact.

use std::path::Path;

use serde_json::Value;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::pipeline::artifacts::CLEANED_FILE;
use crate::pipeline::state::{
    Capture, CleanedTranscript, MeetingConfig, Segment, UNKNOWN_SPEAKER, records_from_json,
};
use crate::utils::fs::read_json;
use crate::{Error, Result};

#[derive(Debug, Default)]
pub struct LoadedInputs {
    pub segments: Vec<Segment>,
    pub captures: Vec<Capture>,
    pub meeting: MeetingConfig,
    /// Clean & align output of an earlier run, when resuming.
    pub resumed: Option<CleanedTranscript>,
}

pub async fn run(config: &PipelineConfig) -> Result<LoadedInputs> {
    let paths = &config.paths;

    let raw: Value = read_json(&paths.transcript)
        .await
        .map_err(|e| Error::input(format!("cannot read transcript: {e}")))?;
    let segments = normalize_segments(records_from_json(raw, "segments"));
    if segments.is_empty() {
        return Err(Error::input(format!(
            "transcript {} has no usable segments",
            paths.transcript.display()
        )));
    }

    let meeting = load_meeting_config(&paths.config).await?;

    let captures = match &paths.captures {
        Some(path) if config.images.include_ocr => load_captures(path).await?,
        _ => Vec::new(),
    };

    let resumed = match &paths.resume_artifact_dir {
        Some(dir) => {
            let path = dir.join(CLEANED_FILE);
            if !path.is_file() {
                return Err(Error::input(format!(
                    "resume artifact directory is missing {}",
                    path.display()
                )));
            }
            let cleaned: CleanedTranscript = read_json(&path).await?;
            info!(
                source = %dir.display(),
                timeline = cleaned.timeline.len(),
                slides = cleaned.slides.len(),
                "Resuming from saved clean & align output"
            );
            Some(cleaned)
        }
        None => None,
    };

    info!(
        segments = segments.len(),
        captures = captures.len(),
        agenda_lines = meeting.agenda_lines().len(),
        "Inputs loaded"
    );
    Ok(LoadedInputs {
        segments,
        captures,
        meeting,
        resumed,
    })
}

/// Default speakers, trim text, drop blank turns, and keep `end >= start`.
pub fn normalize_segments(segments: Vec<Segment>) -> Vec<Segment> {
    segments
        .into_iter()
        .filter_map(|mut seg| {
            seg.text = seg.text.trim().to_string();
            if seg.text.is_empty() {
                return None;
            }
            if seg.speaker.trim().is_empty() {
                seg.speaker = UNKNOWN_SPEAKER.to_string();
            }
            seg.start = seg.start.max(0.0);
            seg.end = seg.end.max(seg.start);
            Some(seg)
        })
        .collect()
}

async fn load_meeting_config(path: &Path) -> Result<MeetingConfig> {
    if !path.is_file() {
        warn!(path = %path.display(), "Meeting config not found, continuing without it");
        return Ok(MeetingConfig::default());
    }
    let raw: Value = read_json(path).await?;
    if !raw.is_object() {
        return Err(Error::input(format!(
            "meeting config {} must be a JSON object",
            path.display()
        )));
    }
    Ok(serde_json::from_value(raw)?)
}

async fn load_captures(path: &Path) -> Result<Vec<Capture>> {
    if !path.is_file() {
        warn!(path = %path.display(), "Capture manifest not found, continuing without captures");
        return Ok(Vec::new());
    }
    let raw: Value = read_json(path).await?;
    let mut captures: Vec<Capture> = records_from_json(raw, "captures");
    for (position, capture) in captures.iter_mut().enumerate() {
        capture.normalize(position);
    }
    captures.sort_by_key(|c| c.capture_index);
    Ok(captures)
}
