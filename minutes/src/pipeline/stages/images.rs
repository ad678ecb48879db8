//! Image intelligence: classify slide captures, match them to topics, rank
//! them for insertion and group the keepers per topic.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use base64::Engine as _;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ContentType, HeuristicConfig, ImageEmbedMode, PipelineConfig, RenderAs};
use crate::gateway::ModelGateway;
use crate::pipeline::artifacts::IMAGES_FILE;
use crate::pipeline::context::StageContext;
use crate::pipeline::prompts;
use crate::pipeline::state::{
    Capture, ImageAnalysis, ImageManifestItem, ImageReport, ImageStatistics, KnowledgeGraph, Topic,
    UNMAPPED_TOPIC, first_line,
};
use crate::recovery::{ChunkMapper, PartialMerge, WorkUnit};
use crate::utils::text::{
    collapse_whitespace, cosine, fill_template, keyword_tokens, strip_html, truncate_chars,
};
use crate::utils::time::sec_to_hms;
use crate::Result;

const STAGE: &str = "images";

/// OCR characters sent to the model per capture.
const MODEL_OCR_CHARS: usize = 1500;
const SUMMARY_CHARS: usize = 120;

static TABLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<table.*?</table>").unwrap());

pub async fn run(
    ctx: &StageContext,
    captures: &[Capture],
    knowledge: &KnowledgeGraph,
) -> Result<Option<ImageReport>> {
    let config = &ctx.config;
    if !config.images.insert_enabled || !config.images.include_ocr || captures.is_empty() {
        info!(
            insert_enabled = config.images.insert_enabled,
            include_ocr = config.images.include_ocr,
            captures = captures.len(),
            "Image analysis skipped"
        );
        return Ok(None);
    }
    let manifest_dir = config
        .paths
        .captures
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf);
    let resolver = PathResolver {
        base_dir: config.images.base_dir.clone(),
        manifest_dir,
    };

    let mut sized = Vec::with_capacity(captures.len());
    for capture in captures {
        let mut capture = capture.clone();
        if capture.ocr_file_size_bytes == 0
            && let Some(path) = resolver.resolve(&capture.image_path).await
            && let Ok(meta) = tokio::fs::metadata(&path).await
        {
            capture.ocr_file_size_bytes = meta.len();
        }
        sized.push(capture);
    }
    let (candidates, prefiltered) = prefilter(sized, &config.heuristics);
    debug!(candidates = candidates.len(), prefiltered, "Captures pre-filtered");

    let mut analysis = if candidates.is_empty() {
        ImageAnalysis::default()
    } else {
        let mapper = Arc::new(ImageMapper::new(ctx.gateway.clone(), config, &knowledge.topics)?);
        let (partials, report) = ctx
            .executor
            .map_reduce(
                STAGE,
                &candidates,
                config.chunking.image_chunk_size,
                0,
                mapper,
                |partials| partials,
            )
            .await;
        ctx.record_report(report);
        reduce(&ctx.gateway, partials).await
    };

    analysis.statistics.total = captures.len() as u64;
    analysis.statistics.filtered += prefiltered as u64;
    if prefiltered > 0 {
        *analysis
            .statistics
            .by_type
            .entry(ContentType::Skipped.to_string())
            .or_default() += prefiltered as u64;
    }

    let mut manifest = reconcile(analysis.image_manifest, &candidates);
    rescore_topics(&ctx.gateway, &mut manifest, &knowledge.topics, config).await;
    attach_images(&mut manifest, &resolver, config.images.embed_mode).await;

    let image_by_topic = group_by_topic(&manifest, config);
    info!(
        manifest = manifest.len(),
        topics_with_images = image_by_topic.len(),
        inserted = image_by_topic.values().map(Vec::len).sum::<usize>(),
        "Image analysis finished"
    );
    let report = ImageReport {
        image_manifest: manifest,
        statistics: analysis.statistics,
        image_by_topic,
    };
    ctx.artifacts.save_stage(IMAGES_FILE, &report).await;
    Ok(Some(report))
}

/// Drop captures that cannot carry content: skipped by OCR, too small, or
/// without text. Returns the survivors and how many were dropped.
pub fn prefilter(captures: Vec<Capture>, heuristics: &HeuristicConfig) -> (Vec<Capture>, usize) {
    let total = captures.len();
    let kept: Vec<Capture> = captures
        .into_iter()
        .filter(|c| {
            !c.is_skipped()
                && c.ocr_file_size_bytes >= heuristics.min_capture_bytes
                && !c.ocr_text.trim().is_empty()
        })
        .collect();
    let dropped = total - kept.len();
    (kept, dropped)
}

#[derive(Debug, Serialize)]
struct CompactTopic<'a> {
    id: &'a str,
    name: &'a str,
    start_timestamp: &'a str,
    end_timestamp: &'a str,
}

#[derive(Debug, Serialize)]
struct CompactCapture<'a> {
    capture_index: u32,
    timestamp_hms: &'a str,
    timestamp_sec: f64,
    image_path: &'a str,
    ocr_file_size_bytes: u64,
    ocr_text: String,
}

/// Time span and keywords of one topic, for local matching.
#[derive(Debug, Clone)]
struct TopicWindow {
    id: String,
    name: String,
    start: u64,
    end: u64,
    keywords: HashSet<String>,
}

struct ImageMapper {
    gateway: Arc<ModelGateway>,
    heuristics: HeuristicConfig,
    topics: Vec<TopicWindow>,
    topics_json: String,
}

impl ImageMapper {
    fn new(gateway: Arc<ModelGateway>, config: &PipelineConfig, topics: &[Topic]) -> Result<Self> {
        let compact: Vec<CompactTopic<'_>> = topics
            .iter()
            .map(|t| CompactTopic {
                id: &t.id,
                name: &t.name,
                start_timestamp: &t.start_timestamp,
                end_timestamp: &t.end_timestamp,
            })
            .collect();
        Ok(Self {
            gateway,
            heuristics: config.heuristics.clone(),
            topics: topics
                .iter()
                .map(|t| TopicWindow {
                    id: t.id.clone(),
                    name: t.name.clone(),
                    start: t.start_sec(),
                    end: t.end_sec(),
                    keywords: keyword_tokens(&t.embedding_text()).into_iter().collect(),
                })
                .collect(),
            topics_json: serde_json::to_string(&compact)?,
        })
    }

    /// Topic whose time range holds the capture, else the best keyword overlap.
    fn match_topic(&self, capture: &Capture) -> Option<&TopicWindow> {
        let ts = capture.timestamp_sec.max(0.0) as u64;
        if let Some(topic) = self.topics.iter().find(|t| t.start <= ts && ts <= t.end) {
            return Some(topic);
        }
        let words = keyword_tokens(&strip_html(&capture.ocr_text));
        self.topics
            .iter()
            .map(|t| (t, words.iter().filter(|w| t.keywords.contains(*w)).count()))
            .filter(|(_, overlap)| *overlap > 0)
            .max_by_key(|(_, overlap)| *overlap)
            .map(|(t, _)| t)
    }

    fn classify(&self, capture: &Capture) -> ImageManifestItem {
        let content_type = self.heuristics.classify(&capture.ocr_text);
        let plain = collapse_whitespace(&strip_html(first_line(&capture.ocr_text)));
        let summary = truncate_chars(&plain, SUMMARY_CHARS);
        let table_html = if content_type == ContentType::DataTable {
            TABLE_RE
                .find(&capture.ocr_text)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        } else {
            String::new()
        };
        let topic = self.match_topic(capture);
        ImageManifestItem {
            capture_index: capture.capture_index,
            timestamp_hms: capture.timestamp_hms.clone(),
            timestamp_sec: capture.timestamp_sec,
            image_path: capture.image_path.clone(),
            content_type,
            caption: truncate_chars(&format!("Slide about {summary}"), self.heuristics.caption_chars),
            content_summary: summary,
            topic_id: topic.map(|t| t.id.clone()).unwrap_or_default(),
            topic_name: topic.map(|t| t.name.clone()).unwrap_or_default(),
            insertion_priority: u32::from(self.heuristics.priority(content_type)),
            special_pattern: None,
            pair_index: None,
            render_as: self.heuristics.render_mode(content_type),
            table_html,
            ocr_file_size_bytes: capture.ocr_file_size_bytes,
            model_image_path: None,
            resolved_image_path: None,
            image_base64: None,
            before_base64: None,
            after_base64: None,
        }
    }
}

#[async_trait]
impl ChunkMapper<Capture> for ImageMapper {
    type Output = ImageAnalysis;

    async fn map(&self, unit: &WorkUnit<Capture>) -> Result<ImageAnalysis> {
        let captures: Vec<CompactCapture<'_>> = unit
            .items
            .iter()
            .map(|c| CompactCapture {
                capture_index: c.capture_index,
                timestamp_hms: &c.timestamp_hms,
                timestamp_sec: c.timestamp_sec,
                image_path: &c.image_path,
                ocr_file_size_bytes: c.ocr_file_size_bytes,
                ocr_text: truncate_chars(&c.ocr_text, MODEL_OCR_CHARS),
            })
            .collect();
        let captures = serde_json::to_string(&captures)?;
        let user = fill_template(
            prompts::IMAGES_USER,
            &[("CAPTURES", captures.as_str()), ("TOPICS", self.topics_json.as_str())],
        );
        Ok(self
            .gateway
            .call_typed::<ImageAnalysis>(&unit.tag, prompts::IMAGES_SYSTEM, &user)
            .await?)
    }

    fn fallback(&self, unit: &WorkUnit<Capture>) -> ImageAnalysis {
        let manifest: Vec<ImageManifestItem> = unit.items.iter().map(|c| self.classify(c)).collect();
        let mut by_type = BTreeMap::new();
        for item in &manifest {
            *by_type.entry(item.content_type.to_string()).or_default() += 1;
        }
        ImageAnalysis {
            statistics: ImageStatistics {
                total: manifest.len() as u64,
                by_type,
                ..ImageStatistics::default()
            },
            image_manifest: manifest,
        }
    }
}

impl PartialMerge for ImageAnalysis {
    fn merge(parts: Vec<Self>) -> Self {
        let mut manifest: Vec<ImageManifestItem> = Vec::new();
        let mut by_index: HashMap<u32, usize> = HashMap::new();
        let mut stats = ImageStatistics::default();
        let mut pair_keys = HashSet::new();
        let mut series_keys = HashSet::new();

        for part in parts {
            for item in part.image_manifest {
                if item.capture_index == 0 {
                    manifest.push(item);
                    continue;
                }
                match by_index.get(&item.capture_index) {
                    Some(&pos) => {
                        if item.insertion_priority > manifest[pos].insertion_priority {
                            manifest[pos] = item;
                        }
                    }
                    None => {
                        by_index.insert(item.capture_index, manifest.len());
                        manifest.push(item);
                    }
                }
            }
            let s = part.statistics;
            stats.total += s.total;
            stats.filtered += s.filtered;
            for (kind, n) in s.by_type {
                *stats.by_type.entry(kind).or_default() += n;
            }
            for pair in s.before_after_pairs {
                if pair_keys.insert(pair.to_string()) {
                    stats.before_after_pairs.push(pair);
                }
            }
            for series in s.data_series {
                if series_keys.insert(series.to_string()) {
                    stats.data_series.push(series);
                }
            }
        }

        manifest.sort_by_key(|item| item.capture_index);
        ImageAnalysis {
            image_manifest: manifest,
            statistics: stats,
        }
    }
}

async fn reduce(gateway: &ModelGateway, partials: Vec<ImageAnalysis>) -> ImageAnalysis {
    if partials.len() <= 1 {
        return ImageAnalysis::merge(partials);
    }
    let merged_by_model = match serde_json::to_string(&partials) {
        Ok(json) => {
            let user = fill_template(prompts::IMAGES_REDUCE_USER, &[("PARTIALS", json.as_str())]);
            gateway
                .call_typed::<ImageAnalysis>("images#reduce", prompts::IMAGES_REDUCE_SYSTEM, &user)
                .await
                .map_err(crate::Error::from)
        }
        Err(e) => Err(e.into()),
    };
    match merged_by_model {
        Ok(analysis) if !analysis.image_manifest.is_empty() => ImageAnalysis::merge(vec![analysis]),
        Ok(_) => {
            warn!("Image reduce returned an empty manifest, merging partials locally");
            ImageAnalysis::merge(partials)
        }
        Err(e) => {
            warn!(error = %e, "Image reduce failed, merging partials locally");
            ImageAnalysis::merge(partials)
        }
    }
}

/// Tie every manifest entry back to its capture. The capture manifest is
/// authoritative for path, timestamps and size; entries naming an unknown
/// capture are dropped.
pub fn reconcile(manifest: Vec<ImageManifestItem>, captures: &[Capture]) -> Vec<ImageManifestItem> {
    let by_index: HashMap<u32, &Capture> = captures.iter().map(|c| (c.capture_index, c)).collect();
    manifest
        .into_iter()
        .filter_map(|mut item| {
            let Some(capture) = by_index.get(&item.capture_index) else {
                debug!(capture_index = item.capture_index, "Dropping manifest entry for unknown capture");
                return None;
            };
            if !item.image_path.is_empty() && item.image_path != capture.image_path {
                item.model_image_path = Some(std::mem::take(&mut item.image_path));
            }
            item.image_path = capture.image_path.clone();
            item.timestamp_sec = capture.timestamp_sec;
            item.timestamp_hms = if capture.timestamp_hms.is_empty() {
                sec_to_hms(capture.timestamp_sec)
            } else {
                capture.timestamp_hms.clone()
            };
            if item.ocr_file_size_bytes == 0 {
                item.ocr_file_size_bytes = capture.ocr_file_size_bytes;
            }
            item.insertion_priority = item.insertion_priority.clamp(1, 5);
            if item.content_type == ContentType::DataTable && item.table_html.is_empty() {
                item.table_html = TABLE_RE
                    .find(&capture.ocr_text)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default();
            }
            Some(item)
        })
        .collect()
}

/// Move captures to the most similar topic by OCR embedding when the match
/// clears the similarity threshold. Embedding failures keep the current
/// assignment.
async fn rescore_topics(
    gateway: &ModelGateway,
    manifest: &mut [ImageManifestItem],
    topics: &[Topic],
    config: &PipelineConfig,
) {
    if manifest.is_empty() || topics.iter().all(|t| t.embedding.is_empty()) {
        return;
    }
    let texts: Vec<String> = manifest
        .iter()
        .map(|item| {
            let text = if item.content_summary.is_empty() {
                &item.caption
            } else {
                &item.content_summary
            };
            truncate_chars(text, config.images.embed_text_chars)
        })
        .collect();
    let vectors = match gateway.embed(&texts).await {
        Ok(v) if v.len() == manifest.len() => v,
        Ok(v) => {
            warn!(expected = manifest.len(), got = v.len(), "Capture embedding count mismatch");
            return;
        }
        Err(e) => {
            warn!(error = %e, "Capture embedding failed, keeping topic assignments");
            return;
        }
    };
    let threshold = config.images.similarity_threshold;
    for (item, vector) in manifest.iter_mut().zip(vectors) {
        if let Some((topic, score)) = best_topic(&vector, topics)
            && score > threshold
            && topic.id != item.topic_id
        {
            debug!(
                capture_index = item.capture_index,
                from = %item.topic_id,
                to = %topic.id,
                score,
                "Reassigning capture topic"
            );
            item.topic_id = topic.id.clone();
            item.topic_name = topic.name.clone();
        }
    }
}

fn best_topic<'a>(vector: &[f32], topics: &'a [Topic]) -> Option<(&'a Topic, f32)> {
    topics
        .iter()
        .filter(|t| !t.embedding.is_empty())
        .map(|t| (t, cosine(vector, &t.embedding)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

/// Locates capture files that may have moved since the manifest was written.
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    pub base_dir: Option<PathBuf>,
    pub manifest_dir: Option<PathBuf>,
}

impl PathResolver {
    fn candidates(&self, raw: &str) -> Vec<PathBuf> {
        let raw_path = PathBuf::from(raw);
        let mut out = vec![raw_path.clone()];
        let stripped = raw.strip_prefix("output/").map(PathBuf::from);
        if let Some(base) = &self.base_dir {
            out.push(base.join(&raw_path));
            if let Some(stripped) = &stripped {
                out.push(base.join(stripped));
            }
        }
        if let Some(stripped) = stripped {
            out.push(stripped);
        }
        if let (Some(dir), Some(name)) = (&self.manifest_dir, raw_path.file_name()) {
            out.push(dir.join(name));
            out.push(dir.join("captures").join(name));
        }
        out
    }

    /// First existing file among the candidate locations. Remote URLs are
    /// never resolved.
    pub async fn resolve(&self, raw: &str) -> Option<PathBuf> {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with("http://") || raw.starts_with("https://") {
            return None;
        }
        for candidate in self.candidates(raw) {
            if tokio::fs::metadata(&candidate)
                .await
                .is_ok_and(|m| m.is_file())
            {
                return Some(candidate);
            }
        }
        None
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "image/png",
    }
}

async fn data_uri(path: &Path) -> Option<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(format!(
            "data:{};base64,{}",
            mime_for(path),
            base64::engine::general_purpose::STANDARD.encode(bytes)
        )),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read capture image");
            None
        }
    }
}

/// Resolve image files and, in base64 mode, inline the ones shown as images.
async fn attach_images(manifest: &mut [ImageManifestItem], resolver: &PathResolver, mode: ImageEmbedMode) {
    let mut inline: HashMap<u32, String> = HashMap::new();
    for item in manifest.iter_mut() {
        let Some(path) = resolver.resolve(&item.image_path).await else {
            continue;
        };
        item.resolved_image_path = Some(path.display().to_string());
        if mode == ImageEmbedMode::Base64
            && (item.render_as.shows_image() || item.is_before_after())
            && let Some(uri) = data_uri(&path).await
        {
            inline.insert(item.capture_index, uri.clone());
            item.image_base64 = Some(uri);
        }
    }

    let timestamps: HashMap<u32, f64> = manifest.iter().map(|i| (i.capture_index, i.timestamp_sec)).collect();
    for item in manifest.iter_mut().filter(|i| i.is_before_after()) {
        let Some(partner) = item.pair_index else {
            continue;
        };
        let own = inline.get(&item.capture_index).cloned();
        let other = inline.get(&partner).cloned();
        let partner_ts = timestamps.get(&partner).copied().unwrap_or(f64::MAX);
        let (before, after) = if item.timestamp_sec <= partner_ts {
            (own, other)
        } else {
            (other, own)
        };
        item.before_base64 = before;
        item.after_base64 = after;
        item.render_as = RenderAs::BeforeAfter;
    }
}

/// Captures worth inserting, per topic, best first.
pub fn group_by_topic(
    manifest: &[ImageManifestItem],
    config: &PipelineConfig,
) -> BTreeMap<String, Vec<ImageManifestItem>> {
    let min_priority = u32::from(config.heuristics.min_insert_priority);
    let min_bytes = config.min_image_bytes();
    let mut groups: BTreeMap<String, Vec<ImageManifestItem>> = BTreeMap::new();
    for item in manifest {
        if item.content_type == ContentType::Skipped
            || item.insertion_priority < min_priority
            || item.ocr_file_size_bytes < min_bytes
        {
            continue;
        }
        let key = if item.topic_id.trim().is_empty() {
            UNMAPPED_TOPIC.to_string()
        } else {
            item.topic_id.trim().to_string()
        };
        groups.entry(key).or_default().push(item.clone());
    }
    for items in groups.values_mut() {
        items.sort_by(|a, b| {
            b.insertion_priority
                .cmp(&a.insertion_priority)
                .then(a.timestamp_sec.total_cmp(&b.timestamp_sec))
        });
        items.truncate(config.images.max_per_topic);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ProviderError;
    use crate::gateway::testing::{KeywordEmbedder, ScriptedProvider};
    use crate::pipeline::context::testing::stage_context;
    use serde_json::json;

    fn capture(index: u32, ts: f64, text: &str, size: u64) -> Capture {
        Capture {
            capture_index: index,
            timestamp_sec: ts,
            timestamp_hms: sec_to_hms(ts),
            image_path: format!("captures/cap_{index}.png"),
            ocr_text: text.to_string(),
            ocr_file_size_bytes: size,
            ocr_skipped_reason: None,
        }
    }

    fn item(index: u32, topic: &str, priority: u32, ts: f64) -> ImageManifestItem {
        serde_json::from_value(json!({
            "capture_index": index,
            "topic_id": topic,
            "insertion_priority": priority,
            "timestamp_sec": ts,
            "ocr_file_size_bytes": 100_000,
            "content_type": "PHOTO"
        }))
        .unwrap()
    }

    fn topic(id: &str, name: &str, start: &str, end: &str) -> Topic {
        Topic {
            id: id.to_string(),
            name: name.to_string(),
            start_timestamp: start.to_string(),
            end_timestamp: end.to_string(),
            ..Topic::default()
        }
    }

    #[test]
    fn test_prefilter() {
        let mut skipped = capture(1, 0.0, "text", 50_000);
        skipped.ocr_skipped_reason = Some("blank".to_string());
        let captures = vec![
            skipped,
            capture(2, 0.0, "small", 10),
            capture(3, 0.0, "  ", 50_000),
            capture(4, 0.0, "keep", 50_000),
        ];
        let (kept, dropped) = prefilter(captures, &HeuristicConfig::default());
        assert_eq!(dropped, 3);
        assert_eq!(kept[0].capture_index, 4);
    }

    #[test]
    fn test_merge_keeps_highest_priority_per_capture() {
        let a = ImageAnalysis {
            image_manifest: vec![item(2, "T001", 2, 0.0), item(1, "T001", 3, 0.0)],
            statistics: ImageStatistics {
                total: 2,
                by_type: BTreeMap::from([("PHOTO".to_string(), 2)]),
                before_after_pairs: vec![json!([1, 2])],
                ..ImageStatistics::default()
            },
        };
        let b = ImageAnalysis {
            image_manifest: vec![item(2, "T002", 5, 0.0)],
            statistics: ImageStatistics {
                total: 1,
                by_type: BTreeMap::from([("PHOTO".to_string(), 1)]),
                before_after_pairs: vec![json!([1, 2])],
                ..ImageStatistics::default()
            },
        };
        let merged = ImageAnalysis::merge(vec![a, b]);
        assert_eq!(merged.image_manifest.len(), 2);
        assert_eq!(merged.image_manifest[0].capture_index, 1);
        assert_eq!(merged.image_manifest[1].topic_id, "T002");
        assert_eq!(merged.statistics.total, 3);
        assert_eq!(merged.statistics.by_type["PHOTO"], 3);
        assert_eq!(merged.statistics.before_after_pairs.len(), 1);
    }

    #[test]
    fn test_reconcile_prefers_capture_manifest() {
        let mut from_model = item(1, "T001", 9, 0.0);
        from_model.image_path = "somewhere/else.png".to_string();
        let unknown = item(42, "T001", 3, 0.0);
        let captures = vec![capture(1, 30.0, "x", 50_000)];

        let manifest = reconcile(vec![from_model, unknown], &captures);
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].image_path, "captures/cap_1.png");
        assert_eq!(manifest[0].model_image_path.as_deref(), Some("somewhere/else.png"));
        assert_eq!(manifest[0].timestamp_hms, "00:00:30");
        assert_eq!(manifest[0].insertion_priority, 5);
    }

    #[test]
    fn test_group_by_topic_filters_sorts_and_caps() {
        let mut config = PipelineConfig::default();
        config.images.max_per_topic = 2;
        let mut small = item(5, "T001", 5, 0.0);
        small.ocr_file_size_bytes = 100;
        let manifest = vec![
            item(1, "T001", 3, 50.0),
            item(2, "T001", 5, 40.0),
            item(3, "T001", 4, 30.0),
            item(4, "", 4, 10.0),
            item(6, "T002", 2, 10.0),
            small,
        ];
        let groups = group_by_topic(&manifest, &config);
        let t1: Vec<u32> = groups["T001"].iter().map(|i| i.capture_index).collect();
        assert_eq!(t1, vec![2, 3]);
        assert_eq!(groups[UNMAPPED_TOPIC].len(), 1);
        assert!(!groups.contains_key("T002"));
    }

    #[tokio::test]
    async fn test_path_resolver_candidates() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("captures")).await.unwrap();
        let file = dir.path().join("captures").join("cap_1.png");
        tokio::fs::write(&file, b"png").await.unwrap();

        let by_manifest = PathResolver {
            base_dir: None,
            manifest_dir: Some(dir.path().to_path_buf()),
        };
        assert_eq!(by_manifest.resolve("/old/run/cap_1.png").await, Some(file.clone()));

        let by_base = PathResolver {
            base_dir: Some(dir.path().to_path_buf()),
            manifest_dir: None,
        };
        assert_eq!(by_base.resolve("output/captures/cap_1.png").await, Some(dir.path().join("captures/cap_1.png")));
        assert_eq!(by_base.resolve("https://example.com/cap_1.png").await, None);
    }

    #[tokio::test]
    async fn test_fallback_classifies_and_inlines_images() {
        let dir = tempfile::tempdir().unwrap();
        let captures_dir = dir.path().join("captures");
        tokio::fs::create_dir_all(&captures_dir).await.unwrap();
        tokio::fs::write(captures_dir.join("cap_1.png"), vec![0u8; 64]).await.unwrap();

        let mut config = PipelineConfig::default();
        config.paths.captures = Some(dir.path().join("capture_ocr_results.json"));
        config.images.min_file_size_kb = 0;
        let provider = ScriptedProvider::always("p", Err(ProviderError::Transport("down".into())));
        let ctx = stage_context(provider, Some(KeywordEmbedder::default()), config, dir.path());

        let knowledge = KnowledgeGraph {
            topics: vec![topic("T001", "Site inspection", "00:00:00", "00:10:00")],
            ..KnowledgeGraph::default()
        };
        let captures = vec![
            capture(1, 60.0, "<figure>site photo of the crane</figure>", 80_000),
            capture(2, 900.0, "<table><tr><td>42</td></tr></table> crane budget", 80_000),
            capture(3, 30.0, "tiny", 100),
        ];

        let report = run(&ctx, &captures, &knowledge).await.unwrap().unwrap();
        assert_eq!(report.statistics.total, 3);
        assert_eq!(report.statistics.filtered, 1);
        assert_eq!(report.statistics.by_type["SKIPPED"], 1);

        let photo = &report.image_manifest[0];
        assert_eq!(photo.content_type, ContentType::Photo);
        assert_eq!(photo.topic_id, "T001");
        assert!(photo.image_base64.as_deref().unwrap().starts_with("data:image/png;base64,"));

        let table = &report.image_manifest[1];
        assert_eq!(table.content_type, ContentType::DataTable);
        assert_eq!(table.table_html, "<table><tr><td>42</td></tr></table>");
        assert!(table.image_base64.is_none());
        assert_eq!(report.image_by_topic["T001"].len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_insertion_skips_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.images.insert_enabled = false;
        let ctx = stage_context(
            ScriptedProvider::always("p", Ok("{}".to_string())),
            None,
            config,
            dir.path(),
        );
        let captures = vec![capture(1, 0.0, "x", 50_000)];
        assert!(run(&ctx, &captures, &KnowledgeGraph::default()).await.unwrap().is_none());
    }
}
