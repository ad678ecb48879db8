//! Knowledge graph: entities and topics extracted from the cleaned timeline,
//! merged across chunks and embedded for later similarity matching.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::HeuristicConfig;
use crate::gateway::ModelGateway;
use crate::pipeline::artifacts::KNOWLEDGE_FILE;
use crate::pipeline::context::StageContext;
use crate::pipeline::prompts;
use crate::pipeline::state::{CleanedTranscript, Entities, KnowledgeGraph, Slide, TimelineRow, Topic};
use crate::recovery::{ChunkMapper, PartialMerge, WorkUnit};
use crate::utils::text::{fill_template, truncate_chars};
use crate::utils::time::{hms_to_sec, is_hms, sec_to_hms};
use crate::{Error, Result};

const STAGE: &str = "knowledge";

pub async fn run(ctx: &StageContext, cleaned: &CleanedTranscript) -> Result<KnowledgeGraph> {
    let config = &ctx.config;
    let mapper = Arc::new(KnowledgeMapper {
        gateway: ctx.gateway.clone(),
        slides: cleaned.slides.clone(),
        slide_window_sec: config.chunking.knowledge_slide_window_sec,
        heuristics: config.heuristics.clone(),
    });

    let (partials, report) = ctx
        .executor
        .map_reduce(
            STAGE,
            &cleaned.timeline,
            config.chunking.knowledge_chunk_size,
            0,
            mapper,
            |partials| partials,
        )
        .await;
    ctx.record_report(report);

    let mut graph = reduce(&ctx.gateway, partials).await;
    if graph.topics.is_empty() {
        warn!("No topics extracted, synthesizing topics from timeline windows");
        graph.topics = synthesize_topics(&cleaned.timeline, &cleaned.slides, &config.heuristics);
    }
    normalize_topics(&mut graph.topics, &config.heuristics);
    if graph.topics.is_empty() {
        return Err(Error::stage(STAGE, "knowledge graph has no topics"));
    }

    embed_topics(&ctx.gateway, &mut graph.topics).await?;
    info!(
        topics = graph.topics.len(),
        decisions = graph.entities.decisions.len(),
        action_items = graph.entities.action_items.len(),
        "Knowledge graph built"
    );
    ctx.artifacts.save_stage(KNOWLEDGE_FILE, &graph).await;
    Ok(graph)
}

struct KnowledgeMapper {
    gateway: Arc<ModelGateway>,
    slides: Vec<Slide>,
    slide_window_sec: f64,
    heuristics: HeuristicConfig,
}

impl KnowledgeMapper {
    fn slides_near(&self, rows: &[TimelineRow]) -> Vec<&Slide> {
        let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
            return Vec::new();
        };
        let start = first.timestamp_sec - self.slide_window_sec;
        let end = last.timestamp_sec + self.slide_window_sec;
        self.slides
            .iter()
            .filter(|s| {
                let ts = s.seconds() as f64;
                start <= ts && ts <= end
            })
            .collect()
    }
}

#[async_trait]
impl ChunkMapper<TimelineRow> for KnowledgeMapper {
    type Output = KnowledgeGraph;

    async fn map(&self, unit: &WorkUnit<TimelineRow>) -> Result<KnowledgeGraph> {
        let data = serde_json::json!({
            "timeline": unit.items,
            "slides": self.slides_near(&unit.items),
        });
        let data = serde_json::to_string(&data)?;
        let user = fill_template(prompts::KNOWLEDGE_USER, &[("DATA", data.as_str())]);
        Ok(self
            .gateway
            .call_typed::<KnowledgeGraph>(&unit.tag, prompts::KNOWLEDGE_SYSTEM, &user)
            .await?)
    }

    /// Time-window topics over the unit's own rows, so the span it covers
    /// still reaches the summaries when neighbouring chunks succeed.
    fn fallback(&self, unit: &WorkUnit<TimelineRow>) -> KnowledgeGraph {
        KnowledgeGraph {
            topics: synthesize_topics(&unit.items, &self.slides, &self.heuristics),
            ..KnowledgeGraph::default()
        }
    }
}

impl PartialMerge for KnowledgeGraph {
    fn merge(parts: Vec<Self>) -> Self {
        let mut entities = Entities::default();
        let mut seen: [HashSet<String>; 7] = Default::default();
        let mut topics = Vec::new();
        let mut topic_keys = HashSet::new();

        for part in parts {
            for ((target, incoming), seen) in entities
                .categories_mut()
                .into_iter()
                .zip(part.entities.into_categories())
                .zip(seen.iter_mut())
            {
                for entity in incoming {
                    if !entity.is_object() {
                        continue;
                    }
                    // serde_json maps are ordered by key, so this is canonical.
                    if seen.insert(entity.to_string()) {
                        target.push(entity);
                    }
                }
            }
            for topic in part.topics {
                let key = (
                    topic.name.trim().to_lowercase(),
                    topic.start_timestamp.trim().to_string(),
                    topic.end_timestamp.trim().to_string(),
                );
                if topic_keys.insert(key) {
                    topics.push(topic);
                }
            }
        }

        for (idx, topic) in topics.iter_mut().enumerate() {
            topic.id = topic_id(idx + 1);
        }
        KnowledgeGraph { entities, topics }
    }
}

fn topic_id(n: usize) -> String {
    format!("T{n:03}")
}

/// Combine chunk partials into one graph. Several partials go through a
/// model reduce first; if that fails or loses every topic, the
/// deterministic merge is used instead.
async fn reduce(gateway: &ModelGateway, partials: Vec<KnowledgeGraph>) -> KnowledgeGraph {
    let partials: Vec<KnowledgeGraph> = partials
        .into_iter()
        .filter(|p| !p.topics.is_empty() || p.entities != Entities::default())
        .collect();
    if partials.len() <= 1 {
        return KnowledgeGraph::merge(partials);
    }

    let merged_by_model = match serde_json::to_string(&partials) {
        Ok(json) => {
            let user = fill_template(prompts::KNOWLEDGE_REDUCE_USER, &[("PARTIALS", json.as_str())]);
            gateway
                .call_typed::<KnowledgeGraph>("knowledge#reduce", prompts::KNOWLEDGE_REDUCE_SYSTEM, &user)
                .await
                .map_err(Error::from)
        }
        Err(e) => Err(e.into()),
    };
    match merged_by_model {
        Ok(graph) if !graph.topics.is_empty() => KnowledgeGraph::merge(vec![graph]),
        Ok(_) => {
            warn!("Knowledge reduce returned no topics, merging partials locally");
            KnowledgeGraph::merge(partials)
        }
        Err(e) => {
            warn!(error = %e, "Knowledge reduce failed, merging partials locally");
            KnowledgeGraph::merge(partials)
        }
    }
}

/// Fix ids, names and timestamps so every topic is usable downstream.
pub fn normalize_topics(topics: &mut [Topic], heuristics: &HeuristicConfig) {
    for (idx, topic) in topics.iter_mut().enumerate() {
        let n = idx + 1;
        if !topic.id.trim().starts_with('T') {
            topic.id = topic_id(n);
        }
        topic.name = topic.name.trim().to_string();
        if topic.name.is_empty() {
            topic.name = format!("Topic {n}");
        }

        let start = if is_hms(&topic.start_timestamp) {
            hms_to_sec(&topic.start_timestamp)
        } else {
            0
        };
        let end = hms_to_sec(&topic.end_timestamp).max(start);
        topic.start_timestamp = sec_to_hms(start as f64);
        topic.end_timestamp = sec_to_hms(end as f64);
        if topic.duration_minutes <= 0 {
            topic.duration_minutes = duration_minutes(start, end);
        }
        topic.summary_points.retain(|p| !p.trim().is_empty());
        topic.summary_points.truncate(heuristics.max_summary_points);
    }
}

fn duration_minutes(start: u64, end: u64) -> i64 {
    (((end - start) as f64 / 60.0).round() as i64).max(1)
}

/// Cut the timeline into fixed windows and make one topic per window.
pub fn synthesize_topics(
    timeline: &[TimelineRow],
    slides: &[Slide],
    heuristics: &HeuristicConfig,
) -> Vec<Topic> {
    let (Some(first), Some(last)) = (timeline.first(), timeline.last()) else {
        return Vec::new();
    };
    let max_topics = heuristics.max_synthesized_topics.max(1);
    let origin = first.timestamp_sec;
    let span = (last.timestamp_sec - origin).max(0.0);
    let window = (f64::from(heuristics.synthesis_window_minutes.max(1)) * 60.0)
        .max(span / max_topics as f64)
        .max(1.0);

    let mut groups: BTreeMap<usize, Vec<&TimelineRow>> = BTreeMap::new();
    for row in timeline {
        let bucket = (((row.timestamp_sec - origin) / window).floor() as usize).min(max_topics - 1);
        groups.entry(bucket).or_default().push(row);
    }

    groups
        .into_values()
        .enumerate()
        .filter_map(|(idx, rows)| {
            let start = rows.first()?.timestamp_sec.max(0.0) as u64;
            let end = (rows.last()?.timestamp_sec.max(0.0) as u64).max(start);
            let start_hms = sec_to_hms(start as f64);
            let end_hms = sec_to_hms(end as f64);

            let mut counts: Vec<(&str, usize)> = Vec::new();
            for row in &rows {
                match counts.iter_mut().find(|(s, _)| *s == row.speaker) {
                    Some((_, n)) => *n += 1,
                    None => counts.push((&row.speaker, 1)),
                }
            }
            // Stable: ties keep first-appearance order.
            counts.sort_by(|a, b| b.1.cmp(&a.1));

            Some(Topic {
                id: topic_id(idx + 1),
                name: format!("Discussion {start_hms} – {end_hms}"),
                start_timestamp: start_hms,
                end_timestamp: end_hms,
                duration_minutes: duration_minutes(start, end),
                key_speakers: counts
                    .iter()
                    .take(heuristics.synthesis_speakers)
                    .map(|(s, _)| s.to_string())
                    .collect(),
                slide_timestamps: slides
                    .iter()
                    .filter(|s| (start..=end).contains(&s.seconds()))
                    .take(heuristics.synthesis_slide_refs)
                    .map(|s| s.timestamp_hms.clone())
                    .collect(),
                summary_points: rows
                    .iter()
                    .filter(|r| !r.text.trim().is_empty())
                    .take(heuristics.synthesis_points)
                    .map(|r| truncate_chars(r.text.trim(), heuristics.point_chars))
                    .collect(),
                ..Topic::default()
            })
        })
        .collect()
}

async fn embed_topics(gateway: &ModelGateway, topics: &mut [Topic]) -> Result<()> {
    let texts: Vec<String> = topics.iter().map(Topic::embedding_text).collect();
    let vectors = gateway.embed(&texts).await?;
    if vectors.len() != topics.len() {
        return Err(Error::stage(
            STAGE,
            format!("expected {} topic embeddings, got {}", topics.len(), vectors.len()),
        ));
    }
    for (topic, vector) in topics.iter_mut().zip(vectors) {
        topic.embedding = vector;
    }
    Ok(())
}

/// Decisions and action items of the graph as displayable strings.
pub fn entity_texts(values: &[Value], keys: &[&str]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(map) => keys
                .iter()
                .filter_map(|k| map.get(*k).and_then(Value::as_str))
                .map(str::trim)
                .find(|s| !s.is_empty())
                .map(str::to_string),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}
