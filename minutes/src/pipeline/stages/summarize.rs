//! Per-topic summaries, written concurrently, followed by one executive
//! summary over all of them.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::gateway::ModelGateway;
use crate::pipeline::artifacts::SUMMARIES_FILE;
use crate::pipeline::context::StageContext;
use crate::pipeline::prompts;
use crate::pipeline::stages::knowledge::entity_texts;
use crate::pipeline::state::{
    ActionItem, CleanedTranscript, ExecutiveSummary, KnowledgeGraph, Segment, Slide, Summaries,
    TimelineRow, TopicItem, TopicSummary, TopicSummaryEnvelope,
};
use crate::utils::text::{fill_template, truncate_chars};
use crate::utils::time::sec_to_hms;
use crate::{Error, Result};

const STAGE: &str = "summarize";

/// Snippet rows used by the local summary when the model call fails.
const FALLBACK_SNIPPET_ROWS: usize = 3;

#[derive(Serialize)]
struct SnippetRow<'a> {
    timestamp_hms: &'a str,
    speaker: &'a str,
    text: &'a str,
}

/// Everything one topic task needs, prepared before spawning.
struct TopicJob {
    index: usize,
    item: TopicItem,
    user: String,
    fallback: TopicSummary,
    slide_count: usize,
}

pub async fn run(
    ctx: &StageContext,
    cleaned: &CleanedTranscript,
    knowledge: &KnowledgeGraph,
    items: &[TopicItem],
    segments: &[Segment],
) -> Result<Summaries> {
    let config = &ctx.config;
    let knowledge_json = serde_json::to_string(knowledge)?;
    let margin = config.chunking.summary_margin_sec;
    let slide_window = config.chunking.knowledge_slide_window_sec;

    let mut jobs = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let (start, end) = item.time_range.seconds();
        let (start, end) = (start as f64, end as f64);
        let snippet: Vec<&TimelineRow> = cleaned
            .timeline
            .iter()
            .filter(|r| (start - margin) <= r.timestamp_sec && r.timestamp_sec <= (end + margin))
            .collect();
        let slides: Vec<&Slide> = cleaned
            .slides
            .iter()
            .filter(|s| {
                let ts = s.seconds() as f64;
                (start - slide_window) <= ts && ts <= (end + slide_window)
            })
            .collect();

        let rows: Vec<SnippetRow<'_>> = snippet
            .iter()
            .map(|r| SnippetRow {
                timestamp_hms: &r.timestamp_hms,
                speaker: &r.speaker,
                text: &r.text,
            })
            .collect();
        let item_json = serde_json::to_string(item)?;
        let rows_json = serde_json::to_string(&rows)?;
        let slides_json = serde_json::to_string(&slides)?;
        let user = fill_template(
            prompts::TOPIC_SUMMARY_USER,
            &[
                ("KNOWLEDGE", knowledge_json.as_str()),
                ("TOPIC_ITEM", item_json.as_str()),
                ("TIMELINE_SNIPPET", rows_json.as_str()),
                ("SLIDES", slides_json.as_str()),
            ],
        );
        jobs.push(TopicJob {
            index,
            item: item.clone(),
            user,
            fallback: local_summary(item, knowledge, &snippet, config.heuristics.point_chars),
            slide_count: slides.len(),
        });
    }

    let topic_summaries = summarize_topics(ctx.gateway.clone(), jobs, config.recovery.max_concurrency).await;

    let summaries_json = serde_json::to_string(&topic_summaries)?;
    let user = fill_template(
        prompts::EXECUTIVE_USER,
        &[
            ("TOPIC_SUMMARIES", summaries_json.as_str()),
            ("KNOWLEDGE", knowledge_json.as_str()),
        ],
    );
    let executive = ctx
        .gateway
        .call_typed::<ExecutiveSummary>("executive", prompts::EXECUTIVE_SYSTEM, &user)
        .await?;

    let summaries = finish(topic_summaries, executive, knowledge, segments);
    info!(
        topics = summaries.topic_summaries.len(),
        decisions = summaries.total_decisions,
        action_items = summaries.total_action_items,
        duration = %summaries.meeting_duration,
        "Summaries written"
    );
    ctx.artifacts.save_stage(SUMMARIES_FILE, &summaries).await;
    Ok(summaries)
}

/// Run the topic calls with bounded concurrency and restore topic order.
async fn summarize_topics(gateway: Arc<ModelGateway>, jobs: Vec<TopicJob>, max_concurrency: usize) -> Vec<TopicSummary> {
    let total = jobs.len();
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let mut fallbacks: Vec<Option<TopicSummary>> = Vec::with_capacity(total);

    for job in jobs {
        fallbacks.push(Some(job.fallback.clone()));
        let gateway = gateway.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let tag = format!("{STAGE}#{}", job.index + 1);
            let summary = match gateway
                .call_typed::<TopicSummaryEnvelope>(&tag, prompts::TOPIC_SUMMARY_SYSTEM, &job.user)
                .await
            {
                Ok(envelope) => {
                    debug!(%tag, "Topic summarized");
                    envelope.topic_summary
                }
                Err(e) => {
                    warn!(%tag, error = %e, "Topic summary failed, using local summary");
                    job.fallback
                }
            };
            (job.index, fill_from_item(summary, &job.item, job.index, job.slide_count))
        });
    }

    let mut slots: Vec<Option<TopicSummary>> = (0..total).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, summary)) => slots[index] = Some(summary),
            Err(e) => warn!(error = %e, "Topic summary task aborted"),
        }
    }
    slots
        .into_iter()
        .zip(fallbacks)
        .map(|(slot, fallback)| slot.or(fallback).unwrap_or_default())
        .collect()
}

/// Fill whatever the model left empty from the topic item.
pub fn fill_from_item(mut summary: TopicSummary, item: &TopicItem, index: usize, slide_count: usize) -> TopicSummary {
    let n = index + 1;
    if summary.topic_id.is_empty() {
        summary.topic_id = if item.topic_id.is_empty() {
            format!("T{n:03}")
        } else {
            item.topic_id.clone()
        };
    }
    if summary.agenda_number.is_empty() {
        summary.agenda_number = if item.agenda_number.is_empty() {
            n.to_string()
        } else {
            item.agenda_number.clone()
        };
    }
    if summary.title.is_empty() {
        summary.title = item.title.clone();
    }
    if summary.department.is_empty() {
        summary.department = item.department.clone();
    }
    if summary.presenter.is_empty() {
        summary.presenter = item.key_speaker.clone();
    }
    if summary.time_range.is_empty() {
        summary.time_range = item.time_range.display();
    }
    if summary.status.is_empty() {
        summary.status = if item.status.is_empty() {
            "discussed".to_string()
        } else {
            item.status.clone()
        };
    }
    if summary.slide_count.is_none() {
        summary.slide_count = Some(slide_count as u32);
    }
    summary
}

/// Summary built from the matching knowledge topic and the timeline snippet.
fn local_summary(item: &TopicItem, knowledge: &KnowledgeGraph, snippet: &[&TimelineRow], point_chars: usize) -> TopicSummary {
    let topic = knowledge.topics.iter().find(|t| t.id == item.topic_id);
    let summary = match topic {
        Some(t) if !t.summary_points.is_empty() => t.summary_points.join(" "),
        _ => snippet
            .iter()
            .take(FALLBACK_SNIPPET_ROWS)
            .map(|r| format!("{}: {}", r.speaker, truncate_chars(&r.text, point_chars)))
            .collect::<Vec<_>>()
            .join(" "),
    };
    TopicSummary {
        summary,
        decisions: topic.map(|t| t.decisions.clone()).unwrap_or_default(),
        action_items: topic
            .map(|t| t.action_items.iter().cloned().map(ActionItem::Text).collect())
            .unwrap_or_default(),
        ..TopicSummary::default()
    }
}

/// Combine topic summaries with the executive call, falling back to the
/// knowledge graph counts and the transcript length where the model gave
/// nothing usable.
pub fn finish(
    topic_summaries: Vec<TopicSummary>,
    executive: ExecutiveSummary,
    knowledge: &KnowledgeGraph,
    segments: &[Segment],
) -> Summaries {
    let total_decisions = if executive.total_decisions > 0 {
        executive.total_decisions as u64
    } else {
        entity_texts(&knowledge.entities.decisions, &["text", "decision", "description"]).len() as u64
    };
    let total_action_items = if executive.total_action_items > 0 {
        executive.total_action_items as u64
    } else {
        entity_texts(&knowledge.entities.action_items, &["task", "text", "description"]).len() as u64
    };
    let meeting_duration = if executive.meeting_duration.trim().is_empty() {
        let end = segments.iter().map(|s| s.end).fold(0.0, f64::max);
        sec_to_hms(end)
    } else {
        executive.meeting_duration.trim().to_string()
    };
    Summaries {
        topic_summaries,
        executive_summary: executive.executive_summary,
        total_decisions,
        total_action_items,
        meeting_duration,
    }
}
