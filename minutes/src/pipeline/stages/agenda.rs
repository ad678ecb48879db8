//! Agenda branch: map the predefined agenda lines onto discussed topics,
//! guided by embedding and keyword hints.

use serde::Serialize;
use tracing::info;

use crate::pipeline::context::StageContext;
use crate::pipeline::prompts;
use crate::pipeline::state::{AgendaMapping, CleanedTranscript, KnowledgeGraph, TimelineRow, Topic};
use crate::utils::text::{cosine, fill_template, keyword_tokens};
use crate::{Error, Result};

const STAGE: &str = "agenda";

/// Timeline timestamps listed per agenda line.
const MAX_KEYWORD_TIMESTAMPS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestTopic {
    pub topic_id: String,
    pub name: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgendaHint {
    pub agenda_line: String,
    pub best_topic: Option<BestTopic>,
    pub keyword_topics: Vec<String>,
    pub keyword_timestamps: Vec<String>,
}

pub async fn run(
    ctx: &StageContext,
    cleaned: &CleanedTranscript,
    knowledge: &KnowledgeGraph,
    agenda: &[String],
) -> Result<AgendaMapping> {
    let vectors = ctx.gateway.embed(agenda).await?;
    if vectors.len() != agenda.len() {
        return Err(Error::stage(
            STAGE,
            format!("expected {} agenda embeddings, got {}", agenda.len(), vectors.len()),
        ));
    }
    let hints = build_hints(agenda, &vectors, &knowledge.topics, &cleaned.timeline);

    let agenda_text = agenda.join("\n");
    let topics = serde_json::to_string(&knowledge.topics)?;
    let hints = serde_json::to_string(&hints)?;
    let user = fill_template(
        prompts::AGENDA_USER,
        &[
            ("AGENDA", agenda_text.as_str()),
            ("TOPICS", topics.as_str()),
            ("HINTS", hints.as_str()),
        ],
    );
    let mapping = ctx
        .gateway
        .call_typed::<AgendaMapping>(STAGE, prompts::AGENDA_SYSTEM, &user)
        .await?;
    if mapping.agenda_mapping.is_empty() {
        return Err(Error::stage(STAGE, "model returned an empty agenda mapping"));
    }
    info!(
        agenda_lines = agenda.len(),
        mapped = mapping.agenda_mapping.len(),
        "Agenda mapped onto topics"
    );
    Ok(mapping)
}

/// Per agenda line: the most similar topic by embedding, the topics sharing
/// keywords with it, and where in the timeline those keywords were spoken.
pub fn build_hints(
    agenda: &[String],
    vectors: &[Vec<f32>],
    topics: &[Topic],
    timeline: &[TimelineRow],
) -> Vec<AgendaHint> {
    agenda
        .iter()
        .zip(vectors)
        .map(|(line, vector)| {
            let best_topic = topics
                .iter()
                .map(|t| (t, cosine(vector, &t.embedding)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(t, score)| BestTopic {
                    topic_id: t.id.clone(),
                    name: t.name.clone(),
                    similarity: (f64::from(score) * 1000.0).round() / 1000.0,
                });

            let keywords = keyword_tokens(line);
            let keyword_topics = topics
                .iter()
                .filter(|t| !keyword_tokens(&t.embedding_text()).is_disjoint(&keywords))
                .map(|t| t.id.clone())
                .collect();
            let keyword_timestamps = timeline
                .iter()
                .filter(|row| {
                    let text = row.text.to_lowercase();
                    keywords.iter().any(|k| text.contains(k.as_str()))
                })
                .take(MAX_KEYWORD_TIMESTAMPS)
                .map(|row| row.timestamp_hms.clone())
                .collect();

            AgendaHint {
                agenda_line: line.clone(),
                best_topic,
                keyword_topics,
                keyword_timestamps,
            }
        })
        .collect()
}
