//! Discovery branch: infer an agenda for meetings that had none.

use serde::Serialize;
use tracing::{info, warn};

use crate::pipeline::context::StageContext;
use crate::pipeline::prompts;
use crate::pipeline::state::{CleanedTranscript, ExtractedTopic, KnowledgeGraph, TimelineRow, TopicDiscovery};
use crate::utils::text::{fill_template, truncate_chars};

const STAGE: &str = "discovery";

/// Characters of row text sent per sampled row.
const SAMPLE_TEXT_CHARS: usize = 300;

#[derive(Debug, Serialize)]
struct SampleRow<'a> {
    timestamp_hms: &'a str,
    speaker: &'a str,
    text: String,
}

pub async fn run(
    ctx: &StageContext,
    cleaned: &CleanedTranscript,
    knowledge: &KnowledgeGraph,
) -> crate::Result<TopicDiscovery> {
    let sample: Vec<SampleRow<'_>> = sample_evenly(&cleaned.timeline, ctx.config.chunking.discovery_sample_rows)
        .into_iter()
        .map(|row| SampleRow {
            timestamp_hms: &row.timestamp_hms,
            speaker: &row.speaker,
            text: truncate_chars(&row.text, SAMPLE_TEXT_CHARS),
        })
        .collect();

    let knowledge_json = serde_json::to_string(knowledge)?;
    let timeline_json = serde_json::to_string(&sample)?;
    let user = fill_template(
        prompts::DISCOVERY_USER,
        &[
            ("KNOWLEDGE", knowledge_json.as_str()),
            ("TIMELINE", timeline_json.as_str()),
        ],
    );
    let mut discovery = ctx
        .gateway
        .call_typed::<TopicDiscovery>(STAGE, prompts::DISCOVERY_SYSTEM, &user)
        .await?;

    if discovery.extracted_topics.is_empty() {
        warn!("Discovery returned no topics, using knowledge graph topics");
        discovery.extracted_topics = from_knowledge(knowledge);
    }
    info!(topics = discovery.extracted_topics.len(), "Topics discovered");
    Ok(discovery)
}

/// At most `n` rows spread evenly over the timeline, first row included.
pub fn sample_evenly(rows: &[TimelineRow], n: usize) -> Vec<&TimelineRow> {
    if rows.len() <= n {
        return rows.iter().collect();
    }
    (0..n).map(|i| &rows[i * rows.len() / n]).collect()
}

fn from_knowledge(knowledge: &KnowledgeGraph) -> Vec<ExtractedTopic> {
    knowledge
        .topics
        .iter()
        .enumerate()
        .map(|(idx, topic)| ExtractedTopic {
            id: topic.id.clone(),
            number: (idx + 1).to_string(),
            title: topic.name.clone(),
            department: topic.department.clone(),
            start_timestamp: topic.start_timestamp.clone(),
            end_timestamp: topic.end_timestamp.clone(),
            key_speakers: topic.key_speakers.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::gateway::testing::ScriptedProvider;
    use crate::pipeline::context::testing::stage_context;
    use crate::pipeline::state::Topic;
    use serde_json::json;

    fn rows(n: usize) -> Vec<TimelineRow> {
        (0..n)
            .map(|i| TimelineRow {
                timestamp_sec: i as f64,
                timestamp_hms: format!("{i}"),
                speaker: "A".to_string(),
                text: "x".to_string(),
                slide_context: None,
            })
            .collect()
    }

    #[test]
    fn test_sample_evenly() {
        let all = rows(10);
        assert_eq!(sample_evenly(&all, 20).len(), 10);
        let picked: Vec<&str> = sample_evenly(&all, 4)
            .into_iter()
            .map(|r| r.timestamp_hms.as_str())
            .collect();
        assert_eq!(picked, vec!["0", "2", "5", "7"]);
    }

    #[tokio::test]
    async fn test_empty_discovery_uses_knowledge_topics() {
        let dir = tempfile::tempdir().unwrap();
        let response = json!({"extracted_topics": [], "topic_flow": []}).to_string();
        let ctx = stage_context(
            ScriptedProvider::always("p", Ok(response)),
            None,
            PipelineConfig::default(),
            dir.path(),
        );
        let knowledge = KnowledgeGraph {
            topics: vec![Topic {
                id: "T001".to_string(),
                name: "Budget".to_string(),
                start_timestamp: "00:00:00".to_string(),
                end_timestamp: "00:10:00".to_string(),
                ..Topic::default()
            }],
            ..KnowledgeGraph::default()
        };
        let cleaned = CleanedTranscript {
            timeline: rows(3),
            ..CleanedTranscript::default()
        };

        let discovery = run(&ctx, &cleaned, &knowledge).await.unwrap();
        assert_eq!(discovery.extracted_topics.len(), 1);
        assert_eq!(discovery.extracted_topics[0].title, "Budget");
        assert_eq!(discovery.extracted_topics[0].number, "1");
    }
}
