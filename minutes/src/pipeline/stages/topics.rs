//! Topic routing: the agenda branch when an agenda is available in agenda
//! mode, discovery otherwise.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineMode;
use crate::pipeline::artifacts::TOPICS_FILE;
use crate::pipeline::context::StageContext;
use crate::pipeline::stages::{agenda, discovery};
use crate::pipeline::state::{CleanedTranscript, KnowledgeGraph, MeetingConfig, TopicItem, TopicMap};
use crate::{Error, Result};

#[derive(Serialize)]
struct TopicsArtifact<'a> {
    topic_map: &'a TopicMap,
    topic_items: &'a [TopicItem],
}

/// Which branch a run takes.
pub fn use_agenda(mode: PipelineMode, agenda: &[String]) -> bool {
    mode == PipelineMode::Agenda && !agenda.is_empty()
}

pub async fn run(
    ctx: &StageContext,
    cleaned: &CleanedTranscript,
    knowledge: &KnowledgeGraph,
    meeting: &MeetingConfig,
) -> Result<TopicMap> {
    let agenda_lines = meeting.agenda_lines();
    let map = if use_agenda(ctx.config.mode, &agenda_lines) {
        info!(lines = agenda_lines.len(), "Using agenda branch");
        TopicMap::Agenda(agenda::run(ctx, cleaned, knowledge, &agenda_lines).await?)
    } else {
        if ctx.config.mode == PipelineMode::Agenda {
            warn!("Agenda mode requested but no agenda text provided, discovering topics instead");
        }
        TopicMap::Discovery(discovery::run(ctx, cleaned, knowledge).await?)
    };

    let items = map.topic_items();
    if items.is_empty() {
        return Err(Error::stage("topics", "no topic items to summarize"));
    }
    ctx.artifacts
        .save_stage(
            TOPICS_FILE,
            &TopicsArtifact {
                topic_map: &map,
                topic_items: &items,
            },
        )
        .await;
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(PipelineMode::Agenda, &["1. Budget"], true)]
    #[case(PipelineMode::Agenda, &[], false)]
    #[case(PipelineMode::Auto, &["1. Budget"], false)]
    fn test_branch_selection(#[case] mode: PipelineMode, #[case] lines: &[&str], #[case] expected: bool) {
        let lines: Vec<String> = lines.iter().map(|s| s.to_string()).collect();
        assert_eq!(use_agenda(mode, &lines), expected);
    }
}
