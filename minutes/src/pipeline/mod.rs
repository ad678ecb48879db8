//! Stage pipeline: one execution from input files to the HTML report.
//!
//! `load → clean & align → knowledge → (agenda | discovery) → images →
//! summaries → render`. Every stage is fatal unless it absorbs its own
//! failure; the run metadata is written whether the run succeeds or not.

pub mod artifacts;
pub mod context;
pub mod prompts;
pub mod render;
pub mod stages;
pub mod state;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info};

use crate::Result;
use crate::config::PipelineConfig;
use crate::gateway::ModelGateway;
use crate::utils::fs::write_atomic;

use artifacts::{ArtifactStore, RunMetadata, StageTiming};
use context::StageContext;
use render::{ModelRenderer, RenderInput, ReportRenderer, render_with_fallback};
use stages::{align, images, knowledge, load, summarize, topics};
use state::PipelineState;

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub output_html: PathBuf,
    pub artifact_dir: PathBuf,
    /// Renderer that produced the document.
    pub renderer: &'static str,
    pub meets_contract: bool,
}

pub struct StagePipeline {
    config: Arc<PipelineConfig>,
    gateway: Arc<ModelGateway>,
    renderer: Arc<dyn ReportRenderer>,
}

impl StagePipeline {
    /// Pipeline rendering through the model, with the template as fallback.
    pub fn new(config: Arc<PipelineConfig>, gateway: Arc<ModelGateway>) -> Self {
        let renderer = Arc::new(ModelRenderer::new(gateway.clone()));
        Self {
            config,
            gateway,
            renderer,
        }
    }

    /// Replace the primary renderer.
    pub fn with_renderer(mut self, renderer: Arc<dyn ReportRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub async fn run(&self, run_id: &str) -> Result<RunOutcome> {
        let artifacts = ArtifactStore::new(&self.config.paths.artifacts_root, run_id, self.config.save_intermediate);
        artifacts.prepare().await?;

        let mut metadata = RunMetadata::new(run_id, &self.config);
        let ctx = StageContext::new(self.config.clone(), self.gateway.clone(), artifacts.clone());
        info!(run_id, mode = %self.config.mode, layout = %self.config.layout, "Pipeline run started");

        let result = self.execute(&ctx, &mut metadata).await;

        metadata.finished_at = Some(Utc::now());
        metadata.chunk_reports = ctx.reports();
        metadata.provider_calls = self.gateway.call_log();
        match &result {
            Ok(outcome) => info!(
                run_id,
                renderer = outcome.renderer,
                output = %outcome.output_html.display(),
                "Pipeline run finished"
            ),
            Err(e) => {
                error!(run_id, error = %e, "Pipeline run failed");
                metadata.error = Some(e.to_string());
            }
        }
        artifacts.save_metadata(&metadata).await;
        result
    }

    async fn execute(&self, ctx: &StageContext, metadata: &mut RunMetadata) -> Result<RunOutcome> {
        let config = &self.config;
        let timings = &mut metadata.stage_timings;

        let inputs = timed(timings, "load", load::run(config)).await?;
        metadata.segments = inputs.segments.len();
        metadata.captures = inputs.captures.len();
        let mut state = PipelineState {
            run_id: metadata.run_id.clone(),
            mode: config.mode,
            layout: config.layout,
            segments: inputs.segments,
            captures: inputs.captures,
            meeting: inputs.meeting,
            ..PipelineState::default()
        };

        let cleaned = match inputs.resumed {
            Some(cleaned) => {
                info!("Skipping clean & align, using resumed output");
                ctx.artifacts.save_stage(artifacts::CLEANED_FILE, &cleaned).await;
                cleaned
            }
            None => {
                timed(
                    timings,
                    "clean_align",
                    align::run(ctx, &state.segments, &state.captures, &state.meeting),
                )
                .await?
            }
        };
        let cleaned = state.cleaned.insert(cleaned);

        let graph = timed(timings, "knowledge", knowledge::run(ctx, cleaned)).await?;
        let graph = state.knowledge.insert(graph);

        let map = timed(timings, "topics", topics::run(ctx, cleaned, graph, &state.meeting)).await?;
        let items = state.topic_map.insert(map).topic_items();

        state.images = timed(timings, "images", images::run(ctx, &state.captures, graph)).await?;

        let summaries = timed(
            timings,
            "summarize",
            summarize::run(ctx, cleaned, graph, &items, &state.segments),
        )
        .await?;
        let summaries = state.summaries.insert(summaries);

        let empty = BTreeMap::new();
        let input = RenderInput {
            meta: &cleaned.meeting_meta,
            summaries,
            knowledge: graph,
            images: state.images.as_ref().map_or(&empty, |r| &r.image_by_topic),
            layout: state.layout,
        };
        let (report, renderer) = timed(timings, "render", render_with_fallback(self.renderer.as_ref(), &input)).await?;
        metadata.renderer = Some(renderer.to_string());

        let output_html = config.paths.output_html.clone();
        write_atomic(&output_html, report.html.as_bytes()).await?;
        info!(path = %output_html.display(), bytes = report.html.len(), "Report written");

        Ok(RunOutcome {
            run_id: state.run_id,
            output_html,
            artifact_dir: ctx.artifacts.dir().to_path_buf(),
            renderer,
            meets_contract: report.meets_contract,
        })
    }
}

/// Await one stage and record how long it took, successful or not.
async fn timed<T>(timings: &mut Vec<StageTiming>, stage: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    let started = Instant::now();
    let result = fut.await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    info!(stage, elapsed_ms, ok = result.is_ok(), "Stage finished");
    timings.push(StageTiming {
        stage: stage.to_string(),
        elapsed_ms,
    });
    result
}
