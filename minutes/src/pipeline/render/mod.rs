//! Report rendering.
//!
//! A [`ReportRenderer`] turns the run's metadata, summaries, knowledge graph
//! and grouped images into one self-contained HTML document. The model
//! renderer is tried first; any document that fails the structural contract
//! is replaced by the deterministic [`TemplateRenderer`] output.

mod bundle;
mod fallback;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::Result;
use crate::config::ReportLayout;
use crate::gateway::ModelGateway;
use crate::pipeline::prompts;
use crate::pipeline::state::{ImageManifestItem, KnowledgeGraph, MeetingMeta, Summaries};
use crate::utils::text::fill_template;

pub use bundle::head_bundle;
pub use fallback::TemplateRenderer;

/// Tokens every rendered document must contain, matched case-insensitively.
pub const REQUIRED_TOKENS: [&str; 4] = ["<!doctype html", "<style>", "<script>", "id=\"lb-overlay\""];

/// Headings that must appear in this order.
pub const SECTION_MARKERS: [&str; 8] = [
    "Meeting Report",
    "Attendees",
    "Contents",
    "Executive Summary",
    "Agenda",
    "Resolutions",
    "Action Items",
    "Appendix",
];

/// Everything a renderer may draw from.
#[derive(Debug, Clone, Copy)]
pub struct RenderInput<'a> {
    pub meta: &'a MeetingMeta,
    pub summaries: &'a Summaries,
    pub knowledge: &'a KnowledgeGraph,
    pub images: &'a BTreeMap<String, Vec<ImageManifestItem>>,
    pub layout: ReportLayout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReport {
    pub html: String,
    pub meets_contract: bool,
}

impl RenderedReport {
    pub fn new(html: String) -> Self {
        let meets_contract = meets_contract(&html);
        Self { html, meets_contract }
    }
}

#[async_trait]
pub trait ReportRenderer: Send + Sync {
    /// Name recorded in the run metadata.
    fn name(&self) -> &'static str;

    async fn render(&self, input: &RenderInput<'_>) -> Result<RenderedReport>;
}

/// Whether `html` carries the required tokens and the section markers in order.
pub fn meets_contract(html: &str) -> bool {
    let lowered = html.to_lowercase();
    if !REQUIRED_TOKENS.iter().all(|t| lowered.contains(t)) {
        return false;
    }
    let mut from = 0;
    for marker in SECTION_MARKERS {
        match html[from..].find(marker) {
            Some(pos) => from += pos + marker.len(),
            None => return false,
        }
    }
    true
}

/// Asks the model for the whole document.
pub struct ModelRenderer {
    gateway: Arc<ModelGateway>,
}

impl ModelRenderer {
    pub fn new(gateway: Arc<ModelGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ReportRenderer for ModelRenderer {
    fn name(&self) -> &'static str {
        "model"
    }

    async fn render(&self, input: &RenderInput<'_>) -> Result<RenderedReport> {
        let meta = serde_json::to_string(input.meta)?;
        let summaries = serde_json::to_string(input.summaries)?;
        let knowledge = serde_json::to_string(input.knowledge)?;
        let images = serde_json::to_string(input.images)?;
        let markers = SECTION_MARKERS.join(" → ");
        let layout = input.layout.to_string();
        let bundle = head_bundle();
        let user = fill_template(
            prompts::RENDER_USER,
            &[
                ("META", meta.as_str()),
                ("SUMMARIES", summaries.as_str()),
                ("KNOWLEDGE", knowledge.as_str()),
                ("IMAGES", images.as_str()),
                ("MARKERS", markers.as_str()),
                ("LAYOUT", layout.as_str()),
                ("BUNDLE", bundle.as_str()),
            ],
        );
        let raw = self.gateway.call_text("render", prompts::RENDER_SYSTEM, &user).await?;
        Ok(RenderedReport::new(strip_code_fence(&raw).to_string()))
    }
}

/// Drop a surrounding markdown fence, including its language tag line.
fn strip_code_fence(raw: &str) -> &str {
    let mut text = raw.trim();
    if text.starts_with("```") {
        text = text.split_once('\n').map_or("", |(_, rest)| rest);
        text = text.trim_end().strip_suffix("```").unwrap_or(text);
    }
    text.trim()
}

/// Render with `primary`, falling back to the template renderer when the
/// primary fails or breaks the contract. Returns the report and the name of
/// the renderer that produced it.
pub async fn render_with_fallback(
    primary: &dyn ReportRenderer,
    input: &RenderInput<'_>,
) -> Result<(RenderedReport, &'static str)> {
    match primary.render(input).await {
        Ok(report) if report.meets_contract => {
            info!(renderer = primary.name(), bytes = report.html.len(), "Report rendered");
            return Ok((report, primary.name()));
        }
        Ok(_) => warn!(renderer = primary.name(), "Rendered report breaks the structure contract, using template"),
        Err(e) => warn!(renderer = primary.name(), error = %e, "Renderer failed, using template"),
    }
    let template = TemplateRenderer;
    let report = template.render(input).await?;
    if !report.meets_contract {
        warn!("Template report does not satisfy the structure contract");
    }
    Ok((report, template.name()))
}
