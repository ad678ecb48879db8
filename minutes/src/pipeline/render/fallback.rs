//! Deterministic HTML report built directly from the pipeline state.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;

use super::{RenderInput, RenderedReport, ReportRenderer, head_bundle};
use crate::Result;
use crate::config::{RenderAs, ReportLayout};
use crate::pipeline::state::{ActionItem, Attendee, ImageManifestItem, MeetingMeta, TopicSummary};
use crate::utils::lenient::value_to_string;
use crate::utils::text::{escape_html, split_paragraphs};
use crate::utils::time::hms_to_sec;

const NO_DATA: &str = "<p class=\"topic-meta\">No data</p>";

/// Renders the report from a fixed template. Never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateRenderer;

#[async_trait]
impl ReportRenderer for TemplateRenderer {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn render(&self, input: &RenderInput<'_>) -> Result<RenderedReport> {
        Ok(RenderedReport::new(render_document(input)))
    }
}

fn render_document(input: &RenderInput<'_>) -> String {
    let title = if input.meta.title.trim().is_empty() {
        "Meeting Report".to_string()
    } else {
        input.meta.title.trim().to_string()
    };
    let topics = &input.summaries.topic_summaries;

    let mut body = String::new();
    body.push_str(&cover(&title, input.meta));
    body.push_str(&attendees(&input.meta.attendees));
    body.push_str(&contents(topics));
    body.push_str(&executive(input));
    if input.layout == ReportLayout::Official {
        body.push_str(&filter_bar(topics));
    }
    body.push_str("<h2 id=\"agenda\">Agenda Details</h2>\n");
    if topics.is_empty() {
        body.push_str(NO_DATA);
    }
    for (idx, topic) in topics.iter().enumerate() {
        let images = input.images.get(topic.topic_id.trim()).map(Vec::as_slice).unwrap_or_default();
        body.push_str(&topic_section(idx, topic, images));
    }
    body.push_str(&decision_log(topics));
    body.push_str(&action_log(topics));
    body.push_str(&appendix(topics));

    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{}</title>\n{}\n</head>\n<body class=\"layout-{}\">\n<main>\n{}</main>\n\
         <div id=\"lb-overlay\" class=\"lb-overlay\"><img id=\"lb-img\" alt=\"\"></div>\n</body>\n</html>\n",
        escape_html(&title),
        head_bundle(),
        input.layout,
        body
    )
}

fn cover(title: &str, meta: &MeetingMeta) -> String {
    let mut out = String::from("<section class=\"cover\">\n<div class=\"label\">Meeting Report</div>\n");
    out.push_str(&format!("<h1>{}</h1>\n<dl class=\"meta-grid\">\n", escape_html(title)));
    let rows = [
        ("Date", &meta.date),
        ("Time", &meta.time_range),
        ("Platform", &meta.platform),
        ("Company", &meta.company),
        ("Chair", &meta.chairperson),
    ];
    for (label, value) in rows {
        if !value.trim().is_empty() {
            out.push_str(&format!("<dt>{label}</dt><dd>{}</dd>\n", escape_html(value)));
        }
    }
    out.push_str("</dl>\n</section>\n");
    out
}

fn attendees(attendees: &[Attendee]) -> String {
    let mut out = String::from("<h2 id=\"attendees\">Attendees</h2>\n");
    if attendees.is_empty() {
        out.push_str(NO_DATA);
        return out;
    }
    out.push_str("<table>\n<tr><th>#</th><th>Name</th><th>Department</th><th>Role</th></tr>\n");
    for (idx, attendee) in attendees.iter().enumerate() {
        let role = if attendee.is_main() { "Attendee" } else { "Supplementary" };
        out.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{role}</td></tr>\n",
            idx + 1,
            escape_html(&attendee.name),
            escape_html(&attendee.department)
        ));
    }
    out.push_str("</table>\n");
    out
}

fn heading(idx: usize, topic: &TopicSummary) -> String {
    let number = if topic.agenda_number.trim().is_empty() {
        (idx + 1).to_string()
    } else {
        topic.agenda_number.trim().to_string()
    };
    format!("Agenda {}: {}", escape_html(&number), escape_html(&topic.title))
}

fn contents(topics: &[TopicSummary]) -> String {
    let mut out = String::from("<h2 id=\"contents\">Contents</h2>\n");
    if topics.is_empty() {
        out.push_str(NO_DATA);
        return out;
    }
    out.push_str("<ol>\n");
    for (idx, topic) in topics.iter().enumerate() {
        out.push_str(&format!("<li><a href=\"#topic-{}\">{}</a></li>\n", idx + 1, escape_html(&topic.title)));
    }
    out.push_str("</ol>\n");
    out
}

fn executive(input: &RenderInput<'_>) -> String {
    let summaries = input.summaries;
    let mut out = String::from("<h2 id=\"executive\">Executive Summary</h2>\n");
    let duration = if summaries.meeting_duration.trim().is_empty() {
        "-".to_string()
    } else {
        escape_html(&summaries.meeting_duration)
    };
    out.push_str(&format!(
        "<div class=\"stats\">\n<div class=\"stat\"><b>{}</b>Topics</div>\n\
         <div class=\"stat\"><b>{}</b>Decisions</div>\n<div class=\"stat\"><b>{}</b>Action items</div>\n\
         <div class=\"stat\"><b>{duration}</b>Duration</div>\n</div>\n",
        summaries.topic_summaries.len(),
        summaries.total_decisions,
        summaries.total_action_items,
    ));
    out.push_str(&paragraphs(&summaries.executive_summary));
    out
}

fn filter_bar(topics: &[TopicSummary]) -> String {
    let departments: BTreeSet<&str> = topics
        .iter()
        .map(|t| t.department.trim())
        .filter(|d| !d.is_empty())
        .collect();
    let mut out = String::from("<nav class=\"filter-bar\">\n<button class=\"active\" data-dept=\"\">All</button>\n");
    for dept in departments {
        let escaped = escape_html(dept);
        out.push_str(&format!("<button data-dept=\"{escaped}\">{escaped}</button>\n"));
    }
    out.push_str("</nav>\n");
    out
}

fn paragraphs(text: &str) -> String {
    let paragraphs = split_paragraphs(text);
    if paragraphs.is_empty() {
        return NO_DATA.to_string();
    }
    paragraphs
        .iter()
        .map(|p| format!("<p>{}</p>\n", escape_html(p)))
        .collect()
}

fn topic_section(idx: usize, topic: &TopicSummary, images: &[ImageManifestItem]) -> String {
    let mut out = format!(
        "<section class=\"topic\" id=\"topic-{}\" data-dept=\"{}\">\n<h3>{}</h3>\n",
        idx + 1,
        escape_html(topic.department.trim()),
        heading(idx, topic)
    );
    let meta: Vec<String> = [
        ("Department", &topic.department),
        ("Presenter", &topic.presenter),
        ("Time", &topic.time_range),
        ("Status", &topic.status),
    ]
    .into_iter()
    .filter(|(_, v)| !v.trim().is_empty())
    .map(|(label, v)| format!("{label}: {}", escape_html(v)))
    .collect();
    if !meta.is_empty() {
        out.push_str(&format!("<p class=\"topic-meta\">{}</p>\n", meta.join(" · ")));
    }

    let (lead, rest): (Vec<_>, Vec<_>) = images.iter().partition(|i| i.insertion_priority >= 5);
    let (second, tail): (Vec<_>, Vec<_>) = rest.into_iter().partition(|i| i.insertion_priority == 4);
    for item in lead {
        out.push_str(&figure(item));
    }

    let mut paras = split_paragraphs(&topic.summary).into_iter();
    match paras.next() {
        Some(first) => out.push_str(&format!("<p>{}</p>\n", escape_html(&first))),
        None => out.push_str(NO_DATA),
    }
    for item in second {
        out.push_str(&figure(item));
    }
    for para in paras {
        out.push_str(&format!("<p>{}</p>\n", escape_html(&para)));
    }

    if !topic.key_data_points.is_empty() {
        out.push_str("<ul class=\"data-points\">\n");
        for point in &topic.key_data_points {
            out.push_str(&format!("<li>{}</li>\n", escape_html(&data_point(point))));
        }
        out.push_str("</ul>\n");
    }

    out.push_str("<div class=\"resolution\"><strong>Resolutions</strong>\n");
    if topic.decisions.is_empty() {
        out.push_str(NO_DATA);
    } else {
        out.push_str("<ul>\n");
        for decision in &topic.decisions {
            out.push_str(&format!("<li>{}</li>\n", escape_html(decision)));
        }
        out.push_str("</ul>\n");
    }
    out.push_str("</div>\n");

    if !topic.action_items.is_empty() {
        out.push_str(&action_table(topic.action_items.iter().map(|a| (None, a))));
    }
    for item in tail {
        out.push_str(&figure(item));
    }
    out.push_str("</section>\n");
    out
}

/// `label: value unit` for object data points, the plain text otherwise.
fn data_point(point: &Value) -> String {
    match point {
        Value::Object(map) => {
            let field = |key: &str| map.get(key).map(value_to_string).unwrap_or_default();
            let (label, value, unit) = (field("label"), field("value"), field("unit"));
            let amount = format!("{value} {unit}").trim().to_string();
            if label.is_empty() { amount } else { format!("{label}: {amount}") }
        }
        other => value_to_string(other),
    }
}

fn image_src(item: &ImageManifestItem) -> &str {
    item.image_base64
        .as_deref()
        .or(item.resolved_image_path.as_deref())
        .unwrap_or(&item.image_path)
}

fn caption(item: &ImageManifestItem) -> String {
    let text = if item.caption.trim().is_empty() {
        &item.content_summary
    } else {
        &item.caption
    };
    format!("{} ({})", escape_html(text.trim()), escape_html(&item.timestamp_hms))
}

fn figure(item: &ImageManifestItem) -> String {
    if item.is_before_after() {
        let own = image_src(item);
        let before = item.before_base64.as_deref().unwrap_or(own);
        let after = item.after_base64.as_deref().unwrap_or(own);
        return format!(
            "<div class=\"figure pair\">\n<figure><img src=\"{}\" alt=\"Before\" data-lightbox loading=\"lazy\">\
             <figcaption>Before</figcaption></figure>\n<figure><img src=\"{}\" alt=\"After\" data-lightbox loading=\"lazy\">\
             <figcaption>After</figcaption></figure>\n</div>\n<p class=\"doc-ref\">{}</p>\n",
            escape_html(before),
            escape_html(after),
            caption(item)
        );
    }
    match item.render_as {
        RenderAs::HtmlTable if item.table_html.trim_start().to_lowercase().starts_with("<table") => format!(
            "<div class=\"figure\">\n{}\n<p class=\"doc-ref\">{}</p>\n</div>\n",
            item.table_html.trim(),
            caption(item)
        ),
        RenderAs::PhotoLightbox | RenderAs::ChartEmbed => format!(
            "<figure class=\"figure\"><img src=\"{}\" alt=\"{}\" data-lightbox loading=\"lazy\">\
             <figcaption>{}</figcaption></figure>\n",
            escape_html(image_src(item)),
            escape_html(item.caption.trim()),
            caption(item)
        ),
        _ => format!("<p class=\"doc-ref\">Slide {}: {}</p>\n", item.capture_index, caption(item)),
    }
}

fn action_table<'a>(rows: impl Iterator<Item = (Option<&'a TopicSummary>, &'a ActionItem)>) -> String {
    let rows: Vec<_> = rows.collect();
    let with_topic = rows.iter().any(|(t, _)| t.is_some());
    let mut out = String::from("<table>\n<tr>");
    if with_topic {
        out.push_str("<th>Topic</th>");
    }
    out.push_str("<th>Task</th><th>Owner</th><th>Deadline</th></tr>\n");
    for (topic, action) in rows {
        out.push_str("<tr>");
        if let Some(topic) = topic {
            out.push_str(&format!("<td>{}</td>", escape_html(&topic.title)));
        }
        out.push_str(&format!(
            "<td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape_html(action.task()),
            escape_html(action.owner().unwrap_or("-")),
            escape_html(if action.deadline().is_empty() { "-" } else { action.deadline() })
        ));
    }
    out.push_str("</table>\n");
    out
}

fn decision_log(topics: &[TopicSummary]) -> String {
    let mut out = String::from("<h2 id=\"resolutions\">Resolutions</h2>\n");
    let rows: Vec<(&TopicSummary, &String)> = topics
        .iter()
        .flat_map(|t| t.decisions.iter().map(move |d| (t, d)))
        .collect();
    if rows.is_empty() {
        out.push_str(NO_DATA);
        return out;
    }
    out.push_str("<table>\n<tr><th>#</th><th>Topic</th><th>Decision</th></tr>\n");
    for (idx, (topic, decision)) in rows.into_iter().enumerate() {
        out.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            idx + 1,
            escape_html(&topic.title),
            escape_html(decision)
        ));
    }
    out.push_str("</table>\n");
    out
}

fn action_log(topics: &[TopicSummary]) -> String {
    let mut out = String::from("<h2 id=\"actions\">Action Items</h2>\n");
    let rows: Vec<_> = topics
        .iter()
        .flat_map(|t| t.action_items.iter().map(move |a| (Some(t), a)))
        .collect();
    if rows.is_empty() {
        out.push_str(NO_DATA);
    } else {
        out.push_str(&action_table(rows.into_iter()));
    }
    out
}

fn appendix(topics: &[TopicSummary]) -> String {
    let mut out = String::from("<h2 id=\"appendix\">Appendix</h2>\n<h3>Timeline</h3>\n");
    let spans: Vec<(u64, u64, &TopicSummary)> = topics
        .iter()
        .map(|t| {
            let start = hms_to_sec(&t.start_hms());
            (start, t.end_sec().unwrap_or(start).max(start), t)
        })
        .collect();
    let total = spans.iter().map(|(_, end, _)| *end).max().unwrap_or(0);
    if total == 0 {
        out.push_str(NO_DATA);
        return out;
    }
    out.push_str("<div class=\"timeline-bar\">\n");
    for (start, end, topic) in &spans {
        let left = *start as f64 * 100.0 / total as f64;
        let width = (*end - *start) as f64 * 100.0 / total as f64;
        out.push_str(&format!(
            "<span style=\"left:{left:.2}%;width:{width:.2}%\" title=\"{} ({})\"></span>\n",
            escape_html(&topic.title),
            escape_html(&topic.time_range)
        ));
    }
    out.push_str("</div>\n<ol>\n");
    for (_, _, topic) in &spans {
        out.push_str(&format!(
            "<li>{} · {}</li>\n",
            escape_html(&topic.time_range),
            escape_html(&topic.title)
        ));
    }
    out.push_str("</ol>\n");
    out
}
