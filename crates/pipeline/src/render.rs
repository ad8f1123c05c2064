use agents::{Mcq, StructuredAnalysis};
use serde::Serialize;
use std::fmt::Write;
use validator::ValidationReport;

/// Markdown view of an analysis for clients that render text, not records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkdownRendering {
    pub analysis: String,
    pub mains_questions: String,
    pub summary: String,
}

impl MarkdownRendering {
    /// Run the question-markup quality gate over the rendered prelims section.
    pub fn validate(&self) -> ValidationReport {
        validator::validate(&self.analysis)
    }
}

fn escape_text(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(raw: &str) -> String {
    escape_text(raw).replace('"', "&quot;")
}

fn render_mcq(out: &mut String, mcq: &Mcq) {
    let _ = write!(out, "<mcq question=\"{}\"", escape_attr(mcq.question.trim()));
    if let Some(difficulty) = mcq.difficulty {
        let _ = write!(out, " difficultyScore=\"{}\"", difficulty);
    }
    if let Some(subject) = &mcq.subject {
        let _ = write!(out, " subject=\"{}\"", escape_attr(subject));
    }
    out.push_str(">\n");

    for option in &mcq.options {
        if option.is_correct() {
            let _ = writeln!(out, "  <option correct=\"true\">{}</option>", escape_text(&option.text));
        } else {
            let _ = writeln!(out, "  <option>{}</option>", escape_text(&option.text));
        }
    }
    if let Some(explanation) = &mcq.explanation {
        let _ = writeln!(out, "  <explanation>{}</explanation>", escape_text(explanation));
    }
    out.push_str("</mcq>\n\n");
}

pub fn render_markdown(analysis: &StructuredAnalysis) -> MarkdownRendering {
    let mut body = String::new();

    if let Some(topic) = &analysis.syllabus_topic {
        let _ = writeln!(body, "**Syllabus topic:** {}\n", topic);
    }
    if !analysis.tags.is_empty() {
        let _ = writeln!(body, "**Tags:** {}\n", analysis.tags.join(", "));
    }

    if !analysis.prelims.mcqs.is_empty() {
        body.push_str("## Prelims Practice\n\n");
        for mcq in &analysis.prelims.mcqs {
            render_mcq(&mut body, mcq);
        }
    }

    if let Some(graph) = analysis.knowledge_graph.as_ref().filter(|g| !g.nodes.is_empty()) {
        body.push_str("## Key Entities\n\n");
        for node in &graph.nodes {
            let _ = writeln!(body, "- **{}** ({:?})", node.label, node.node_type);
        }
        if !graph.edges.is_empty() {
            body.push('\n');
            for edge in &graph.edges {
                let label_of = |id: &str| {
                    graph
                        .nodes
                        .iter()
                        .find(|n| n.id == id)
                        .map(|n| n.label.clone())
                        .unwrap_or_else(|| id.to_string())
                };
                let _ = writeln!(
                    body,
                    "- {} → {} → {}",
                    label_of(&edge.source),
                    edge.label,
                    label_of(&edge.target)
                );
            }
        }
    }

    let mut mains = String::new();
    for (i, question) in analysis.mains_questions().iter().enumerate() {
        let _ = write!(mains, "{}. {}", i + 1, question.question.trim());
        if let Some(difficulty) = question.difficulty {
            let _ = write!(mains, " *(difficulty {}/10)*", difficulty);
        }
        mains.push('\n');
        if let Some(guidance) = &question.guidance {
            let _ = writeln!(mains, "   - *Guidance:* {}", guidance.trim());
        }
    }

    MarkdownRendering {
        analysis: body.trim_end().to_string(),
        mains_questions: mains.trim_end().to_string(),
        summary: analysis.non_empty_summary().unwrap_or_default().trim().to_string(),
    }
}
