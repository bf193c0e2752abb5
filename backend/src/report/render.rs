use askama::Template;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::{DrawingReport, SelfTestReport};

struct DrawingView<'a> {
    title: &'static str,
    predicted_label: &'a str,
    confidence: String,
    bucket: &'static str,
    positive_score: String,
    preview_base64: String,
}

impl<'a> DrawingView<'a> {
    fn new(drawing: &'a DrawingReport) -> Self {
        Self {
            title: drawing.kind.title(),
            predicted_label: &drawing.report.predicted_label,
            confidence: percent(drawing.report.confidence),
            bucket: drawing.report.bucket.description(),
            positive_score: percent(drawing.positive_score),
            preview_base64: STANDARD.encode(&drawing.preview_png),
        }
    }
}

#[derive(Template)]
#[template(path = "report.html")]
struct ReportTemplate<'a> {
    date: String,
    name: &'a str,
    age: u32,
    gender: String,
    result_message: &'static str,
    next_steps: &'static str,
    score: String,
    outcome: String,
    drawings: Vec<DrawingView<'a>>,
}

fn percent(value: f32) -> String {
    format!("{:.2}%", value * 100.0)
}

/// Renders the downloadable HTML report. Patient-provided text is escaped.
pub fn render_html(report: &SelfTestReport) -> Result<String, askama::Error> {
    let template = ReportTemplate {
        date: report.created_at.format("%B %d, %Y").to_string(),
        name: &report.patient.name,
        age: report.patient.age,
        gender: report.patient.gender.to_string(),
        result_message: report.verdict.message(),
        next_steps: report.verdict.next_steps(),
        score: percent(report.verdict.score),
        outcome: report.verdict.outcome.to_string(),
        drawings: report.drawings().into_iter().map(DrawingView::new).collect(),
    };
    template.render()
}
