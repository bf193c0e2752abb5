use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{DrawingKind, DrawingSummary, Outcome, PatientInfo, ReportSummary, VerdictSummary};
use uuid::Uuid;

use super::Report;

const NEGATIVE_MESSAGE: &str = "No significant indicators of Parkinson's disease detected";
const NEGATIVE_NEXT_STEPS: &str = "Continue with regular health check-ups and maintain a healthy lifestyle. If you have any concerns, consult with your healthcare provider during your next routine visit.";
const POSITIVE_MESSAGE: &str = "Our analysis indicates potential early signs of Parkinson's disease";
const POSITIVE_NEXT_STEPS: &str =
    "We recommend consulting a neurologist within the next 2-4 weeks for a professional evaluation.";

/// A single drawing's report together with what is needed to present it.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawingReport {
    pub kind: DrawingKind,
    pub report: Report,
    /// Probability of the model's positive label.
    pub positive_score: f32,
    pub image_sha256: String,
    pub preview_png: Vec<u8>,
}

impl DrawingReport {
    pub fn summary(&self) -> DrawingSummary {
        DrawingSummary {
            kind: self.kind,
            predicted_label: self.report.predicted_label.clone(),
            confidence: self.report.confidence,
            bucket: self.report.bucket,
            positive_score: self.positive_score,
            probabilities: self.report.probabilities.clone(),
            image_sha256: self.image_sha256.clone(),
        }
    }
}

/// Outcome of a combined spiral and wave test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CombinedVerdict {
    pub outcome: Outcome,
    pub score: f32,
    pub deciding_drawing: DrawingKind,
}

impl CombinedVerdict {
    /// A test is positive only when both drawings score above `threshold`.
    /// A negative verdict reports the first drawing (spiral, then wave) at or
    /// below the threshold; a positive one reports the higher of the two.
    pub fn combine(spiral_score: f32, wave_score: f32, threshold: f32) -> Self {
        if spiral_score <= threshold {
            Self {
                outcome: Outcome::Negative,
                score: spiral_score,
                deciding_drawing: DrawingKind::Spiral,
            }
        } else if wave_score <= threshold {
            Self {
                outcome: Outcome::Negative,
                score: wave_score,
                deciding_drawing: DrawingKind::Wave,
            }
        } else if wave_score > spiral_score {
            Self {
                outcome: Outcome::Positive,
                score: wave_score,
                deciding_drawing: DrawingKind::Wave,
            }
        } else {
            Self {
                outcome: Outcome::Positive,
                score: spiral_score,
                deciding_drawing: DrawingKind::Spiral,
            }
        }
    }

    pub fn message(&self) -> &'static str {
        match self.outcome {
            Outcome::Positive => POSITIVE_MESSAGE,
            Outcome::Negative => NEGATIVE_MESSAGE,
        }
    }

    pub fn next_steps(&self) -> &'static str {
        match self.outcome {
            Outcome::Positive => POSITIVE_NEXT_STEPS,
            Outcome::Negative => NEGATIVE_NEXT_STEPS,
        }
    }

    pub fn summary(&self) -> VerdictSummary {
        VerdictSummary {
            outcome: self.outcome,
            score: self.score,
            deciding_drawing: self.deciding_drawing,
            message: self.message().to_string(),
            next_steps: self.next_steps().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelfTestReport {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub patient: PatientInfo,
    pub spiral: DrawingReport,
    pub wave: DrawingReport,
    pub verdict: CombinedVerdict,
}

impl SelfTestReport {
    pub fn new(
        patient: PatientInfo,
        spiral: DrawingReport,
        wave: DrawingReport,
        decision_threshold: f32,
    ) -> Self {
        let verdict =
            CombinedVerdict::combine(spiral.positive_score, wave.positive_score, decision_threshold);
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            patient,
            spiral,
            wave,
            verdict,
        }
    }

    pub fn drawings(&self) -> [&DrawingReport; 2] {
        [&self.spiral, &self.wave]
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            id: self.id,
            created_at: self.created_at,
            patient: self.patient.clone(),
            spiral: self.spiral.summary(),
            wave: self.wave.summary(),
            verdict: self.verdict.summary(),
        }
    }
}

/// File name offered when downloading a report, e.g.
/// `Parkinsons_Report_Jane_Doe_20260301.html`.
pub fn download_name(summary: &ReportSummary) -> String {
    let name: String = summary
        .patient
        .name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!(
        "Parkinsons_Report_{}_{}.html",
        name,
        summary.created_at.format("%Y%m%d")
    )
}
