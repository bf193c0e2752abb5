pub mod render;
pub mod selftest;

use serde::{Deserialize, Serialize};
use shared::{ConfidenceBucket, LabelScore};

use crate::inference::{ClassificationResult, PROBABILITY_SUM_TOLERANCE};

pub use render::render_html;
pub use selftest::{DrawingReport, SelfTestReport};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Invalid classification result: {0}")]
    InvalidResult(String),
}

/// Confidence cut-offs for [`ConfidenceBucket`].
///
/// `c < possible` is inconclusive, `possible <= c <= strong` a possible
/// indicator, and `c > strong` a strong indicator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceThresholds {
    pub possible: f32,
    pub strong: f32,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            possible: 0.5,
            strong: 0.8,
        }
    }
}

impl ConfidenceThresholds {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.possible) || !(0.0..=1.0).contains(&self.strong) {
            return Err("confidence thresholds must lie in [0, 1]".to_string());
        }
        if self.possible > self.strong {
            return Err(format!(
                "possible threshold {} exceeds strong threshold {}",
                self.possible, self.strong
            ));
        }
        Ok(())
    }

    pub fn bucket(&self, confidence: f32) -> ConfidenceBucket {
        if confidence < self.possible {
            ConfidenceBucket::Inconclusive
        } else if confidence <= self.strong {
            ConfidenceBucket::PossibleIndicator
        } else {
            ConfidenceBucket::StrongIndicator
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub predicted_label: String,
    pub confidence: f32,
    pub bucket: ConfidenceBucket,
    pub probabilities: Vec<LabelScore>,
}

#[derive(Debug, Clone, Default)]
pub struct ReportBuilder {
    thresholds: ConfidenceThresholds,
}

impl ReportBuilder {
    pub fn new(thresholds: ConfidenceThresholds) -> Self {
        Self { thresholds }
    }

    /// Picks the most probable label. Equal probabilities resolve to the label
    /// listed first in `label_priority`; unlisted labels rank after listed ones
    /// in result order.
    pub fn build(
        &self,
        result: &ClassificationResult,
        label_priority: &[String],
    ) -> Result<Report, ReportError> {
        validate(result)?;

        let rank = |index: usize, label: &str| {
            label_priority
                .iter()
                .position(|p| p == label)
                .unwrap_or(label_priority.len() + index)
        };

        let mut best: Option<(usize, &LabelScore)> = None;
        for (index, score) in result.scores().iter().enumerate() {
            best = match best {
                Some((best_index, current))
                    if current.probability > score.probability
                        || (current.probability == score.probability
                            && rank(best_index, &current.label) <= rank(index, &score.label)) =>
                {
                    Some((best_index, current))
                }
                _ => Some((index, score)),
            };
        }
        let (_, predicted) = best.ok_or_else(|| ReportError::InvalidResult("no labels".to_string()))?;

        Ok(Report {
            predicted_label: predicted.label.clone(),
            confidence: predicted.probability,
            bucket: self.thresholds.bucket(predicted.probability),
            probabilities: result.scores().to_vec(),
        })
    }
}

fn validate(result: &ClassificationResult) -> Result<(), ReportError> {
    if result.is_empty() {
        return Err(ReportError::InvalidResult("result has no labels".to_string()));
    }
    if let Some(score) = result
        .scores()
        .iter()
        .find(|s| !s.probability.is_finite() || !(0.0..=1.0).contains(&s.probability))
    {
        return Err(ReportError::InvalidResult(format!(
            "label '{}' has probability {}",
            score.label, score.probability
        )));
    }
    let total: f32 = result.scores().iter().map(|s| s.probability).sum();
    if (total - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
        return Err(ReportError::InvalidResult(format!(
            "probabilities sum to {}",
            total
        )));
    }
    Ok(())
}
