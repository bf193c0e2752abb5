pub mod runner;
#[cfg(feature = "torch")]
pub mod torch;

use serde::{Deserialize, Serialize};
use shared::{DrawingKind, InputShape, LabelScore};
use std::path::PathBuf;

use crate::imaging::NormalizedTensor;

pub use runner::ModelRunner;

/// Probability mass may drift this far from 1 before a result is rejected.
pub const PROBABILITY_SUM_TOLERANCE: f32 = 1e-3;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("The {0} model is not loaded")]
    ModelNotLoaded(DrawingKind),
    #[error("Input shape {actual} does not match the {kind} model input {expected}")]
    ShapeMismatch {
        kind: DrawingKind,
        expected: InputShape,
        actual: InputShape,
    },
    #[error("Model produced invalid output: {0}")]
    InvalidOutput(String),
    #[error("Model backend error: {0}")]
    Backend(String),
}

#[cfg(feature = "torch")]
impl From<tch::TchError> for InferenceError {
    fn from(err: tch::TchError) -> Self {
        InferenceError::Backend(err.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Required {kind} model file is not readable at {}: {source}", path.display())]
    MissingWeights {
        kind: DrawingKind,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to load the {kind} model from {}: {message}", path.display())]
    LoadFailed {
        kind: DrawingKind,
        path: PathBuf,
        message: String,
    },
    #[error("No model backend compiled in; rebuild with the `torch` feature")]
    BackendUnavailable,
    #[error("The {kind} model failed its warm-up prediction: {source}")]
    WarmUp {
        kind: DrawingKind,
        source: InferenceError,
    },
}

/// A pre-trained image classifier. Implementations must be pure: the same
/// tensor always yields the same raw output.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    fn forward(&self, input: &NormalizedTensor) -> Result<Vec<f32>, InferenceError>;
}

/// Meaning of the raw values a classifier emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// A single sigmoid unit holding the probability of the positive label.
    #[default]
    BinaryProbability,
    /// Unnormalized scores, one per label.
    Logits,
    /// A probability distribution, one entry per label.
    Probabilities,
}

/// Memory layout the classifier expects for its batched input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    #[default]
    Nchw,
    Nhwc,
}

/// Per-label probabilities in the model's label order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    scores: Vec<LabelScore>,
}

impl ClassificationResult {
    pub fn new(scores: Vec<LabelScore>) -> Self {
        Self { scores }
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, f32)>) -> Self {
        Self::new(
            pairs
                .into_iter()
                .map(|(label, probability)| LabelScore {
                    label: label.to_string(),
                    probability,
                })
                .collect(),
        )
    }

    /// Maps raw classifier output onto `labels`.
    ///
    /// For [`OutputKind::BinaryProbability`] the single value is the
    /// probability of `positive_label`; the remaining label receives the
    /// complement.
    pub fn from_raw(
        raw: &[f32],
        labels: &[String],
        positive_label: &str,
        output: OutputKind,
    ) -> Result<Self, InferenceError> {
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(InferenceError::InvalidOutput(
                "non-finite value in model output".to_string(),
            ));
        }

        let probabilities = match output {
            OutputKind::BinaryProbability => {
                if raw.len() != 1 || labels.len() != 2 {
                    return Err(InferenceError::InvalidOutput(format!(
                        "expected one value for two labels, got {} values for {} labels",
                        raw.len(),
                        labels.len()
                    )));
                }
                let p = raw[0];
                labels
                    .iter()
                    .map(|label| if label == positive_label { p } else { 1.0 - p })
                    .collect()
            }
            OutputKind::Logits => {
                expect_len(raw, labels)?;
                softmax(raw)
            }
            OutputKind::Probabilities => {
                expect_len(raw, labels)?;
                raw.to_vec()
            }
        };

        if let Some(p) = probabilities.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(InferenceError::InvalidOutput(format!(
                "probability {} outside [0, 1]",
                p
            )));
        }
        let total: f32 = probabilities.iter().sum();
        if (total - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
            return Err(InferenceError::InvalidOutput(format!(
                "probabilities sum to {}",
                total
            )));
        }

        Ok(Self::new(
            labels
                .iter()
                .zip(probabilities)
                .map(|(label, probability)| LabelScore {
                    label: label.clone(),
                    probability,
                })
                .collect(),
        ))
    }

    pub fn scores(&self) -> &[LabelScore] {
        &self.scores
    }

    pub fn probability(&self, label: &str) -> Option<f32> {
        self.scores
            .iter()
            .find(|s| s.label == label)
            .map(|s| s.probability)
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

fn expect_len(raw: &[f32], labels: &[String]) -> Result<(), InferenceError> {
    if raw.len() != labels.len() {
        return Err(InferenceError::InvalidOutput(format!(
            "expected {} values, got {}",
            labels.len(),
            raw.len()
        )));
    }
    Ok(())
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}
