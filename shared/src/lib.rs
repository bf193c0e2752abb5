use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;
use strum_macros::{AsRefStr, EnumIter, EnumString};
use uuid::Uuid;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    EnumIter,
    AsRefStr,
    strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DrawingKind {
    Spiral,
    Wave,
}

impl DrawingKind {
    pub fn title(&self) -> &'static str {
        match self {
            DrawingKind::Spiral => "Spiral",
            DrawingKind::Wave => "Wave",
        }
    }
}

/// Fixed input dimensions of a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[display(fmt = "{}x{}x{}", width, height, channels)]
pub struct InputShape {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl InputShape {
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, strum_macros::Display)]
pub enum Gender {
    Male,
    Female,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientInfo {
    #[serde(deserialize_with = "trimmed")]
    pub name: String,
    #[serde(deserialize_with = "whole_years")]
    pub age: u32,
    #[serde(deserialize_with = "trimmed_gender")]
    pub gender: Gender,
}

fn trimmed<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(String::deserialize(deserializer)?.trim().to_string())
}

fn trimmed_gender<'de, D>(deserializer: D) -> Result<Gender, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Gender::from_str(raw.trim())
        .map_err(|_| serde::de::Error::custom(format!("unknown gender '{}'", raw)))
}

// Browser forms send the age as a string; fractional years are truncated.
fn whole_years<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Whole(u32),
        Fractional(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Whole(n) => Ok(n),
        Raw::Fractional(f) if f.is_finite() && (0.0..=u32::MAX as f64).contains(&f) => {
            Ok(f.trunc() as u32)
        }
        Raw::Fractional(f) => Err(serde::de::Error::custom(format!("age {} out of range", f))),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Confidence category of a prediction, ordered from weakest to strongest.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConfidenceBucket {
    Inconclusive,
    PossibleIndicator,
    StrongIndicator,
}

impl ConfidenceBucket {
    pub fn description(&self) -> &'static str {
        match self {
            ConfidenceBucket::Inconclusive => "Inconclusive",
            ConfidenceBucket::PossibleIndicator => "Possible indicator",
            ConfidenceBucket::StrongIndicator => "Strong indicator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Positive,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub probability: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawingSummary {
    pub kind: DrawingKind,
    pub predicted_label: String,
    pub confidence: f32,
    pub bucket: ConfidenceBucket,
    pub positive_score: f32,
    pub probabilities: Vec<LabelScore>,
    pub image_sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictSummary {
    pub outcome: Outcome,
    pub score: f32,
    pub deciding_drawing: DrawingKind,
    pub message: String,
    pub next_steps: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub patient: PatientInfo,
    pub spiral: DrawingSummary,
    pub wave: DrawingSummary,
    pub verdict: VerdictSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub status: String,
    pub message: String,
    pub report_id: Uuid,
    pub report_url: String,
    pub report: ReportSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    pub kind: DrawingKind,
    pub input_shape: InputShape,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub models: Vec<ModelStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            message: message.into(),
        }
    }
}
