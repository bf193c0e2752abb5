use shared::{DrawingKind, PatientInfo};

use crate::config::AppConfig;
use crate::imaging::{encode_png, normalize, DecodeError};
use crate::inference::{InferenceError, ModelRunner};
use crate::report::{DrawingReport, ReportBuilder, ReportError, SelfTestReport};
use crate::storage::ReportStore;

pub const MIN_AGE: u32 = 18;
pub const MAX_AGE: u32 = 60;
pub const INVALID_PATIENT_MESSAGE: &str =
    "Invalid user information. Please provide name, age (18-60), and gender.";

/// An uploaded file as received from the client.
#[derive(Debug, Clone, Default)]
pub struct UploadedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("Failed to encode drawing preview: {0}")]
    Preview(#[from] image::ImageError),
}

/// Immutable state shared by every request: the loaded models and the rules
/// for turning their output into reports.
pub struct AppContext {
    runner: ModelRunner,
    builder: ReportBuilder,
    decision_threshold: f32,
    max_upload_bytes: usize,
}

impl AppContext {
    pub fn new(
        runner: ModelRunner,
        builder: ReportBuilder,
        decision_threshold: f32,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            runner,
            builder,
            decision_threshold,
            max_upload_bytes,
        }
    }

    pub fn from_config(config: &AppConfig, runner: ModelRunner) -> Self {
        Self::new(
            runner,
            ReportBuilder::new(config.report.thresholds),
            config.report.decision_threshold,
            config.server.max_upload_bytes,
        )
    }

    pub fn runner(&self) -> &ModelRunner {
        &self.runner
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    pub fn validate_upload<'a>(
        &self,
        field: &str,
        upload: Option<&'a UploadedImage>,
    ) -> Result<&'a UploadedImage, AnalysisError> {
        let upload = upload
            .ok_or_else(|| AnalysisError::Validation(format!("Missing '{}' drawing", field)))?;
        if upload.bytes.is_empty() {
            return Err(AnalysisError::Validation(format!(
                "The '{}' drawing is empty",
                field
            )));
        }
        if upload.bytes.len() > self.max_upload_bytes {
            return Err(AnalysisError::Validation(format!(
                "The '{}' drawing exceeds the {} byte limit",
                field, self.max_upload_bytes
            )));
        }
        Ok(upload)
    }

    /// Normalizes, classifies and reports on one drawing.
    pub fn analyze_drawing(
        &self,
        kind: DrawingKind,
        upload: &UploadedImage,
    ) -> Result<DrawingReport, AnalysisError> {
        let upload = self.validate_upload(kind.as_ref(), Some(upload))?;
        let spec = self.runner.spec(kind)?;

        let normalized = normalize(
            &upload.bytes,
            upload.content_type.as_deref(),
            &spec.normalization(),
        )?;
        let result = self.runner.infer(&normalized.tensor, kind)?;
        let report = self.builder.build(&result, &spec.label_priority)?;
        let positive_score = result.probability(&spec.positive_label).ok_or_else(|| {
            ReportError::InvalidResult(format!(
                "positive label '{}' missing from result",
                spec.positive_label
            ))
        })?;

        log::info!(
            "{} drawing classified as {} ({:.3}, {})",
            kind.title(),
            report.predicted_label,
            report.confidence,
            report.bucket
        );

        Ok(DrawingReport {
            kind,
            report,
            positive_score,
            image_sha256: ReportStore::calculate_image_hash(&upload.bytes),
            preview_png: encode_png(&normalized.preview)?,
        })
    }

    /// Runs the full self-test. Both drawings are validated before either is
    /// analyzed.
    pub fn run_self_test(
        &self,
        patient: PatientInfo,
        spiral: Option<&UploadedImage>,
        wave: Option<&UploadedImage>,
    ) -> Result<SelfTestReport, AnalysisError> {
        if spiral.is_none() || wave.is_none() {
            return Err(AnalysisError::Validation(
                "Both spiral and wave drawings are required".to_string(),
            ));
        }
        let spiral = self.validate_upload(DrawingKind::Spiral.as_ref(), spiral)?;
        let wave = self.validate_upload(DrawingKind::Wave.as_ref(), wave)?;
        validate_patient(&patient)?;

        let spiral = self.analyze_drawing(DrawingKind::Spiral, spiral)?;
        let wave = self.analyze_drawing(DrawingKind::Wave, wave)?;
        let report = SelfTestReport::new(patient, spiral, wave, self.decision_threshold);
        log::info!(
            "Self-test {} verdict: {} ({:.3}, decided by {})",
            report.id,
            report.verdict.outcome,
            report.verdict.score,
            report.verdict.deciding_drawing
        );
        Ok(report)
    }
}

pub fn validate_patient(patient: &PatientInfo) -> Result<(), AnalysisError> {
    if patient.name.trim().is_empty() || !(MIN_AGE..=MAX_AGE).contains(&patient.age) {
        return Err(AnalysisError::Validation(
            INVALID_PATIENT_MESSAGE.to_string(),
        ));
    }
    Ok(())
}
