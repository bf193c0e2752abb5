//! Fixtures shared by the unit tests.

use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use shared::{DrawingKind, Gender, InputShape, PatientInfo};
use std::io::Cursor;
use std::sync::Arc;

use crate::analysis::{AppContext, UploadedImage};
use crate::config::ModelSpec;
use crate::inference::{Classifier, InferenceError, ModelRunner};
use crate::imaging::NormalizedTensor;
use crate::report::{DrawingReport, Report, ReportBuilder};

pub const SPIRAL_SHAPE: InputShape = InputShape {
    width: 32,
    height: 32,
    channels: 1,
};
pub const WAVE_SHAPE: InputShape = InputShape {
    width: 44,
    height: 20,
    channels: 1,
};

/// Always emits the same positive-class probability.
pub struct ConstantClassifier {
    value: f32,
}

impl ConstantClassifier {
    pub fn new(value: f32) -> Self {
        Self { value }
    }
}

impl Classifier for ConstantClassifier {
    fn name(&self) -> &str {
        "constant"
    }

    fn forward(&self, _input: &NormalizedTensor) -> Result<Vec<f32>, InferenceError> {
        Ok(vec![self.value])
    }
}

/// Scores a drawing by its mean ink coverage.
pub struct MeanInkClassifier;

impl Classifier for MeanInkClassifier {
    fn name(&self) -> &str {
        "mean-ink"
    }

    fn forward(&self, input: &NormalizedTensor) -> Result<Vec<f32>, InferenceError> {
        let mean = input
            .as_array()
            .mean()
            .ok_or_else(|| InferenceError::Backend("empty input".to_string()))?;
        Ok(vec![mean.clamp(0.0, 1.0)])
    }
}

pub fn test_runner() -> ModelRunner {
    ModelRunner::empty()
        .with_model(
            DrawingKind::Spiral,
            ModelSpec::with_input("spiral.pt", SPIRAL_SHAPE),
            Arc::new(MeanInkClassifier),
        )
        .with_model(
            DrawingKind::Wave,
            ModelSpec::with_input("wave.pt", WAVE_SHAPE),
            Arc::new(MeanInkClassifier),
        )
}

pub fn test_context() -> AppContext {
    AppContext::new(test_runner(), ReportBuilder::default(), 0.5, 1024 * 1024)
}

pub fn solid_png(width: u32, height: u32, value: u8) -> Vec<u8> {
    encode(DynamicImage::ImageLuma8(GrayImage::from_pixel(
        width,
        height,
        Luma([value]),
    )))
}

pub fn gradient_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x + y) % 256) as u8,
        ])
    });
    encode(DynamicImage::ImageRgb8(img))
}

/// RGB noise that PNG cannot compress; the encoding is about `3 * w * h` bytes.
pub fn noise_png(width: u32, height: u32) -> Vec<u8> {
    let mut state: u32 = 0x9E37_79B9;
    let img = RgbImage::from_fn(width, height, |_, _| {
        Rgb([
            xorshift(&mut state),
            xorshift(&mut state),
            xorshift(&mut state),
        ])
    });
    encode(DynamicImage::ImageRgb8(img))
}

fn xorshift(state: &mut u32) -> u8 {
    *state ^= *state << 13;
    *state ^= *state >> 17;
    *state ^= *state << 5;
    (*state >> 24) as u8
}

fn encode(img: DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode test image");
    bytes
}

pub fn upload(bytes: Vec<u8>, content_type: &str) -> UploadedImage {
    UploadedImage {
        bytes,
        content_type: Some(content_type.to_string()),
    }
}

pub fn patient() -> PatientInfo {
    PatientInfo {
        name: "Jane Doe".to_string(),
        age: 42,
        gender: Gender::Female,
    }
}

pub fn drawing_report(kind: DrawingKind, positive_score: f32) -> DrawingReport {
    let builder = ReportBuilder::default();
    let result = crate::inference::ClassificationResult::from_pairs([
        ("healthy", 1.0 - positive_score),
        ("parkinson", positive_score),
    ]);
    let report: Report = builder
        .build(&result, &["healthy".to_string(), "parkinson".to_string()])
        .expect("valid fixture result");
    DrawingReport {
        kind,
        report,
        positive_score,
        image_sha256: "0".repeat(64),
        preview_png: solid_png(4, 4, 128),
    }
}
