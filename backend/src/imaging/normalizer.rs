use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use shared::InputShape;
use std::io::Cursor;

use super::{DecodeError, SupportedFormat};

/// How an image is brought to the classifier's input dimensions.
///
/// Both policies use a triangle (bilinear) filter, so the result depends only
/// on the input pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizePolicy {
    /// Resize exactly to the target, ignoring aspect ratio.
    #[default]
    Stretch,
    /// Preserve aspect ratio while covering the target, then crop the overflow
    /// evenly from both sides.
    FitCrop,
}

/// Preprocessing applied before a drawing reaches its classifier.
///
/// Single-channel models get BT.601 luma, `Y = 0.299 R + 0.587 G + 0.114 B`,
/// computed in 14-bit fixed point with rounding (the OpenCV `BGR2GRAY`
/// formula). Three-channel models get plain RGB.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationSpec {
    pub shape: InputShape,
    pub resize: ResizePolicy,
    /// Drawings are dark ink on light paper; inverting makes strokes high.
    pub invert: bool,
    pub mean: Option<Vec<f32>>,
    pub std: Option<Vec<f32>>,
}

impl NormalizationSpec {
    pub fn new(shape: InputShape) -> Self {
        Self {
            shape,
            resize: ResizePolicy::Stretch,
            invert: true,
            mean: None,
            std: None,
        }
    }
}

/// Classifier input laid out as height × width × channels.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTensor {
    data: Array3<f32>,
}

impl NormalizedTensor {
    pub fn zeros(shape: InputShape) -> Self {
        Self {
            data: Array3::zeros((
                shape.height as usize,
                shape.width as usize,
                shape.channels as usize,
            )),
        }
    }

    pub fn from_array(data: Array3<f32>) -> Self {
        Self { data }
    }

    pub fn shape(&self) -> InputShape {
        let (height, width, channels) = self.data.dim();
        InputShape::new(width as u32, height as u32, channels as u32)
    }

    pub fn as_array(&self) -> &Array3<f32> {
        &self.data
    }

    /// Row-major values in height, width, channel order.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }
}

/// Output of [`normalize`]: the model input and the processed image it was
/// built from, kept for the rendered report.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub tensor: NormalizedTensor,
    pub preview: DynamicImage,
}

pub fn normalize(
    bytes: &[u8],
    declared_content_type: Option<&str>,
    spec: &NormalizationSpec,
) -> Result<Normalized, DecodeError> {
    let format = SupportedFormat::resolve(declared_content_type, bytes)?;
    let decoded = image::load_from_memory_with_format(bytes, format.image_format())
        .map_err(|e| DecodeError::Corrupt(e.to_string()))?;
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(DecodeError::Empty);
    }
    log::debug!(
        "Decoded {} image {}x{}",
        format,
        decoded.width(),
        decoded.height()
    );

    let converted = match spec.shape.channels {
        1 => DynamicImage::ImageLuma8(to_gray_bt601(&decoded)),
        _ => DynamicImage::ImageRgb8(decoded.to_rgb8()),
    };

    let mut processed = resize(&converted, spec.shape, spec.resize);
    if spec.invert {
        processed.invert();
    }

    let tensor = to_tensor(&processed, spec)?;
    Ok(Normalized {
        tensor,
        preview: processed,
    })
}

fn to_gray_bt601(image: &DynamicImage) -> GrayImage {
    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = (u32::from(r) * 4899 + u32::from(g) * 9617 + u32::from(b) * 1868 + (1 << 13)) >> 14;
        Luma([luma as u8])
    })
}

fn resize(image: &DynamicImage, shape: InputShape, policy: ResizePolicy) -> DynamicImage {
    match policy {
        ResizePolicy::Stretch => image.resize_exact(shape.width, shape.height, FilterType::Triangle),
        ResizePolicy::FitCrop => {
            image.resize_to_fill(shape.width, shape.height, FilterType::Triangle)
        }
    }
}

fn to_tensor(image: &DynamicImage, spec: &NormalizationSpec) -> Result<NormalizedTensor, DecodeError> {
    let shape = spec.shape;
    let raw = match shape.channels {
        1 => image.to_luma8().into_raw(),
        _ => image.to_rgb8().into_raw(),
    };
    let scaled: Vec<f32> = raw.into_iter().map(|v| v as f32 / 255.0).collect();

    let mut data = Array3::from_shape_vec(
        (
            shape.height as usize,
            shape.width as usize,
            shape.channels as usize,
        ),
        scaled,
    )
    .map_err(|e| DecodeError::Corrupt(e.to_string()))?;

    if let (Some(mean), Some(deviation)) = (&spec.mean, &spec.std) {
        for ((_, _, channel), value) in data.indexed_iter_mut() {
            *value = (*value - mean[channel]) / deviation[channel];
        }
    }

    Ok(NormalizedTensor::from_array(data))
}

/// Encodes a processed image as PNG for embedding in reports.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}
