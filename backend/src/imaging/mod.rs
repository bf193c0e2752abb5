pub mod format;
pub mod normalizer;

pub use format::SupportedFormat;
pub use normalizer::{encode_png, normalize, NormalizationSpec, NormalizedTensor, ResizePolicy};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("Declared format {declared} does not match the uploaded data ({detected})")]
    FormatMismatch {
        declared: SupportedFormat,
        detected: SupportedFormat,
    },
    #[error("Image data is corrupt or truncated: {0}")]
    Corrupt(String),
    #[error("Image has no pixels")]
    Empty,
}
