use image::ImageFormat;
use std::fmt;

use super::DecodeError;

/// Image encodings accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedFormat {
    Png,
    Jpeg,
    Bmp,
    Gif,
    Webp,
}

impl SupportedFormat {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => Some(SupportedFormat::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(SupportedFormat::Jpeg),
            "image/bmp" | "image/x-ms-bmp" => Some(SupportedFormat::Bmp),
            "image/gif" => Some(SupportedFormat::Gif),
            "image/webp" => Some(SupportedFormat::Webp),
            _ => None,
        }
    }

    /// Detects the format from the leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            ImageFormat::Png => Some(SupportedFormat::Png),
            ImageFormat::Jpeg => Some(SupportedFormat::Jpeg),
            ImageFormat::Bmp => Some(SupportedFormat::Bmp),
            ImageFormat::Gif => Some(SupportedFormat::Gif),
            ImageFormat::WebP => Some(SupportedFormat::Webp),
            _ => None,
        }
    }

    /// Resolves the format of an upload from its declared content type and its
    /// bytes. Generic or absent content types fall back to sniffing; a declared
    /// image type must agree with the data.
    pub fn resolve(declared: Option<&str>, bytes: &[u8]) -> Result<Self, DecodeError> {
        let detected = Self::sniff(bytes);
        let declared = declared
            .map(str::trim)
            .filter(|ct| !ct.is_empty() && !ct.starts_with("application/octet-stream"));

        match (declared, detected) {
            (None, Some(detected)) => Ok(detected),
            (None, None) => Err(DecodeError::UnsupportedFormat(
                "unrecognized image data".to_string(),
            )),
            (Some(ct), detected) => {
                let declared = Self::from_content_type(ct)
                    .ok_or_else(|| DecodeError::UnsupportedFormat(ct.to_string()))?;
                match detected {
                    Some(detected) if detected == declared => Ok(declared),
                    Some(detected) => Err(DecodeError::FormatMismatch { declared, detected }),
                    None => Err(DecodeError::Corrupt(format!(
                        "data is not a valid {} image",
                        declared
                    ))),
                }
            }
        }
    }

    pub fn image_format(&self) -> ImageFormat {
        match self {
            SupportedFormat::Png => ImageFormat::Png,
            SupportedFormat::Jpeg => ImageFormat::Jpeg,
            SupportedFormat::Bmp => ImageFormat::Bmp,
            SupportedFormat::Gif => ImageFormat::Gif,
            SupportedFormat::Webp => ImageFormat::WebP,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            SupportedFormat::Png => "image/png",
            SupportedFormat::Jpeg => "image/jpeg",
            SupportedFormat::Bmp => "image/bmp",
            SupportedFormat::Gif => "image/gif",
            SupportedFormat::Webp => "image/webp",
        }
    }
}

impl fmt::Display for SupportedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}
