use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::error::{Result, ServeError};
use crate::render::RgbaBuffer;

/// Output image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageFormat {
    #[default]
    Png,
}

impl ImageFormat {
    #[must_use]
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
        }
    }
}

/// Encode an RGBA buffer.
pub fn encode(buffer: &RgbaBuffer, format: ImageFormat) -> Result<Vec<u8>> {
    let expected = buffer.width * buffer.height * 4;
    if buffer.data.len() != expected || buffer.width == 0 || buffer.height == 0 {
        return Err(ServeError::EncodeInvariantViolation(format!(
            "{}x{} RGBA buffer holds {} bytes, expected {expected}",
            buffer.width,
            buffer.height,
            buffer.data.len()
        )));
    }
    let (width, height) = match (u32::try_from(buffer.width), u32::try_from(buffer.height)) {
        (Ok(w), Ok(h)) => (w, h),
        _ => {
            return Err(ServeError::EncodeInvariantViolation(format!(
                "{}x{} exceeds image dimensions",
                buffer.width, buffer.height
            )));
        }
    };

    match format {
        ImageFormat::Png => {
            let mut out = Vec::new();
            PngEncoder::new(&mut out)
                .write_image(&buffer.data, width, height, ExtendedColorType::Rgba8)
                .map_err(|e| ServeError::EncodeInvariantViolation(e.to_string()))?;
            Ok(out)
        }
    }
}
