//! Output encoding

use crate::error::{BgRemovalError, Result};
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbaImage};
use std::borrow::Cow;

/// MIME type of every successful response body
pub const PNG_CONTENT_TYPE: &str = "image/png";

/// Service for serialising result images
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// Encode an image as an 8-bit RGBA PNG
    ///
    /// Images without an alpha channel are widened to RGBA first so the output
    /// always carries four samples per pixel.
    ///
    /// # Errors
    /// - `BgRemovalError::Encode` when the PNG encoder fails
    pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
        let rgba: Cow<'_, RgbaImage> = match image {
            DynamicImage::ImageRgba8(rgba) => Cow::Borrowed(rgba),
            other => Cow::Owned(other.to_rgba8()),
        };
        let (width, height) = rgba.dimensions();

        let mut buf = Vec::with_capacity(rgba.as_raw().len() / 2);
        PngEncoder::new(&mut buf)
            .write_image(rgba.as_raw(), width, height, ExtendedColorType::Rgba8)
            .map_err(|e| BgRemovalError::encode(format!("failed to encode {width}x{height} PNG: {e}")))?;

        Ok(buf)
    }
}
