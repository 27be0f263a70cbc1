//! Image decoding from uploaded bytes

use crate::error::{BgRemovalError, Result};
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;

/// Service for turning raw upload bytes into decoded images
pub struct ImageIOService;

impl ImageIOService {
    /// Decode an image, detecting the format from its content
    ///
    /// # Errors
    /// - `BgRemovalError::Decode` for empty input, unknown formats, or corrupt data
    ///
    /// # Examples
    /// ```rust
    /// use bgremove_server::services::ImageIOService;
    ///
    /// assert!(ImageIOService::decode_bytes(b"").is_err());
    /// assert!(ImageIOService::decode_bytes(b"definitely not an image").is_err());
    /// ```
    pub fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(BgRemovalError::decode("uploaded file is empty"));
        }

        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| BgRemovalError::decode(format!("failed to inspect image data: {e}")))?;

        let Some(format) = reader.format() else {
            return Err(BgRemovalError::decode(format!(
                "unrecognised image format ({} bytes)",
                bytes.len()
            )));
        };

        let image = reader
            .decode()
            .map_err(|e| BgRemovalError::decode(format!("failed to decode {format:?} image: {e}")))?;

        if image.width() == 0 || image.height() == 0 {
            return Err(BgRemovalError::decode("image has zero width or height"));
        }

        log::debug!(
            "Decoded {format:?} image: {}x{} ({:?})",
            image.width(),
            image.height(),
            image.color()
        );
        Ok(image)
    }

    /// Guess the container format from magic bytes
    #[must_use]
    pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
        image::guess_format(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        image.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    #[test]
    fn test_decode_png_and_jpeg() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(7, 5, Rgb([10, 200, 30])));

        let decoded = ImageIOService::decode_bytes(&encode(&image, ImageFormat::Png)).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (7, 5));

        let jpeg = encode(&image, ImageFormat::Jpeg);
        assert_eq!(ImageIOService::detect_format(&jpeg), Some(ImageFormat::Jpeg));
        let decoded = ImageIOService::decode_bytes(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (7, 5));
    }

    #[test]
    fn test_empty_input_is_decode_error() {
        let err = ImageIOService::decode_bytes(&[]).unwrap_err();
        assert!(matches!(err, BgRemovalError::Decode(_)));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let garbage: Vec<u8> = (0..1024u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8).collect();
        let err = ImageIOService::decode_bytes(&garbage).unwrap_err();
        assert!(matches!(err, BgRemovalError::Decode(_)));
    }

    #[test]
    fn test_truncated_png_is_decode_error() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([1, 2, 3])));
        let png = encode(&image, ImageFormat::Png);
        let err = ImageIOService::decode_bytes(&png[..png.len() / 2]).unwrap_err();
        assert!(matches!(err, BgRemovalError::Decode(_)));
    }
}
