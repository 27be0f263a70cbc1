//! Core types for background removal operations

use crate::error::{BgRemovalError, Result};
use chrono::{DateTime, Utc};
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

/// Result of a background removal operation
#[derive(Debug, Clone)]
pub struct RemovalResult {
    /// RGBA image: input colours with the mask as alpha
    pub image: DynamicImage,

    /// The segmentation mask at the original resolution
    pub mask: SegmentationMask,

    /// Original image dimensions
    pub original_dimensions: (u32, u32),

    /// Processing metadata
    pub metadata: ProcessingMetadata,
}

impl RemovalResult {
    #[must_use]
    pub fn new(
        image: DynamicImage,
        mask: SegmentationMask,
        original_dimensions: (u32, u32),
        metadata: ProcessingMetadata,
    ) -> Self {
        Self {
            image,
            mask,
            original_dimensions,
            metadata,
        }
    }

    /// Encode the result as an RGBA PNG
    ///
    /// # Errors
    /// - PNG encoding failure
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        crate::services::OutputFormatHandler::encode_png(&self.image)
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    #[must_use]
    pub fn timings(&self) -> &ProcessingTimings {
        &self.metadata.timings
    }

    /// One-line timing summary for logs
    #[must_use]
    pub fn timing_summary(&self) -> String {
        let t = &self.metadata.timings;
        let mut summary = format!(
            "Total: {}ms | Preprocess: {}ms | Inference: {}ms | Postprocess: {}ms",
            t.total_ms, t.preprocessing_ms, t.inference_ms, t.postprocessing_ms
        );
        if let Some(encode_ms) = t.image_encode_ms {
            summary.push_str(&format!(" | Encode: {encode_ms}ms"));
        }
        summary
    }
}

/// Single-channel foreground mask (0 background, 255 foreground)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
    /// Mask data as grayscale values (0-255), row-major
    pub data: Vec<u8>,

    /// Mask dimensions (width, height)
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    #[must_use]
    pub fn from_image(image: GrayImage) -> Self {
        let dimensions = image.dimensions();
        Self::new(image.into_raw(), dimensions)
    }

    /// Convert mask to a grayscale image
    ///
    /// # Errors
    /// - Data length does not match the dimensions
    pub fn to_image(&self) -> Result<GrayImage> {
        let (width, height) = self.dimensions;
        GrayImage::from_raw(width, height, self.data.clone())
            .ok_or_else(|| BgRemovalError::processing("Mask data does not match its dimensions"))
    }

    /// Bilinearly resample the mask
    ///
    /// # Errors
    /// - Data length does not match the dimensions
    pub fn resize(&self, new_width: u32, new_height: u32) -> Result<SegmentationMask> {
        if self.dimensions == (new_width, new_height) {
            return Ok(self.clone());
        }
        let current_image = self.to_image()?;
        let resized = image::imageops::resize(
            &current_image,
            new_width,
            new_height,
            image::imageops::FilterType::Triangle,
        );
        Ok(SegmentationMask::from_image(resized))
    }

    #[must_use]
    pub fn statistics(&self) -> MaskStatistics {
        let total_pixels = self.data.len();
        let foreground_pixels = self.data.iter().filter(|&&x| x > 127).count();
        let background_pixels = total_pixels - foreground_pixels;
        let ratio = |count: usize| {
            if total_pixels == 0 {
                0.0
            } else {
                count as f32 / total_pixels as f32
            }
        };

        MaskStatistics {
            total_pixels,
            foreground_pixels,
            background_pixels,
            foreground_ratio: ratio(foreground_pixels),
            background_ratio: ratio(background_pixels),
        }
    }
}

/// Statistics about a segmentation mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskStatistics {
    pub total_pixels: usize,
    pub foreground_pixels: usize,
    pub background_pixels: usize,
    pub foreground_ratio: f32,
    pub background_ratio: f32,
}

/// Timing breakdown for one request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Model loading time (first call only)
    pub model_load_ms: u64,

    /// Decoding the uploaded bytes
    pub image_decode_ms: u64,

    /// Resize, normalise, tensor conversion
    pub preprocessing_ms: u64,

    /// Backend inference execution
    pub inference_ms: u64,

    /// Mask generation and alpha application
    pub postprocessing_ms: u64,

    /// PNG encoding, when performed
    pub image_encode_ms: Option<u64>,

    /// Total end-to-end processing time
    pub total_ms: u64,
}

/// Metadata about the processing operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub timings: ProcessingTimings,

    /// Model used for inference
    pub model_name: String,

    /// Model precision used
    pub model_precision: String,

    /// Resolution the model ran at (width, height)
    pub inference_size: (u32, u32),

    /// When processing finished
    pub processed_at: DateTime<Utc>,
}

impl ProcessingMetadata {
    #[must_use]
    pub fn new(model_name: String, model_precision: String) -> Self {
        Self {
            timings: ProcessingTimings::default(),
            model_name,
            model_precision,
            inference_size: (0, 0),
            processed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_segmentation_mask_creation() {
        let mask = SegmentationMask::new(vec![255, 128, 0, 255], (2, 2));
        assert_eq!(mask.dimensions, (2, 2));
        assert_eq!(mask.to_image().unwrap().get_pixel(1, 0)[0], 128);
    }

    #[test]
    fn test_mask_with_wrong_length_is_rejected() {
        let mask = SegmentationMask::new(vec![255, 0, 0], (2, 2));
        assert!(mask.to_image().is_err());
        assert!(mask.resize(4, 4).is_err());
    }

    #[test]
    fn test_mask_resize_keeps_uniform_values() {
        let mask = SegmentationMask::new(vec![200; 16], (4, 4));
        let resized = mask.resize(9, 3).unwrap();
        assert_eq!(resized.dimensions, (9, 3));
        assert_eq!(resized.data.len(), 27);
        assert!(resized.data.iter().all(|&v| v == 200));
    }

    #[test]
    fn test_mask_statistics() {
        let mask = SegmentationMask::new(vec![255, 255, 0, 100], (2, 2));
        let stats = mask.statistics();
        assert_eq!(stats.total_pixels, 4);
        assert_eq!(stats.foreground_pixels, 2);
        assert_eq!(stats.background_pixels, 2);
        assert!((stats.foreground_ratio - 0.5).abs() < f32::EPSILON);

        let empty = SegmentationMask::new(Vec::new(), (0, 0)).statistics();
        assert_eq!(empty.foreground_ratio, 0.0);
    }

    #[test]
    fn test_removal_result_png_and_summary() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 4])));
        let mask = SegmentationMask::new(vec![4; 6], (3, 2));
        let mut metadata = ProcessingMetadata::new("isnet-fp32".to_string(), "fp32".to_string());
        metadata.timings.total_ms = 12;
        metadata.timings.image_encode_ms = Some(3);

        let result = RemovalResult::new(image, mask, (3, 2), metadata);
        assert_eq!(result.dimensions(), (3, 2));

        let png = result.to_png_bytes().unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

        let summary = result.timing_summary();
        assert!(summary.starts_with("Total: 12ms"));
        assert!(summary.contains("Encode: 3ms"));
    }
}
