//! Image preprocessing for model inference
//!
//! Converts a decoded image into the normalised NCHW tensor a segmentation
//! model expects. The inference resolution depends on the resize policy:
//!
//! - [`ResizePolicy::Static`] stretches every image to the model's fixed size.
//! - [`ResizePolicy::Dynamic`] keeps the aspect ratio, caps the shorter side and
//!   rounds both sides to a multiple of 32.

use crate::{
    config::ResizePolicy,
    error::{BgRemovalError, Result},
    models::PreprocessingConfig,
};
use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::Array4;

/// Side lengths fed to the model are multiples of this
pub const SIZE_MULTIPLE: u32 = 32;

/// Image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Resolution the model runs at for an image of `width`×`height`
    ///
    /// Returns `(width, height)`.
    #[must_use]
    pub fn inference_size(
        width: u32,
        height: u32,
        preprocessing_config: &PreprocessingConfig,
        resize: ResizePolicy,
        dynamic_max_side: u32,
    ) -> (u32, u32) {
        match resize {
            ResizePolicy::Static => {
                let [target_height, target_width] = preprocessing_config.target_size;
                (target_width.max(1), target_height.max(1))
            },
            ResizePolicy::Dynamic => {
                let (mut w, mut h) = (f64::from(width), f64::from(height));
                let cap = f64::from(dynamic_max_side);
                let shorter = w.min(h);
                if shorter > cap {
                    let scale = cap / shorter;
                    w *= scale;
                    h *= scale;
                }
                (Self::round_to_multiple(w), Self::round_to_multiple(h))
            },
        }
    }

    fn round_to_multiple(side: f64) -> u32 {
        let multiple = f64::from(SIZE_MULTIPLE);
        let rounded = (side / multiple).round() * multiple;
        (rounded as u32).max(SIZE_MULTIPLE)
    }

    /// Convert `image` into a `1×3×height×width` tensor at the given inference size
    ///
    /// # Errors
    /// - Zero-sized image or inference size
    pub fn preprocess_image(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
        inference_size: (u32, u32),
    ) -> Result<Array4<f32>> {
        let (width, height) = inference_size;
        if width == 0 || height == 0 || image.width() == 0 || image.height() == 0 {
            return Err(BgRemovalError::processing(format!(
                "Cannot preprocess {}x{} image at {width}x{height}",
                image.width(),
                image.height()
            )));
        }

        let rgb_image = image.to_rgb8();
        let resized = if rgb_image.dimensions() == (width, height) {
            rgb_image
        } else {
            image::imageops::resize(&rgb_image, width, height, FilterType::Triangle)
        };

        Ok(Self::image_to_tensor(&resized, preprocessing_config))
    }

    /// Normalise pixels into NCHW layout: `(v / 255 - mean) / std`
    #[allow(clippy::indexing_slicing)]
    // Safe: tensor dimensions match the image and channel index is below 3
    fn image_to_tensor(image: &RgbImage, preprocessing_config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = image.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        let mean = preprocessing_config.normalization_mean;
        let std = preprocessing_config.normalization_std;

        for (x, y, pixel) in image.enumerate_pixels() {
            for channel in 0..3 {
                let value = f32::from(pixel[channel]) / 255.0;
                tensor[[0, channel, y as usize, x as usize]] = (value - mean[channel]) / std[channel];
            }
        }

        tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbaImage};

    fn config(side: u32) -> PreprocessingConfig {
        PreprocessingConfig::imagenet(side)
    }

    #[test]
    fn test_static_size_uses_target() {
        let size = ImagePreprocessor::inference_size(
            4000,
            3000,
            &PreprocessingConfig {
                target_size: [320, 480],
                ..config(1)
            },
            ResizePolicy::Static,
            1280,
        );
        assert_eq!(size, (480, 320));
    }

    #[test]
    fn test_dynamic_size_rounds_to_multiple_of_32() {
        let size = ImagePreprocessor::inference_size(500, 300, &config(1024), ResizePolicy::Dynamic, 1280);
        assert_eq!(size, (512, 288));

        let size = ImagePreprocessor::inference_size(512, 512, &config(1024), ResizePolicy::Dynamic, 1280);
        assert_eq!(size, (512, 512));
    }

    #[test]
    fn test_dynamic_size_caps_shorter_side() {
        // 4000x2000 -> shorter side 2000 capped to 1280, long side scales to 2560
        let size =
            ImagePreprocessor::inference_size(4000, 2000, &config(1024), ResizePolicy::Dynamic, 1280);
        assert_eq!(size, (2560, 1280));

        // Portrait orientation
        let size =
            ImagePreprocessor::inference_size(1500, 3000, &config(1024), ResizePolicy::Dynamic, 1280);
        assert_eq!(size, (1280, 2560));
    }

    #[test]
    fn test_dynamic_size_never_below_minimum() {
        let size = ImagePreprocessor::inference_size(1, 1, &config(1024), ResizePolicy::Dynamic, 1280);
        assert_eq!(size, (32, 32));
    }

    #[test]
    fn test_tensor_layout_and_normalisation() {
        let mut img = RgbImage::from_pixel(64, 32, Rgb([255, 0, 0]));
        img.put_pixel(0, 0, Rgb([0, 255, 0]));
        let image = DynamicImage::ImageRgb8(img);

        let cfg = PreprocessingConfig {
            target_size: [32, 64],
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [0.5, 0.5, 0.5],
        };
        let tensor = ImagePreprocessor::preprocess_image(&image, &cfg, (64, 32)).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 32, 64]);

        // (1.0 - 0.5) / 0.5 = 1.0 and (0.0 - 0.5) / 0.5 = -1.0
        assert!((tensor[[0, 0, 10, 10]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 10, 10]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 0, 0, 0]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rgba_input_is_flattened_to_rgb() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 20, image::Rgba([10, 20, 30, 0])));
        let tensor = ImagePreprocessor::preprocess_image(&image, &config(32), (32, 64)).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 64, 32]);
    }

    #[test]
    fn test_rejects_zero_inference_size() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        assert!(ImagePreprocessor::preprocess_image(&image, &config(32), (0, 32)).is_err());
    }
}
