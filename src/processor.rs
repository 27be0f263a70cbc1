//! Background removal pipeline
//!
//! `BackgroundRemovalProcessor` owns one initialised inference backend and
//! turns decoded images into RGBA cutouts: preprocess, infer, build the mask
//! at the original resolution, then attach it as the alpha channel.

use crate::{
    config::{BackendType, RemovalConfig},
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
    models::{ModelInfo, ModelManager, PreprocessingConfig},
    services::ImageIOService,
    types::{ProcessingMetadata, ProcessingTimings, RemovalResult, SegmentationMask},
    utils::ImagePreprocessor,
};
use image::{DynamicImage, GrayImage, RgbaImage};
use instant::Instant;
use log::{debug, info};
use ndarray::Array4;
use tracing::{instrument, span, Level};

/// Masks whose value range is below this are left un-normalised
const MASK_RANGE_EPSILON: f32 = 1e-6;

/// Label reported for backends injected through [`BackgroundRemovalProcessor::from_backend`]
pub const CUSTOM_BACKEND_NAME: &str = "custom";

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create a backend instance of the specified type with the given model manager
    ///
    /// # Errors
    /// - Backend type not compiled into this build
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>>;

    /// List available backend types
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Builds the backends enabled through cargo features
#[derive(Debug, Default)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::with_model_manager(
                model_manager,
            ))),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(crate::backends::TractBackend::with_model_manager(
                model_manager,
            ))),
            #[allow(unreachable_patterns)]
            other => {
                drop(model_manager);
                Err(BgRemovalError::invalid_config(format!(
                    "Backend '{other}' is not compiled into this build"
                )))
            },
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        [
            #[cfg(feature = "onnx")]
            BackendType::Onnx,
            #[cfg(feature = "tract")]
            BackendType::Tract,
        ]
        .into_iter()
        .collect()
    }
}

/// Backend source for a processor that has not been initialised yet
enum PendingBackend {
    Factory(Box<dyn BackendFactory>),
    Ready(Box<dyn InferenceBackend>),
}

/// Runs the segmentation pipeline against one loaded model
pub struct BackgroundRemovalProcessor {
    config: RemovalConfig,
    pending: Option<PendingBackend>,
    backend: Option<Box<dyn InferenceBackend>>,
    backend_name: String,
    model_info: Option<ModelInfo>,
    preprocessing_config: Option<PreprocessingConfig>,
    model_load_ms: u64,
}

impl std::fmt::Debug for BackgroundRemovalProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemovalProcessor")
            .field("backend", &self.backend_name)
            .field("model", &self.model_info.as_ref().map(|info| &info.name))
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl BackgroundRemovalProcessor {
    /// Create a processor using the feature-enabled backends
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(config: RemovalConfig) -> Result<Self> {
        Self::with_factory(config, Box::new(DefaultBackendFactory))
    }

    /// Create a processor with a custom backend factory
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn with_factory(config: RemovalConfig, backend_factory: Box<dyn BackendFactory>) -> Result<Self> {
        config.validate()?;
        let backend_name = config.backend_type.to_string();
        Ok(Self {
            config,
            pending: Some(PendingBackend::Factory(backend_factory)),
            backend: None,
            backend_name,
            model_info: None,
            preprocessing_config: None,
            model_load_ms: 0,
        })
    }

    /// Create a processor around an already constructed backend
    ///
    /// The model source in `config` is ignored; the backend brings its own model.
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn from_backend(config: RemovalConfig, backend: Box<dyn InferenceBackend>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pending: Some(PendingBackend::Ready(backend)),
            backend: None,
            backend_name: CUSTOM_BACKEND_NAME.to_string(),
            model_info: None,
            preprocessing_config: None,
            model_load_ms: 0,
        })
    }

    /// Load the model and prepare the backend
    ///
    /// Calling this on an initialised processor is a no-op. A failed attempt
    /// consumes the pending backend, so it cannot be retried.
    ///
    /// # Errors
    /// - Model resolution or loading failures
    /// - Backend initialisation errors
    pub fn initialize(&mut self) -> Result<()> {
        if self.backend.is_some() {
            return Ok(());
        }

        let pending = self
            .pending
            .take()
            .ok_or_else(|| BgRemovalError::internal("Processor initialization already failed"))?;

        info!("Initializing background removal processor");
        debug!("Model spec: {:?}", self.config.model_spec);
        debug!(
            "Backend: {}, execution provider: {}, mode: {}, resize: {}",
            self.backend_name, self.config.execution_provider, self.config.mode, self.config.resize
        );

        let mut backend = match pending {
            PendingBackend::Ready(backend) => backend,
            PendingBackend::Factory(factory) => {
                let model_manager = ModelManager::from_spec(
                    &self.config.model_spec,
                    Some(self.config.execution_provider),
                    self.config.mode,
                )?;
                factory.create_backend(self.config.backend_type, model_manager)?
            },
        };

        let model_load_time = backend.initialize(&self.config)?;
        self.model_load_ms = model_load_time.map_or(0, |d| d.as_millis() as u64);
        self.model_info = Some(backend.get_model_info()?);
        self.preprocessing_config = Some(backend.get_preprocessing_config()?);
        self.backend = Some(backend);

        info!(
            "Background removal processor initialized ({}ms model load)",
            self.model_load_ms
        );
        Ok(())
    }

    /// Remove the background from a decoded image
    ///
    /// The result has the same dimensions as `image`.
    ///
    /// # Errors
    /// - Processor not initialised and initialisation fails
    /// - Inference failures or unexpected output shape (`Inference`/`Processing`)
    #[instrument(
        skip(self, image),
        fields(
            backend = %self.backend_name,
            width = image.width(),
            height = image.height()
        )
    )]
    pub fn process_image(&mut self, image: &DynamicImage) -> Result<RemovalResult> {
        self.initialize()?;

        let total_start = Instant::now();
        let original_dimensions = (image.width(), image.height());
        let mut timings = ProcessingTimings::default();

        let (input_tensor, inference_size) = {
            let _span = span!(Level::DEBUG, "preprocessing").entered();
            let preprocess_start = Instant::now();
            let preprocessing_config = self
                .preprocessing_config
                .as_ref()
                .ok_or_else(|| BgRemovalError::internal("Preprocessing config missing"))?;
            let inference_size = ImagePreprocessor::inference_size(
                original_dimensions.0,
                original_dimensions.1,
                preprocessing_config,
                self.config.resize,
                self.config.dynamic_max_side,
            );
            let tensor = ImagePreprocessor::preprocess_image(image, preprocessing_config, inference_size)?;
            timings.preprocessing_ms = preprocess_start.elapsed().as_millis() as u64;
            (tensor, inference_size)
        };

        let output_tensor = {
            let _span = span!(
                Level::DEBUG,
                "inference",
                inference_width = inference_size.0,
                inference_height = inference_size.1
            )
            .entered();
            let inference_start = Instant::now();
            let backend = self
                .backend
                .as_mut()
                .ok_or_else(|| BgRemovalError::internal("Backend not initialized"))?;
            let output = backend.infer(&input_tensor)?;
            timings.inference_ms = inference_start.elapsed().as_millis() as u64;
            output
        };

        let (mask, result_image) = {
            let _span = span!(Level::DEBUG, "postprocessing").entered();
            let postprocess_start = Instant::now();
            let mask = Self::tensor_to_mask(&output_tensor, original_dimensions, self.config.normalize_mask)?;
            let result_image = Self::apply_background_removal(image, &mask)?;
            timings.postprocessing_ms = postprocess_start.elapsed().as_millis() as u64;
            (mask, result_image)
        };

        timings.total_ms = total_start.elapsed().as_millis() as u64;

        let (model_name, model_precision) = self
            .model_info
            .as_ref()
            .map_or_else(Default::default, |info| (info.name.clone(), info.precision.clone()));
        let mut metadata = ProcessingMetadata::new(model_name, model_precision);
        metadata.inference_size = inference_size;
        metadata.timings = timings;

        if self.config.debug {
            let stats = mask.statistics();
            debug!(
                "Mask foreground ratio {:.3} at inference size {}x{}",
                stats.foreground_ratio, inference_size.0, inference_size.1
            );
        }

        Ok(RemovalResult::new(
            DynamicImage::ImageRgba8(result_image),
            mask,
            original_dimensions,
            metadata,
        ))
    }

    /// Decode `image_bytes` and remove the background
    ///
    /// # Errors
    /// - Undecodable input (`Decode`)
    /// - Any error from [`Self::process_image`]
    pub fn process_bytes(&mut self, image_bytes: &[u8]) -> Result<RemovalResult> {
        let decode_start = Instant::now();
        let image = ImageIOService::decode_bytes(image_bytes)?;
        let image_decode_ms = decode_start.elapsed().as_millis() as u64;

        let mut result = self.process_image(&image)?;
        result.metadata.timings.image_decode_ms = image_decode_ms;
        result.metadata.timings.total_ms += image_decode_ms;
        Ok(result)
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.backend.is_some()
    }

    /// Metadata of the loaded model, available after initialisation
    #[must_use]
    pub fn model_info(&self) -> Option<&ModelInfo> {
        self.model_info.as_ref()
    }

    /// Name of the inference engine (`onnx`, `tract` or `custom`)
    #[must_use]
    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    #[must_use]
    pub fn config(&self) -> &RemovalConfig {
        &self.config
    }

    /// Time spent loading the model during initialisation
    #[must_use]
    pub fn model_load_ms(&self) -> u64 {
        self.model_load_ms
    }

    /// Convert a `1×1×h×w` prediction into a mask at the original resolution
    fn tensor_to_mask(
        tensor: &Array4<f32>,
        original_dimensions: (u32, u32),
        normalize: bool,
    ) -> Result<SegmentationMask> {
        let (batch, channels, height, width) = tensor.dim();
        if batch != 1 || channels != 1 || height == 0 || width == 0 {
            return Err(BgRemovalError::processing(format!(
                "Invalid output tensor shape {:?}, expected [1, 1, H, W]",
                tensor.shape()
            )));
        }

        if tensor.iter().any(|v| !v.is_finite()) {
            return Err(BgRemovalError::processing("Output tensor contains non-finite values"));
        }
        let (min, max) = tensor
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

        let range = max - min;
        let stretch = normalize && range > MASK_RANGE_EPSILON;

        let data: Vec<u8> = tensor
            .iter()
            .map(|&v| {
                let value = if stretch { (v - min) / range } else { v };
                (value.clamp(0.0, 1.0) * 255.0).round() as u8
            })
            .collect();

        let mask_image = GrayImage::from_raw(width as u32, height as u32, data)
            .ok_or_else(|| BgRemovalError::processing("Mask buffer does not match tensor shape"))?;

        SegmentationMask::from_image(mask_image).resize(original_dimensions.0, original_dimensions.1)
    }

    /// Keep the input colours and use the mask as alpha
    fn apply_background_removal(image: &DynamicImage, mask: &SegmentationMask) -> Result<RgbaImage> {
        let rgb_image = image.to_rgb8();
        let (width, height) = rgb_image.dimensions();
        if mask.dimensions != (width, height) || mask.data.len() != rgb_image.pixels().len() {
            return Err(BgRemovalError::processing(format!(
                "Mask {}x{} does not match image {width}x{height}",
                mask.dimensions.0, mask.dimensions.1
            )));
        }

        let mut rgba = Vec::with_capacity(mask.data.len() * 4);
        for (pixel, &alpha) in rgb_image.pixels().zip(&mask.data) {
            rgba.extend_from_slice(&[pixel[0], pixel[1], pixel[2], alpha]);
        }

        RgbaImage::from_raw(width, height, rgba)
            .ok_or_else(|| BgRemovalError::processing("RGBA buffer does not match image size"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockBackend;
    use crate::config::ResizePolicy;
    use image::{Rgb, RgbImage};

    fn square_on_white(width: u32, height: u32) -> DynamicImage {
        let mut img = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
        for y in height / 4..3 * height / 4 {
            for x in width / 4..3 * width / 4 {
                img.put_pixel(x, y, Rgb([200, 30, 30]));
            }
        }
        DynamicImage::ImageRgb8(img)
    }

    fn mock_processor(backend: MockBackend, resize: ResizePolicy) -> BackgroundRemovalProcessor {
        let config = RemovalConfig::builder().resize(resize).build().unwrap();
        BackgroundRemovalProcessor::from_backend(config, Box::new(backend)).unwrap()
    }

    #[test]
    fn test_output_matches_input_dimensions() {
        for resize in [ResizePolicy::Static, ResizePolicy::Dynamic] {
            let mut processor = mock_processor(MockBackend::new(), resize);
            let result = processor.process_image(&square_on_white(300, 200)).unwrap();

            assert_eq!(result.dimensions(), (300, 200));
            assert_eq!(result.mask.dimensions, (300, 200));
            assert_eq!(result.image.color(), image::ColorType::Rgba8);
        }
    }

    #[test]
    fn test_alpha_follows_mask_and_rgb_is_kept() {
        let mut processor = mock_processor(MockBackend::new(), ResizePolicy::Dynamic);
        let result = processor.process_image(&square_on_white(128, 128)).unwrap();
        let rgba = result.image.to_rgba8();

        let center = rgba.get_pixel(64, 64);
        assert_eq!(&center.0[..3], &[200, 30, 30]);
        assert!(center[3] > 200);

        let corner = rgba.get_pixel(2, 2);
        assert_eq!(&corner.0[..3], &[255, 255, 255]);
        assert!(corner[3] < 50);
    }

    #[test]
    fn test_one_pixel_image() {
        let mut processor = mock_processor(MockBackend::new(), ResizePolicy::Static);
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([10, 20, 30])));
        let result = processor.process_image(&image).unwrap();
        assert_eq!(result.dimensions(), (1, 1));
    }

    #[test]
    fn test_initialize_is_lazy_and_idempotent() {
        let backend = MockBackend::new();
        let history = backend.call_history();
        let mut processor = mock_processor(backend, ResizePolicy::Static);
        assert!(!processor.is_initialized());
        assert!(processor.model_info().is_none());

        processor.initialize().unwrap();
        processor.initialize().unwrap();
        assert!(processor.is_initialized());
        assert_eq!(processor.model_info().unwrap().name, "mock-contrast");
        assert_eq!(processor.backend_name(), CUSTOM_BACKEND_NAME);
        assert_eq!(*history.lock().unwrap(), vec!["initialize".to_string()]);
    }

    #[test]
    fn test_failed_initialization_is_reported() {
        let mut processor = mock_processor(MockBackend::new_failing_init(), ResizePolicy::Static);
        assert!(processor.initialize().is_err());
        assert!(processor.process_image(&square_on_white(8, 8)).is_err());
        assert!(!processor.is_initialized());
    }

    #[test]
    fn test_inference_failure_is_a_processing_kind() {
        let mut processor = mock_processor(MockBackend::new_failing_inference(), ResizePolicy::Static);
        let err = processor.process_image(&square_on_white(16, 16)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Processing);
    }

    #[test]
    fn test_process_bytes_rejects_garbage() {
        let mut processor = mock_processor(MockBackend::new(), ResizePolicy::Static);
        let err = processor.process_bytes(b"not an image at all").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Decode);
    }

    #[test]
    fn test_tensor_to_mask_normalises_range() {
        let tensor = Array4::from_shape_vec((1, 1, 1, 3), vec![0.25, 0.5, 0.75]).unwrap();
        let mask = BackgroundRemovalProcessor::tensor_to_mask(&tensor, (3, 1), true).unwrap();
        assert_eq!(mask.data, vec![0, 128, 255]);

        let raw = BackgroundRemovalProcessor::tensor_to_mask(&tensor, (3, 1), false).unwrap();
        assert_eq!(raw.data, vec![64, 128, 191]);
    }

    #[test]
    fn test_tensor_to_mask_keeps_constant_masks() {
        let tensor = Array4::from_elem((1, 1, 4, 4), 1.0);
        let mask = BackgroundRemovalProcessor::tensor_to_mask(&tensor, (8, 2), true).unwrap();
        assert_eq!(mask.dimensions, (8, 2));
        assert!(mask.data.iter().all(|&v| v == 255));

        let tensor = Array4::from_elem((1, 1, 4, 4), 0.0);
        let mask = BackgroundRemovalProcessor::tensor_to_mask(&tensor, (4, 4), true).unwrap();
        assert!(mask.data.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_tensor_to_mask_rejects_bad_shapes() {
        let tensor = Array4::<f32>::zeros((1, 3, 4, 4));
        assert!(BackgroundRemovalProcessor::tensor_to_mask(&tensor, (4, 4), true).is_err());

        let tensor = Array4::from_elem((1, 1, 2, 2), f32::NAN);
        assert!(BackgroundRemovalProcessor::tensor_to_mask(&tensor, (4, 4), true).is_err());
    }

    #[test]
    fn test_default_factory_lists_compiled_backends() {
        let backends = DefaultBackendFactory.available_backends();
        assert_eq!(backends.contains(&BackendType::Onnx), cfg!(feature = "onnx"));
        assert_eq!(backends.contains(&BackendType::Tract), cfg!(feature = "tract"));
        assert_eq!(
            backends.len(),
            usize::from(cfg!(feature = "onnx")) + usize::from(cfg!(feature = "tract"))
        );
    }
}
