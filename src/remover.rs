//! Process-wide background remover
//!
//! Wraps one initialised [`BackgroundRemovalProcessor`] behind a mutex so the
//! model is loaded exactly once and shared by every request. Decoding and PNG
//! encoding run outside the lock; only inference is serialised.

use crate::{
    config::RemovalConfig,
    error::{BgRemovalError, Result},
    processor::{BackendFactory, BackgroundRemovalProcessor},
    services::{ImageIOService, OutputFormatHandler},
    types::ProcessingTimings,
};
use instant::Instant;
use std::sync::{Arc, Mutex, PoisonError};

/// A finished cutout ready to be sent to a client
#[derive(Debug, Clone)]
pub struct EncodedImage {
    /// RGBA PNG bytes
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timings: ProcessingTimings,
}

/// Shared handle to the loaded segmentation model
#[derive(Debug)]
pub struct BackgroundRemover {
    processor: Arc<Mutex<BackgroundRemovalProcessor>>,
    model_name: String,
    backend_name: String,
}

impl BackgroundRemover {
    /// Build the default backend for `config` and load its model
    ///
    /// # Errors
    /// - Model resolution, loading or backend initialisation failures
    pub fn load(config: RemovalConfig) -> Result<Self> {
        Self::from_processor(BackgroundRemovalProcessor::new(config)?)
    }

    /// Same as [`Self::load`] with a caller supplied backend factory
    ///
    /// # Errors
    /// - Model resolution, loading or backend initialisation failures
    pub fn with_factory(config: RemovalConfig, factory: Box<dyn BackendFactory>) -> Result<Self> {
        Self::from_processor(BackgroundRemovalProcessor::with_factory(config, factory)?)
    }

    /// Take ownership of a processor, initialising it if needed
    ///
    /// # Errors
    /// - Backend initialisation failures
    pub fn from_processor(mut processor: BackgroundRemovalProcessor) -> Result<Self> {
        processor.initialize()?;

        let model_name = processor
            .model_info()
            .map_or_else(|| processor.config().model_spec.source.display_name(), |info| info.name.clone());
        let backend_name = processor.backend_name().to_string();

        log::info!("Background remover ready: model {model_name}, backend {backend_name}");

        Ok(Self {
            processor: Arc::new(Mutex::new(processor)),
            model_name,
            backend_name,
        })
    }

    /// Remove the background from an encoded image and return an RGBA PNG
    ///
    /// Work runs on the blocking thread pool. A panic inside the pipeline is
    /// reported as an `Internal` error and leaves the remover usable.
    ///
    /// # Errors
    /// - `Decode` for empty or undecodable input
    /// - `Inference`/`Processing` for model failures
    /// - `Encode` when PNG encoding fails
    /// - `Internal` if the worker task panics
    pub async fn remove_background(&self, bytes: Vec<u8>) -> Result<EncodedImage> {
        let processor = Arc::clone(&self.processor);

        tokio::task::spawn_blocking(move || Self::run_pipeline(&processor, &bytes))
            .await
            .map_err(|e| {
                if e.is_panic() {
                    BgRemovalError::internal("Background removal worker panicked")
                } else {
                    BgRemovalError::internal(format!("Background removal worker failed: {e}"))
                }
            })?
    }

    fn run_pipeline(processor: &Mutex<BackgroundRemovalProcessor>, bytes: &[u8]) -> Result<EncodedImage> {
        let total_start = Instant::now();

        let decode_start = Instant::now();
        let image = ImageIOService::decode_bytes(bytes)?;
        let image_decode_ms = decode_start.elapsed().as_millis() as u64;

        let result = {
            // Poisoning only means an earlier request panicked mid-inference
            let mut guard = processor.lock().unwrap_or_else(PoisonError::into_inner);
            guard.process_image(&image)?
        };
        drop(image);

        let encode_start = Instant::now();
        let png = OutputFormatHandler::encode_png(&result.image)?;
        let mut timings = result.metadata.timings.clone();
        timings.image_decode_ms = image_decode_ms;
        timings.image_encode_ms = Some(encode_start.elapsed().as_millis() as u64);
        timings.total_ms = total_start.elapsed().as_millis() as u64;

        let (width, height) = result.dimensions();
        log::debug!("Encoded {width}x{height} cutout, {} bytes", png.len());

        Ok(EncodedImage {
            png,
            width,
            height,
            timings,
        })
    }

    /// Model name reported by the backend
    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Inference engine name (`onnx`, `tract` or `custom`)
    #[must_use]
    pub fn backend_type(&self) -> &str {
        &self.backend_name
    }
}
