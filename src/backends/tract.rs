//! Tract backend
//!
//! Pure Rust inference with no native runtime. Under the static resize policy
//! the model input is pinned to the preprocessing size before optimisation,
//! which lets Tract fold every shape at load time.

use crate::config::{RemovalConfig, ResizePolicy};
use crate::error::{BgRemovalError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use instant::{Duration, Instant};
use ndarray::Array4;
use tract_onnx::prelude::*;

/// Type alias for the optimised, runnable Tract plan
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract backend for running background removal models using pure Rust inference
#[derive(Debug)]
pub struct TractBackend {
    model: Option<TractModel>,
    model_manager: ModelManager,
    initialized: bool,
}

impl TractBackend {
    /// List Tract execution providers as `(name, available, description)`
    ///
    /// # Examples
    /// ```rust
    /// use bgremove_server::backends::TractBackend;
    ///
    /// let providers = TractBackend::list_providers();
    /// assert_eq!(providers[0].0, "CPU");
    /// ```
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "Tract provider probe on {os}/{arch}",
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH
        );

        vec![(
            "CPU".to_string(),
            true,
            "Pure Rust CPU inference with no external dependencies".to_string(),
        )]
    }

    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            model: None,
            model_manager,
            initialized: false,
        }
    }

    fn load_model(&mut self, config: &RemovalConfig) -> Result<Duration> {
        let model_load_start = Instant::now();

        let model_data = self.model_manager.load_model()?;
        let model_info = self.model_manager.get_info()?;
        let preprocessing = self.model_manager.get_preprocessing_config()?;

        log::debug!(
            "Creating Tract model {} ({}), resize policy {}",
            model_info.name,
            model_info.precision,
            config.resize
        );

        let mut model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| BgRemovalError::model(format!("Failed to load ONNX model: {e}")))?;

        if config.resize == ResizePolicy::Static {
            let [height, width] = preprocessing.target_size;
            model = model
                .with_input_fact(0, f32::fact([1, 3, height as usize, width as usize]).into())
                .map_err(|e| BgRemovalError::model(format!("Failed to set input shape: {e}")))?;
        }

        let runnable = model
            .into_optimized()
            .map_err(|e| BgRemovalError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| BgRemovalError::model(format!("Failed to create runnable model: {e}")))?;

        self.model = Some(runnable);
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Tract model loaded in {:.0}ms",
            model_load_time.as_secs_f64() * 1000.0
        );
        Ok(model_load_time)
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, config: &RemovalConfig) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }

        let model_load_time = self.load_model(config)?;
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| BgRemovalError::inference("Tract model not initialized"))?;

        let inference_start = Instant::now();
        let input_tensor = Tensor::from(input.clone());

        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| BgRemovalError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| BgRemovalError::inference("No output tensor found"))?
            .into_arc_tensor();

        let output_view = output_tensor.to_array_view::<f32>().map_err(|e| {
            BgRemovalError::inference(format!("Failed to convert output tensor: {e}"))
        })?;

        let output = output_view
            .to_owned()
            .into_dimensionality::<ndarray::Ix4>()
            .map_err(|e| {
                BgRemovalError::inference(format!(
                    "Expected 4D output tensor, got shape {:?}: {e}",
                    output_tensor.shape()
                ))
            })?;

        log::debug!(
            "Tract inference complete: {:.2}ms, output shape {:?}",
            inference_start.elapsed().as_secs_f64() * 1000.0,
            output.dim()
        );

        Ok(output)
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.model_manager.get_preprocessing_config()
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        self.model_manager.get_info()
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
