//! ONNX Runtime backend
//!
//! Builds one session per process at startup. Execution providers are chosen
//! from the configuration with an availability check, falling back to CPU.

use crate::config::{ExecutionProvider, RemovalConfig};
use crate::error::{BgRemovalError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use instant::{Duration, Instant};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;

/// ONNX Runtime backend for running background removal models
#[derive(Debug)]
pub struct OnnxBackend {
    session: Option<Session>,
    model_manager: ModelManager,
    initialized: bool,
}

impl OnnxBackend {
    /// List ONNX Runtime execution providers as `(name, available, description)`
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "Provider probe on {os}/{arch}, {cores} CPU cores",
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH,
            cores = std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1)
        );

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                Self::cuda_available(),
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                Self::coreml_available(),
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    fn cuda_available() -> bool {
        OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false)
    }

    fn coreml_available() -> bool {
        OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false)
    }

    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            session: None,
            model_manager,
            initialized: false,
        }
    }

    /// Providers to register for the requested execution provider, in priority order
    fn select_providers(requested: ExecutionProvider) -> Vec<ExecutionProviderDispatch> {
        let mut providers = Vec::new();

        let want_cuda = matches!(requested, ExecutionProvider::Auto | ExecutionProvider::Cuda);
        let want_coreml = matches!(requested, ExecutionProvider::Auto | ExecutionProvider::CoreMl);

        if want_cuda {
            if Self::cuda_available() {
                log::info!("CUDA execution provider is available and will be used");
                providers.push(CUDAExecutionProvider::default().build());
            } else if requested == ExecutionProvider::Cuda {
                log::warn!("CUDA execution provider requested but not available, falling back to CPU");
            }
        }

        if want_coreml {
            if Self::coreml_available() {
                log::info!("CoreML execution provider is available and will be used");
                providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
            } else if requested == ExecutionProvider::CoreMl {
                log::warn!("CoreML execution provider requested but not available, falling back to CPU");
            }
        }

        if providers.is_empty() {
            log::info!("Using CPU execution provider");
        }
        providers
    }

    fn thread_counts(config: &RemovalConfig) -> (usize, usize) {
        let cores = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(8);
        let intra = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            cores
        };
        let inter = if config.inter_threads > 0 {
            config.inter_threads
        } else {
            (cores / 4).max(1)
        };
        (intra, inter)
    }

    fn load_model(&mut self, config: &RemovalConfig) -> Result<Duration> {
        let model_load_start = Instant::now();
        let model_data = self.model_manager.load_model()?;
        let model_info = self.model_manager.get_info()?;

        let mut session_builder = Session::builder()
            .map_err(|e| BgRemovalError::model(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| BgRemovalError::model(format!("Failed to set optimization level: {e}")))?;

        let providers = Self::select_providers(config.execution_provider);
        if !providers.is_empty() {
            session_builder = session_builder
                .with_execution_providers(providers)
                .map_err(|e| {
                    BgRemovalError::model(format!("Failed to set execution providers: {e}"))
                })?;
        }

        let (intra_threads, inter_threads) = Self::thread_counts(config);

        let session = session_builder
            .with_intra_threads(intra_threads)
            .map_err(|e| BgRemovalError::model(format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(inter_threads)
            .map_err(|e| BgRemovalError::model(format!("Failed to set inter threads: {e}")))?
            .commit_from_memory(&model_data)
            .map_err(|e| {
                BgRemovalError::model(format!("Failed to create session from model data: {e}"))
            })?;

        log::debug!(
            "ONNX session ready: {} ({}), provider {}, {intra_threads} intra / {inter_threads} inter threads",
            model_info.name,
            model_info.precision,
            config.execution_provider
        );
        #[allow(clippy::cast_precision_loss)] // Precision loss acceptable for logging display
        let size_mb = model_info.size_bytes as f64 / (1024.0 * 1024.0);
        log::debug!("Model size: {size_mb:.2} MB");

        self.session = Some(session);
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "ONNX model loaded in {:.0}ms",
            model_load_time.as_secs_f64() * 1000.0
        );
        Ok(model_load_time)
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, config: &RemovalConfig) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }

        let model_load_time = self.load_model(config)?;
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| BgRemovalError::inference("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        log::debug!("Starting ONNX inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone()).map_err(|e| {
            BgRemovalError::inference(format!("Failed to convert input tensor: {e}"))
        })?;

        // Positional inputs and outputs keep this independent of tensor names
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| BgRemovalError::inference(format!("ONNX inference failed: {e}")))?;

        let output_tensor = {
            let keys: Vec<_> = outputs.keys().collect();
            let first_key = keys
                .first()
                .ok_or_else(|| BgRemovalError::inference("No output tensors found"))?;
            outputs
                .get(first_key)
                .ok_or_else(|| BgRemovalError::inference("First output tensor not found"))?
                .try_extract_array::<f32>()
                .map_err(|e| {
                    BgRemovalError::inference(format!("Failed to extract output tensor: {e}"))
                })?
        };

        let output = output_tensor
            .view()
            .to_owned()
            .into_dimensionality::<ndarray::Ix4>()
            .map_err(|e| {
                BgRemovalError::inference(format!(
                    "Expected 4D output tensor, got shape {:?}: {e}",
                    output_tensor.shape()
                ))
            })?;

        log::debug!(
            "ONNX inference complete: {:.2}ms, output shape {:?}",
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OnnxFileProvider;
    use crate::ModelMode;

    #[test]
    fn test_cpu_always_listed() {
        let providers = OnnxBackend::list_providers();
        assert_eq!(providers.len(), 3);
        let (name, available, _) = &providers[0];
        assert_eq!(name, "CPU");
        assert!(available);
    }

    #[test]
    fn test_thread_counts() {
        let config = RemovalConfig::builder().num_threads(6).build().unwrap();
        assert_eq!(OnnxBackend::thread_counts(&config), (6, 3));

        let (intra, inter) = OnnxBackend::thread_counts(&RemovalConfig::default());
        assert!(intra >= 1);
        assert!(inter >= 1);
    }

    #[test]
    fn test_invalid_model_data_fails_initialize() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("broken.onnx");
        std::fs::write(&path, b"not a protobuf").unwrap();
        let provider = OnnxFileProvider::new(&path, ModelMode::Fast).unwrap();

        let mut backend = OnnxBackend::with_model_manager(ModelManager::from_provider(Box::new(provider)));
        let config = RemovalConfig::builder()
            .execution_provider(ExecutionProvider::Cpu)
            .build()
            .unwrap();
        assert!(backend.initialize(&config).is_err());
        assert!(!backend.is_initialized());
        assert!(backend.infer(&Array4::zeros((1, 3, 32, 32))).is_err());
    }
}
