//! Model sources, metadata and loading

use crate::config::{ExecutionProvider, ModelMode};
use crate::error::{BgRemovalError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Model fetched when no model is configured
pub const DEFAULT_MODEL_URL: &str = "https://huggingface.co/imgly/isnet-general-onnx";

/// Cache identifier of [`DEFAULT_MODEL_URL`]
pub const DEFAULT_MODEL_ID: &str = "imgly--isnet-general-onnx";

/// ImageNet channel means used by bare ONNX files
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations used by bare ONNX files
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Model source specification
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ModelSource {
    /// A single `.onnx` file on disk
    File(PathBuf),
    /// A model folder in `HuggingFace` layout
    Directory(PathBuf),
    /// Downloaded model from cache by model ID
    Downloaded(String),
}

impl ModelSource {
    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::File(path) | ModelSource::Directory(path) => {
                format!(
                    "external:{}",
                    path.file_name().unwrap_or_default().to_string_lossy()
                )
            },
            ModelSource::Downloaded(model_id) => {
                format!("cached:{model_id}")
            },
        }
    }
}

/// Complete model specification including source and optional variant
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    pub variant: Option<String>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            source: ModelSource::Downloaded(DEFAULT_MODEL_ID.to_string()),
            variant: None,
        }
    }
}

/// Model information and metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    pub precision: String,
    pub size_bytes: usize,
    pub input_shape: (usize, usize, usize, usize), // NCHW format
    pub output_shape: (usize, usize, usize, usize),
}

/// Input normalisation parameters for a model
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingConfig {
    /// Fixed input size as `[height, width]`
    pub target_size: [u32; 2],
    pub normalization_mean: [f32; 3],
    pub normalization_std: [f32; 3],
}

impl PreprocessingConfig {
    /// Square input at the given side with ImageNet statistics
    #[must_use]
    pub fn imagenet(side: u32) -> Self {
        Self {
            target_size: [side, side],
            normalization_mean: IMAGENET_MEAN,
            normalization_std: IMAGENET_STD,
        }
    }
}

/// Model provider trait for loading models
pub trait ModelProvider: std::fmt::Debug + Send + Sync {
    /// Load model data as bytes
    ///
    /// # Errors
    /// - Model file not found or inaccessible
    fn load_model_data(&self) -> Result<Vec<u8>>;

    /// Get model information
    ///
    /// # Errors
    /// - Model configuration parsing errors
    fn get_model_info(&self) -> Result<ModelInfo>;

    /// Get preprocessing configuration
    ///
    /// # Errors
    /// - Invalid normalization or target size values
    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig>;

    /// Get the model file path
    ///
    /// # Errors
    /// - Model path not available for this provider type
    fn get_model_path(&self) -> Result<PathBuf>;
}

fn read_model_file(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(BgRemovalError::model(format!(
            "Model file not found: {}",
            path.display()
        )));
    }
    fs::read(path).map_err(|e| BgRemovalError::file_io_error("read model file", path, &e))
}

fn model_file_size(path: &Path) -> Result<usize> {
    let metadata = fs::metadata(path)
        .map_err(|e| BgRemovalError::file_io_error("inspect model file", path, &e))?;
    usize::try_from(metadata.len())
        .map_err(|_| BgRemovalError::model("Model file too large for this platform"))
}

/// Provider for a single ONNX file without sidecar configuration
///
/// The input resolution comes from the quality mode and inputs are
/// normalised with ImageNet statistics.
#[derive(Debug)]
pub struct OnnxFileProvider {
    model_path: PathBuf,
    mode: ModelMode,
}

impl OnnxFileProvider {
    /// # Errors
    /// - Path missing or not a file
    pub fn new<P: AsRef<Path>>(model_path: P, mode: ModelMode) -> Result<Self> {
        let model_path = model_path.as_ref().to_path_buf();
        if !model_path.is_file() {
            return Err(BgRemovalError::invalid_config(format!(
                "Model file does not exist: {}",
                model_path.display()
            )));
        }
        Ok(Self { model_path, mode })
    }
}

impl ModelProvider for OnnxFileProvider {
    fn load_model_data(&self) -> Result<Vec<u8>> {
        read_model_file(&self.model_path)
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        let side = self.mode.base_size() as usize;
        let stem = self
            .model_path
            .file_stem()
            .map_or_else(|| "model".to_string(), |s| s.to_string_lossy().into_owned());
        Ok(ModelInfo {
            name: format!("{stem}-{}", self.mode),
            precision: "fp32".to_string(),
            size_bytes: model_file_size(&self.model_path)?,
            input_shape: (1, 3, side, side),
            output_shape: (1, 1, side, side),
        })
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(PreprocessingConfig::imagenet(self.mode.base_size()))
    }

    fn get_model_path(&self) -> Result<PathBuf> {
        Ok(self.model_path.clone())
    }
}

/// Provider for a model folder in `HuggingFace` layout
///
/// Expects `config.json`, `preprocessor_config.json` and an `onnx/` folder
/// holding `model.onnx` (fp32) and/or `model_fp16.onnx` (fp16).
#[derive(Debug)]
pub struct HuggingFaceModelProvider {
    model_path: PathBuf,
    model_config: serde_json::Value,
    preprocessor_config: serde_json::Value,
    variant: String,
}

impl HuggingFaceModelProvider {
    /// # Errors
    /// - Path missing or not a directory
    /// - Missing or unparsable configuration files
    /// - Requested variant not available
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        variant: Option<String>,
        execution_provider: Option<ExecutionProvider>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref().to_path_buf();

        if !model_path.is_dir() {
            return Err(BgRemovalError::invalid_config(format!(
                "Model path must be a directory: {}",
                model_path.display()
            )));
        }

        let model_config = Self::read_json(&model_path.join("config.json"))?;
        let preprocessor_config = Self::read_json(&model_path.join("preprocessor_config.json"))?;
        let variant = Self::resolve_variant(&model_path, variant, execution_provider)?;

        Ok(Self {
            model_path,
            model_config,
            preprocessor_config,
            variant,
        })
    }

    /// Selected precision variant
    #[must_use]
    pub fn variant(&self) -> &str {
        &self.variant
    }

    fn read_json(path: &Path) -> Result<serde_json::Value> {
        let content = fs::read_to_string(path).map_err(|e| {
            BgRemovalError::invalid_config(format!("Failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            BgRemovalError::invalid_config(format!("Failed to parse {}: {e}", path.display()))
        })
    }

    /// Variants present in the `onnx/` folder
    fn available_variants(model_path: &Path) -> Vec<String> {
        let onnx_dir = model_path.join("onnx");
        let mut variants = Vec::new();
        if onnx_dir.join("model.onnx").is_file() {
            variants.push("fp32".to_string());
        }
        if onnx_dir.join("model_fp16.onnx").is_file() {
            variants.push("fp16".to_string());
        }
        variants
    }

    fn resolve_variant(
        model_path: &Path,
        requested_variant: Option<String>,
        execution_provider: Option<ExecutionProvider>,
    ) -> Result<String> {
        let available = Self::available_variants(model_path);
        if available.is_empty() {
            return Err(BgRemovalError::invalid_config(format!(
                "No ONNX model files found in: {}",
                model_path.join("onnx").display()
            )));
        }

        if let Some(variant) = requested_variant {
            if available.contains(&variant) {
                return Ok(variant);
            }
            return Err(BgRemovalError::invalid_config(format!(
                "Requested variant '{variant}' not available. Available variants: {available:?}"
            )));
        }

        let has = |v: &str| available.iter().any(|a| a == v);
        let preferred = match execution_provider {
            Some(ExecutionProvider::CoreMl) => "fp32",
            Some(ExecutionProvider::Auto) if cfg!(target_os = "macos") => "fp32",
            _ => "fp16",
        };
        if has(preferred) {
            return Ok(preferred.to_string());
        }

        available
            .into_iter()
            .next()
            .ok_or_else(|| BgRemovalError::internal("variant list emptied unexpectedly"))
    }

    fn model_file_path(&self) -> PathBuf {
        let file_name = if self.variant == "fp16" {
            "model_fp16.onnx"
        } else {
            "model.onnx"
        };
        self.model_path.join("onnx").join(file_name)
    }

    fn parse_image_size(preprocessor: &serde_json::Value) -> Result<[u32; 2]> {
        let size = preprocessor
            .get("size")
            .ok_or_else(|| BgRemovalError::invalid_config("Missing size in preprocessor config"))?;

        let read_side = |key: &str| -> Result<u32> {
            let value = size
                .get(key)
                .and_then(serde_json::Value::as_u64)
                .ok_or_else(|| {
                    BgRemovalError::invalid_config(format!("Missing {key} in size config"))
                })?;
            u32::try_from(value)
                .map_err(|_| BgRemovalError::invalid_config(format!("{key} too large for u32")))
        };

        Ok([read_side("height")?, read_side("width")?])
    }

    /// Values above 1.0 are on the 0-255 scale and get divided down
    fn parse_channel_triplet(preprocessor: &serde_json::Value, key: &str) -> Result<[f32; 3]> {
        let values = preprocessor
            .get(key)
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!("Missing {key} in preprocessor config"))
            })?;

        let numbers: Vec<f64> = values.iter().filter_map(serde_json::Value::as_f64).collect();
        let [a, b, c] = numbers.as_slice() else {
            return Err(BgRemovalError::invalid_config(format!(
                "{key} must have exactly 3 numeric values"
            )));
        };

        let scale = if [*a, *b, *c].iter().any(|v| *v > 1.0) {
            255.0
        } else {
            1.0
        };
        Ok([(a / scale) as f32, (b / scale) as f32, (c / scale) as f32])
    }
}

impl ModelProvider for HuggingFaceModelProvider {
    fn load_model_data(&self) -> Result<Vec<u8>> {
        read_model_file(&self.model_file_path())
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        let model_type = self
            .model_config
            .get("model_type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");

        let [height, width] = Self::parse_image_size(&self.preprocessor_config)?;
        let (height, width) = (height as usize, width as usize);

        Ok(ModelInfo {
            name: format!("{model_type}-{}", self.variant),
            precision: self.variant.clone(),
            size_bytes: model_file_size(&self.model_file_path())?,
            input_shape: (1, 3, height, width),
            output_shape: (1, 1, height, width),
        })
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(PreprocessingConfig {
            target_size: Self::parse_image_size(&self.preprocessor_config)?,
            normalization_mean: Self::parse_channel_triplet(&self.preprocessor_config, "image_mean")?,
            normalization_std: Self::parse_channel_triplet(&self.preprocessor_config, "image_std")?,
        })
    }

    fn get_model_path(&self) -> Result<PathBuf> {
        Ok(self.model_file_path())
    }
}

/// Model manager for handling different model sources
#[derive(Debug)]
pub struct ModelManager {
    provider: Box<dyn ModelProvider>,
}

impl ModelManager {
    /// Create a model manager from a specification
    ///
    /// # Errors
    /// - Source path invalid or incomplete
    /// - Downloaded model not present in the cache
    /// - Requested variant not available
    pub fn from_spec(
        spec: &ModelSpec,
        execution_provider: Option<ExecutionProvider>,
        mode: ModelMode,
    ) -> Result<Self> {
        let provider: Box<dyn ModelProvider> = match &spec.source {
            ModelSource::File(path) => Box::new(OnnxFileProvider::new(path, mode)?),
            ModelSource::Directory(path) => Box::new(HuggingFaceModelProvider::new(
                path,
                spec.variant.clone(),
                execution_provider,
            )?),
            ModelSource::Downloaded(model_id) => {
                let cache = crate::cache::ModelCache::new()?;
                if !cache.is_model_cached(model_id) {
                    let available: Vec<String> = cache
                        .scan_cached_models()?
                        .into_iter()
                        .map(|m| m.model_id)
                        .collect();
                    return Err(BgRemovalError::model(format!(
                        "Model '{model_id}' not found in cache. Available models: {available:?}"
                    )));
                }
                Box::new(HuggingFaceModelProvider::new(
                    cache.get_model_path(model_id),
                    spec.variant.clone(),
                    execution_provider,
                )?)
            },
        };
        Ok(Self { provider })
    }

    /// Wrap an already constructed provider
    #[must_use]
    pub fn from_provider(provider: Box<dyn ModelProvider>) -> Self {
        Self { provider }
    }

    /// Load model bytes
    ///
    /// # Errors
    /// - Model file unreadable
    pub fn load_model(&self) -> Result<Vec<u8>> {
        self.provider.load_model_data()
    }

    /// # Errors
    /// - Model metadata unreadable
    pub fn get_info(&self) -> Result<ModelInfo> {
        self.provider.get_model_info()
    }

    /// # Errors
    /// - Invalid preprocessing metadata
    pub fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.provider.get_preprocessing_config()
    }

    /// # Errors
    /// - Provider has no backing file
    pub fn get_model_path(&self) -> Result<PathBuf> {
        self.provider.get_model_path()
    }
}
