//! Configuration types for background removal and the HTTP server

use crate::models::ModelSpec;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Inference engine used to run the segmentation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    #[default]
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

/// Model quality mode, selects the base inference resolution for bare model files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelMode {
    /// Low resolution, fast inference
    #[default]
    Fast,
    /// Full resolution inference
    Base,
}

impl ModelMode {
    /// Square input side the model is run at under the static resize policy
    #[must_use]
    pub fn base_size(self) -> u32 {
        match self {
            Self::Fast => 384,
            Self::Base => 1024,
        }
    }
}

impl std::fmt::Display for ModelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Base => write!(f, "base"),
        }
    }
}

/// How input images are resized before inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResizePolicy {
    /// Stretch every image to the model's fixed input size
    #[default]
    Static,
    /// Keep the aspect ratio and round each side to a multiple of 32
    ///
    /// Requires a model with dynamic spatial input dimensions.
    Dynamic,
}

impl std::fmt::Display for ResizePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// Configuration for the background removal pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalConfig {
    /// Model specification including source and variant
    pub model_spec: ModelSpec,

    /// Inference engine
    pub backend_type: BackendType,

    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Quality mode
    pub mode: ModelMode,

    /// Resize policy applied before inference
    pub resize: ResizePolicy,

    /// Longest allowed shorter side under the dynamic resize policy
    pub dynamic_max_side: u32,

    /// Stretch the predicted mask to the full 0..1 range
    pub normalize_mask: bool,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,

    /// Enable debug mode (additional logging)
    pub debug: bool,
}

/// Default shorter-side cap for dynamic resizing
pub const DEFAULT_DYNAMIC_MAX_SIDE: u32 = 1280;

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            model_spec: ModelSpec::default(),
            backend_type: BackendType::default(),
            execution_provider: ExecutionProvider::default(),
            mode: ModelMode::default(),
            resize: ResizePolicy::default(),
            dynamic_max_side: DEFAULT_DYNAMIC_MAX_SIDE,
            normalize_mask: true,
            intra_threads: 0,
            inter_threads: 0,
            debug: false,
        }
    }
}

impl RemovalConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use bgremove_server::{ExecutionProvider, ModelMode, RemovalConfig};
    ///
    /// let config = RemovalConfig::builder()
    ///     .execution_provider(ExecutionProvider::Cpu)
    ///     .mode(ModelMode::Base)
    ///     .num_threads(4)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.inter_threads, 2);
    /// ```
    #[must_use]
    pub fn builder() -> RemovalConfigBuilder {
        RemovalConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - `dynamic_max_side` outside 32-8192
    pub fn validate(&self) -> crate::Result<()> {
        if !(32..=8192).contains(&self.dynamic_max_side) {
            return Err(crate::error::BgRemovalError::config_value_error(
                "dynamic_max_side",
                self.dynamic_max_side,
                "32-8192",
                Some(DEFAULT_DYNAMIC_MAX_SIDE),
            ));
        }

        Ok(())
    }
}

/// Builder for `RemovalConfig`
#[derive(Debug, Default)]
pub struct RemovalConfigBuilder {
    config: RemovalConfig,
}

impl RemovalConfigBuilder {
    /// Set the model specification
    #[must_use]
    pub fn model_spec(mut self, model_spec: ModelSpec) -> Self {
        self.config.model_spec = model_spec;
        self
    }

    /// Set the inference engine
    #[must_use]
    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.config.backend_type = backend_type;
        self
    }

    /// Set execution provider
    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: ModelMode) -> Self {
        self.config.mode = mode;
        self
    }

    #[must_use]
    pub fn resize(mut self, resize: ResizePolicy) -> Self {
        self.config.resize = resize;
        self
    }

    #[must_use]
    pub fn dynamic_max_side(mut self, side: u32) -> Self {
        self.config.dynamic_max_side = side;
        self
    }

    #[must_use]
    pub fn normalize_mask(mut self, normalize: bool) -> Self {
        self.config.normalize_mask = normalize;
        self
    }

    /// Enable debug mode
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Set number of intra-op threads
    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    /// Set number of inter-op threads
    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    /// Set both thread counts from a total (0 = auto-detect)
    ///
    /// Intra-op threads get `threads`, inter-op threads get half of it (minimum 1).
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self.config.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// Returns `BgRemovalError::InvalidConfig` when a value is out of range.
    pub fn build(self) -> crate::Result<RemovalConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}

/// Default upload limit: 32 MiB
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Settings for the HTTP surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub bind: SocketAddr,
    /// Largest accepted request body in bytes
    pub max_upload_bytes: usize,
    /// Multipart field that carries the image
    pub upload_field: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            upload_field: "file".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate the server settings
    ///
    /// # Errors
    /// - Zero upload limit
    /// - Empty upload field name
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_upload_bytes == 0 {
            return Err(crate::error::BgRemovalError::config_value_error(
                "max_upload_bytes",
                self.max_upload_bytes,
                "> 0",
                Some(DEFAULT_MAX_UPLOAD_BYTES),
            ));
        }
        if self.upload_field.trim().is_empty() {
            return Err(crate::error::BgRemovalError::invalid_config(
                "Upload field name must not be empty",
            ));
        }
        Ok(())
    }
}
