#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # Background Removal Server
//!
//! An HTTP service that cuts the background out of uploaded images with a
//! salient-object segmentation model run through ONNX Runtime or Tract.
//!
//! The model is loaded once at start-up into a [`BackgroundRemover`]; every
//! `POST /api/remove-background` request decodes the multipart upload, runs
//! the model, and answers with an RGBA PNG whose alpha channel is the
//! predicted foreground mask.
//!
//! ## Features
//!
//! - **Multiple Backends**: ONNX Runtime (CUDA, `CoreML`, CPU) and Tract (pure Rust)
//! - **Model Management**: Automatic downloading and caching of models from `HuggingFace`
//! - **Format Support**: JPEG, PNG, WebP, BMP, TIFF and GIF uploads
//! - **Open CORS**: Callable from any browser origin
//!
//! ## Embedding the server
//!
//! ```rust,no_run
//! use bgremove_server::{
//!     server::{self, AppState},
//!     BackgroundRemover, ModelSource, ModelSpec, RemovalConfig, ServerConfig,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = RemovalConfig::builder()
//!     .model_spec(ModelSpec {
//!         source: ModelSource::File("isnet.onnx".into()),
//!         variant: None,
//!     })
//!     .build()?;
//! let remover = BackgroundRemover::load(config)?;
//!
//! let server_config = ServerConfig::default();
//! let listener = tokio::net::TcpListener::bind(server_config.bind).await?;
//! let router = server::build_router(AppState::new(remover, &server_config), &server_config);
//! server::serve(listener, router, server::shutdown_signal()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract` (default): Pure Rust backend
//! - `cli` (default): `bgremove-server` binary, tracing subscriber and download progress bars
//! - `webp-support` (default): WebP image format support
//! - `tracing-json`: JSON log output

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod processor;
pub mod remover;
pub mod server;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

// Public API exports
pub use backends::MockBackend;
pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use config::{BackendType, ExecutionProvider, ModelMode, RemovalConfig, ResizePolicy, ServerConfig};
pub use download::{parse_huggingface_url, validate_model_url, ModelDownloader};
pub use error::{BgRemovalError, ErrorKind, Result};
pub use inference::InferenceBackend;
pub use models::{ModelInfo, ModelManager, ModelSource, ModelSpec};
pub use processor::{BackendFactory, BackgroundRemovalProcessor, DefaultBackendFactory};
pub use remover::{BackgroundRemover, EncodedImage};
pub use services::{ImageIOService, OutputFormatHandler};
pub use types::{ProcessingMetadata, ProcessingTimings, RemovalResult, SegmentationMask};
pub use utils::{ExecutionProviderManager, ImagePreprocessor, ModelSpecParser, ProviderInfo};

#[cfg(feature = "onnx")]
pub use backends::OnnxBackend;
#[cfg(feature = "tract")]
pub use backends::TractBackend;

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat};
