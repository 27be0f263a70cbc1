//! Background removal HTTP server
//!
//! Resolves (and if needed downloads) the model, loads it once, then serves
//! `POST /api/remove-background` until Ctrl-C or SIGTERM.

use super::config::CliConfigBuilder;
use crate::{
    cache::{format_size, ModelCache},
    config::{ModelMode, ResizePolicy, DEFAULT_DYNAMIC_MAX_SIDE, DEFAULT_MAX_UPLOAD_BYTES},
    download::ModelDownloader,
    models::{ModelSource, ModelSpec},
    remover::BackgroundRemover,
    server::{self, AppState},
    tracing_config::{init_cli_tracing, TracingFormat},
    utils::{ExecutionProviderManager, ModelSpecParser},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

/// Background removal HTTP server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgremove-server")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Address to listen on
    #[arg(long, env = "BGREMOVE_BIND", default_value = "0.0.0.0:8000")]
    pub bind: SocketAddr,

    /// Model URL, cached model id, `.onnx` file or model folder, with optional `:variant`
    /// [default: <https://huggingface.co/imgly/isnet-general-onnx>]
    #[arg(short, long, env = "BGREMOVE_MODEL")]
    pub model: Option<String>,

    /// Model variant (fp16, fp32) for folder and cached models
    #[arg(long, env = "BGREMOVE_VARIANT")]
    pub variant: Option<String>,

    /// Execution provider in format backend:provider (e.g., onnx:auto, onnx:coreml, tract:cpu)
    #[arg(short, long, env = "BGREMOVE_EXECUTION_PROVIDER", default_value = "onnx:auto")]
    pub execution_provider: String,

    /// Inference resolution for bare `.onnx` models
    #[arg(long, value_enum, env = "BGREMOVE_MODE", default_value_t = CliMode::Fast)]
    pub mode: CliMode,

    /// How images are resized before inference
    #[arg(long, value_enum, env = "BGREMOVE_RESIZE", default_value_t = CliResize::Static)]
    pub resize: CliResize,

    /// Shorter-side cap for dynamic resizing
    #[arg(long, env = "BGREMOVE_DYNAMIC_MAX_SIDE", default_value_t = DEFAULT_DYNAMIC_MAX_SIDE)]
    pub dynamic_max_side: u32,

    /// Use raw model output as alpha instead of stretching it to 0..1
    #[arg(long, env = "BGREMOVE_NO_NORMALIZE_MASK")]
    pub no_normalize_mask: bool,

    /// Number of inference threads (0 = auto-detect)
    #[arg(short, long, env = "BGREMOVE_THREADS", default_value_t = 0)]
    pub threads: usize,

    /// Largest accepted request body in bytes
    #[arg(long, env = "BGREMOVE_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,

    /// Multipart field carrying the image
    #[arg(long, env = "BGREMOVE_UPLOAD_FIELD", default_value = "file")]
    pub upload_field: String,

    /// Use custom cache directory
    #[arg(long, value_name = "PATH", env = "BGREMOVE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Fail instead of downloading a model that is not cached
    #[arg(long, env = "BGREMOVE_NO_DOWNLOAD")]
    pub no_download: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format (console, compact, json)
    #[arg(long, env = "BGREMOVE_LOG_FORMAT", default_value = "console")]
    pub log_format: TracingFormat,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,

    /// List cached models and exit
    #[arg(long)]
    pub list_models: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CliMode {
    Fast,
    Base,
}

impl From<CliMode> for ModelMode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Fast => Self::Fast,
            CliMode::Base => Self::Base,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CliResize {
    Static,
    Dynamic,
}

impl From<CliResize> for ResizePolicy {
    fn from(resize: CliResize) -> Self {
        match resize {
            CliResize::Static => Self::Static,
            CliResize::Dynamic => Self::Dynamic,
        }
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let session_id = uuid::Uuid::new_v4().to_string();
    init_cli_tracing(cli.verbose, cli.log_format, &session_id).context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    let cache = open_cache(&cli)?;

    if cli.list_models {
        return list_cached_models(&cache);
    }

    let server_config = CliConfigBuilder::server_config(&cli)?;
    let model_spec = resolve_model(&cli, &cache).await?;
    let removal_config = CliConfigBuilder::removal_config(&cli, model_spec)?;

    info!(
        "Loading model {} with {}",
        removal_config.model_spec.source.display_name(),
        ExecutionProviderManager::provider_to_string(
            removal_config.backend_type,
            removal_config.execution_provider
        )
    );

    let load_start = Instant::now();
    let remover = tokio::task::spawn_blocking(move || BackgroundRemover::load(removal_config))
        .await
        .context("Model loading task failed")?
        .context("Failed to load background removal model")?;
    info!(
        "Model {} ready in {:.2}s",
        remover.model_name(),
        load_start.elapsed().as_secs_f64()
    );

    let listener = tokio::net::TcpListener::bind(server_config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", server_config.bind))?;

    let state = AppState::new(remover, &server_config);
    let router = server::build_router(state, &server_config);

    server::serve(listener, router, server::shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

fn open_cache(cli: &Cli) -> Result<ModelCache> {
    let cache = match &cli.cache_dir {
        Some(dir) => ModelCache::with_custom_cache_dir(dir),
        None => ModelCache::new(),
    };
    cache.context("Failed to open model cache")
}

/// Turn the `--model` argument into a loadable specification
///
/// Cached and downloaded models resolve to their folder in `cache`.
async fn resolve_model(cli: &Cli, cache: &ModelCache) -> Result<ModelSpec> {
    let model_arg = cli
        .model
        .clone()
        .unwrap_or_else(|| ModelCache::get_default_model_url().to_string());

    let mut spec = ModelSpecParser::parse(&model_arg);
    if let Some(variant) = &cli.variant {
        spec.variant = Some(variant.clone());
    }
    ModelSpecParser::validate(&spec).context("Invalid --model")?;

    let ModelSource::Downloaded(model_id) = &spec.source else {
        return Ok(spec);
    };

    if !cache.is_model_cached(model_id) {
        let download_url = if ModelSpecParser::is_url(&model_arg) {
            model_arg.clone()
        } else if model_id == ModelCache::get_default_model_id() {
            ModelCache::get_default_model_url().to_string()
        } else {
            anyhow::bail!(
                "Model '{model_id}' not found in {}. Pass its URL with --model to download it, or use --list-models",
                cache.get_current_cache_dir().display()
            );
        };

        if cli.no_download {
            anyhow::bail!("Model '{model_id}' is not cached and --no-download is set");
        }

        let downloader = ModelDownloader::new(cache.clone()).context("Failed to create model downloader")?;
        let downloaded_id = downloader
            .download_model(&download_url, true)
            .await
            .with_context(|| format!("Failed to download model from {download_url}"))?;
        if downloaded_id != *model_id {
            anyhow::bail!("Downloaded model ID '{downloaded_id}' doesn't match expected '{model_id}'");
        }
    }

    Ok(ModelSpec {
        source: ModelSource::Directory(cache.get_model_path(model_id)),
        variant: spec.variant,
    })
}

fn show_provider_diagnostics() {
    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);

    println!("Backend and Execution Provider Diagnostics");
    println!("System: {cpu_count} CPU cores detected");
    println!();
    println!("Execution providers:");
    for provider_info in ExecutionProviderManager::list_all_providers() {
        let status = if provider_info.available {
            "available"
        } else {
            "not available"
        };
        println!(
            "  {:<12} {:<14} {}",
            provider_info.name, status, provider_info.description
        );
    }
    println!();
    println!("Select one with --execution-provider (default onnx:auto).");
    println!("CPU is always used as fallback when an accelerator is unavailable.");
}

fn list_cached_models(cache: &ModelCache) -> Result<()> {
    let models = cache.scan_cached_models().context("Failed to list cached models")?;

    println!("Cached models in {}", cache.get_current_cache_dir().display());
    if models.is_empty() {
        println!("  (none)");
        println!();
        println!("The default model is downloaded on first start:");
        println!("  bgremove-server --model {}", ModelCache::get_default_model_url());
        return Ok(());
    }

    for model in models {
        println!("  {}", model.model_id);
        println!("    variants: {}", model.variants.join(", "));
        println!("    size:     {}", format_size(model.size_bytes));
    }

    Ok(())
}
