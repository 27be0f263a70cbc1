//! Model downloading from `HuggingFace` repositories
//!
//! Files are streamed into a partial directory next to the final cache entry
//! and moved into place only once every required file has arrived.

use crate::cache::ModelCache;
use crate::error::{BgRemovalError, Result};
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

const HUGGINGFACE_PREFIX: &str = "https://huggingface.co/";

/// Files that need to be downloaded for a `HuggingFace` model
const REQUIRED_FILES: &[&str] = &["config.json", "preprocessor_config.json"];

/// ONNX model files to attempt downloading
const ONNX_FILES: &[(&str, &str)] = &[
    ("onnx/model.onnx", "fp32"),
    ("onnx/model_fp16.onnx", "fp16"),
];

/// Model downloader with progress reporting
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

/// Progress bar that works with and without the CLI feature
#[derive(Debug)]
enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    #[cfg_attr(feature = "cli", allow(dead_code))]
    NoOp,
}

impl ProgressIndicator {
    fn new() -> Self {
        #[cfg(feature = "cli")]
        {
            let pb = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            Self::Indicatif(pb)
        }
        #[cfg(not(feature = "cli"))]
        {
            Self::NoOp
        }
    }

    fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }

    fn set_progress(&self, position: u64, length: Option<u64>) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => {
                if let Some(len) = length {
                    pb.set_length(len);
                }
                pb.set_position(position);
            },
            Self::NoOp => {
                let _ = (position, length);
            },
        }
    }

    fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }
}

impl ModelDownloader {
    /// Create a downloader that stores models in `cache`
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| BgRemovalError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, cache })
    }

    /// Download a model repository into the cache and return its model id
    ///
    /// Returns immediately when the model is already cached.
    ///
    /// # Errors
    /// - Unsupported URL
    /// - Network errors or no ONNX variant available
    /// - File system errors while writing the cache
    pub async fn download_model(&self, url: &str, show_progress: bool) -> Result<String> {
        validate_model_url(url)?;
        let model_id = ModelCache::url_to_model_id(url);

        if self.cache.is_model_cached(&model_id) {
            log::info!("Model already cached: {model_id}");
            return Ok(model_id);
        }

        log::info!("Downloading model {model_id} from {url}");

        let final_dir = self.cache.get_model_path(&model_id);
        let partial_dir = self.create_partial_dir(&model_id)?;
        let progress = show_progress.then(ProgressIndicator::new);

        match self
            .download_model_files(url.trim_end_matches('/'), &partial_dir, progress.as_ref())
            .await
        {
            Ok(()) => {
                if final_dir.exists() {
                    fs::remove_dir_all(&final_dir).map_err(|e| {
                        BgRemovalError::file_io_error(
                            "remove existing model directory",
                            &final_dir,
                            &e,
                        )
                    })?;
                }

                fs::rename(&partial_dir, &final_dir).map_err(|e| {
                    BgRemovalError::file_io_error("move downloaded model to cache", &final_dir, &e)
                })?;

                if let Some(pb) = progress {
                    pb.finish_with_message(format!("Downloaded {model_id}"));
                }
                log::info!("Successfully downloaded model: {model_id}");
                Ok(model_id)
            },
            Err(e) => {
                if let Err(cleanup_err) = fs::remove_dir_all(&partial_dir) {
                    log::warn!("Failed to clean up partial download: {cleanup_err}");
                }
                if let Some(pb) = progress {
                    pb.finish_with_message("Download failed".to_string());
                }
                Err(e)
            },
        }
    }

    fn create_partial_dir(&self, model_id: &str) -> Result<PathBuf> {
        let partial_dir = self
            .cache
            .get_current_cache_dir()
            .join(format!(".{model_id}.partial"));

        if partial_dir.exists() {
            fs::remove_dir_all(&partial_dir).map_err(|e| {
                BgRemovalError::file_io_error("remove stale partial download", &partial_dir, &e)
            })?;
        }

        fs::create_dir_all(partial_dir.join("onnx")).map_err(|e| {
            BgRemovalError::file_io_error("create partial download directory", &partial_dir, &e)
        })?;

        Ok(partial_dir)
    }

    async fn download_model_files(
        &self,
        base_url: &str,
        download_dir: &Path,
        progress: Option<&ProgressIndicator>,
    ) -> Result<()> {
        let raw_base = format!("{base_url}/resolve/main/");

        for file_name in REQUIRED_FILES {
            if let Some(pb) = progress {
                pb.set_message(format!("Downloading {file_name}"));
            }
            self.download_file(
                &format!("{raw_base}{file_name}"),
                &download_dir.join(file_name),
                progress,
            )
            .await?;
        }

        let mut downloaded_models = 0;
        for (file_path, variant) in ONNX_FILES {
            if let Some(pb) = progress {
                pb.set_message(format!("Downloading {variant} model"));
            }

            match self
                .download_file(
                    &format!("{raw_base}{file_path}"),
                    &download_dir.join(file_path),
                    progress,
                )
                .await
            {
                Ok(()) => {
                    downloaded_models += 1;
                    log::info!("Downloaded {variant} model variant");
                },
                Err(e) => {
                    log::warn!("Failed to download {variant} variant: {e}");
                },
            }
        }

        if downloaded_models == 0 {
            return Err(BgRemovalError::network(format!(
                "No ONNX model variants could be downloaded from {base_url}"
            )));
        }

        Ok(())
    }

    async fn download_file(
        &self,
        url: &str,
        local_path: &Path,
        progress: Option<&ProgressIndicator>,
    ) -> Result<()> {
        log::debug!("Downloading: {url} -> {}", local_path.display());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BgRemovalError::network_error("download", url, e))?;

        if !response.status().is_success() {
            return Err(BgRemovalError::network_error(
                "download",
                url,
                format!("HTTP {}", response.status()),
            ));
        }

        let total_size = response.content_length();

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| BgRemovalError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];

        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| BgRemovalError::network_error("read download stream", url, e))?;

            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| BgRemovalError::file_io_error("write to file", local_path, &e))?;

            downloaded += bytes_read as u64;
            if let Some(pb) = progress {
                pb.set_progress(downloaded, total_size);
            }
        }

        file.flush()
            .await
            .map_err(|e| BgRemovalError::file_io_error("flush file", local_path, &e))?;

        log::debug!("Downloaded {downloaded} bytes to {}", local_path.display());
        Ok(())
    }

    /// Check a file against an expected SHA-256 hex digest
    ///
    /// Returns `true` when no digest is given.
    ///
    /// # Errors
    /// - File unreadable
    pub fn verify_file_integrity(file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
        let Some(expected) = expected_hash else {
            return Ok(true);
        };

        let contents = fs::read(file_path).map_err(|e| {
            BgRemovalError::file_io_error("read file for verification", file_path, &e)
        })?;

        let actual_hash = format!("{:x}", Sha256::digest(&contents));

        if actual_hash.eq_ignore_ascii_case(expected) {
            Ok(true)
        } else {
            log::warn!(
                "File integrity check failed for {}: expected {expected}, got {actual_hash}",
                file_path.display()
            );
            Ok(false)
        }
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

/// Validate that a URL is a supported model repository
///
/// # Errors
/// - Empty URL, non-`HuggingFace` host, or missing `user/repo` path
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(BgRemovalError::invalid_config("Model URL cannot be empty"));
    }

    let Some(repo_path) = url.strip_prefix(HUGGINGFACE_PREFIX) else {
        return Err(BgRemovalError::invalid_config(format!(
            "Unsupported URL format: {url}. Only HuggingFace repositories are supported ({HUGGINGFACE_PREFIX}...)"
        )));
    };

    let mut parts = repo_path.split('/').filter(|p| !p.is_empty());
    if parts.next().is_none() || parts.next().is_none() {
        return Err(BgRemovalError::invalid_config(format!(
            "Invalid HuggingFace repository URL: {url}. Expected format: {HUGGINGFACE_PREFIX}username/repo-name"
        )));
    }

    Ok(())
}

/// Split a `HuggingFace` URL into `(username, repository)`
///
/// # Errors
/// - URL fails [`validate_model_url`]
pub fn parse_huggingface_url(url: &str) -> Result<(String, String)> {
    validate_model_url(url)?;

    let repo_path = url.strip_prefix(HUGGINGFACE_PREFIX).unwrap_or_default();
    let mut parts = repo_path.split('/').filter(|p| !p.is_empty());
    match (parts.next(), parts.next()) {
        (Some(user), Some(repo)) => Ok((user.to_string(), repo.to_string())),
        _ => Err(BgRemovalError::invalid_config(format!(
            "Invalid HuggingFace URL format: {url}"
        ))),
    }
}
