//! Model cache management for downloaded models
//!
//! Downloaded models live in an XDG-compliant cache directory, one folder per
//! model in `HuggingFace` layout. The folder name is derived from the model URL.

use crate::error::{BgRemovalError, Result};
use crate::models::{DEFAULT_MODEL_ID, DEFAULT_MODEL_URL};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the cache root
pub const CACHE_DIR_ENV: &str = "BGREMOVE_CACHE_DIR";

/// Information about a cached model
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Model identifier (derived from URL)
    pub model_id: String,
    /// Path to the cached model directory
    pub path: PathBuf,
    /// Available ONNX model variants (fp16, fp32)
    pub variants: Vec<String>,
    /// Size of the model directory in bytes
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Create a cache manager at the default location
    ///
    /// - `$BGREMOVE_CACHE_DIR/models` when the variable is set
    /// - otherwise `<user cache dir>/bgremove-server/models`
    ///
    /// # Errors
    /// - Failed to determine or create the cache directory
    pub fn new() -> Result<Self> {
        let cache_dir = Self::get_cache_dir()?;
        Self::ensure_dir(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    /// Create a cache manager rooted at `cache_dir` (models go into `cache_dir/models`)
    ///
    /// # Errors
    /// - Failed to create the directory
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        let models_dir = cache_dir.join("models");
        Self::ensure_dir(&models_dir)?;
        Ok(Self {
            cache_dir: models_dir,
        })
    }

    fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .map_err(|e| BgRemovalError::file_io_error("create cache directory", dir, &e))?;
        }
        Ok(())
    }

    fn get_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV} environment variable."
                ))
            })?
            .join("bgremove-server")
            .join("models"))
    }

    /// Generate a model ID from a URL
    ///
    /// # Examples
    /// ```
    /// use bgremove_server::cache::ModelCache;
    ///
    /// let id = ModelCache::url_to_model_id("https://huggingface.co/imgly/isnet-general-onnx");
    /// assert_eq!(id, "imgly--isnet-general-onnx");
    /// ```
    #[must_use]
    pub fn url_to_model_id(url: &str) -> String {
        let prefix = "https://huggingface.co/";
        if let Some(path) = url.strip_prefix(prefix) {
            path.trim_end_matches('/').replace('/', "--")
        } else {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(url.as_bytes());
            let hash_string = format!("url-{:x}", hasher.finalize());
            hash_string.get(..16).unwrap_or(&hash_string).to_string()
        }
    }

    /// `true` if the model directory exists and holds a loadable model
    #[must_use]
    pub fn is_model_cached(&self, model_id: &str) -> bool {
        Self::validate_model_directory(&self.cache_dir.join(model_id))
    }

    /// Path to a cached model directory (may not exist)
    #[must_use]
    pub fn get_model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(model_id)
    }

    #[must_use]
    pub fn get_current_cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// All valid models in the cache, sorted by id
    ///
    /// # Errors
    /// - Failed to read the cache directory
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        let mut models = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(models);
        }

        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            BgRemovalError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                BgRemovalError::file_io_error("read cache directory entry", &self.cache_dir, &e)
            })?;

            let path = entry.path();
            if path.is_dir() {
                if let Some(model_info) = Self::analyze_model_directory(&path) {
                    models.push(model_info);
                }
            }
        }

        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    fn validate_model_directory(model_path: &Path) -> bool {
        model_path.join("config.json").is_file()
            && model_path.join("preprocessor_config.json").is_file()
            && !Self::scan_variants(model_path).is_empty()
    }

    fn scan_variants(model_path: &Path) -> Vec<String> {
        let onnx_dir = model_path.join("onnx");
        let mut variants = Vec::new();
        if let Ok(entries) = fs::read_dir(onnx_dir) {
            for entry in entries.flatten() {
                match entry.file_name().to_str() {
                    Some("model.onnx") => variants.push("fp32".to_string()),
                    Some("model_fp16.onnx") => variants.push("fp16".to_string()),
                    _ => {},
                }
            }
        }
        variants.sort();
        variants
    }

    fn analyze_model_directory(model_path: &Path) -> Option<CachedModelInfo> {
        let model_id = model_path.file_name()?.to_str()?.to_string();

        if !Self::validate_model_directory(model_path) {
            log::debug!("Skipping invalid model directory: {}", model_path.display());
            return None;
        }

        Some(CachedModelInfo {
            model_id,
            path: model_path.to_path_buf(),
            variants: Self::scan_variants(model_path),
            size_bytes: Self::calculate_directory_size(model_path).unwrap_or(0),
        })
    }

    fn calculate_directory_size(dir: &Path) -> std::io::Result<u64> {
        let mut total = 0;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                total += Self::calculate_directory_size(&path)?;
            } else {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    #[must_use]
    pub fn get_default_model_id() -> &'static str {
        DEFAULT_MODEL_ID
    }

    #[must_use]
    pub fn get_default_model_url() -> &'static str {
        DEFAULT_MODEL_URL
    }
}

/// Format file size in human-readable format
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    let unit = UNITS.get(unit_index).unwrap_or(&"B");
    if unit_index == 0 {
        format!("{bytes} {unit}")
    } else {
        format!("{size:.1} {unit}")
    }
}
