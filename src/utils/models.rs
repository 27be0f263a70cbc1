//! Model argument parsing
//!
//! Turns the `--model` command line value into a [`ModelSpec`].

use crate::{
    cache::ModelCache,
    error::{BgRemovalError, Result},
    models::{ModelSource, ModelSpec},
};
use std::path::{Path, PathBuf};

/// Utility for parsing and validating model specifications
pub struct ModelSpecParser;

impl ModelSpecParser {
    /// Parse a model argument with an optional `:variant` suffix
    ///
    /// - An existing file becomes [`ModelSource::File`]
    /// - An existing directory becomes [`ModelSource::Directory`]
    /// - An `http(s)` URL becomes the cache id it downloads to
    /// - Anything else is treated as a cached model id
    ///
    /// # Examples
    /// ```rust
    /// use bgremove_server::models::ModelSource;
    /// use bgremove_server::utils::ModelSpecParser;
    ///
    /// let spec = ModelSpecParser::parse("imgly--isnet-general-onnx:fp16");
    /// assert_eq!(spec.source, ModelSource::Downloaded("imgly--isnet-general-onnx".to_string()));
    /// assert_eq!(spec.variant.as_deref(), Some("fp16"));
    ///
    /// let spec = ModelSpecParser::parse("https://huggingface.co/imgly/isnet-general-onnx");
    /// assert_eq!(spec.source, ModelSource::Downloaded("imgly--isnet-general-onnx".to_string()));
    /// ```
    #[must_use]
    pub fn parse(model_arg: &str) -> ModelSpec {
        if Self::is_url(model_arg) {
            return ModelSpec {
                source: ModelSource::Downloaded(ModelCache::url_to_model_id(model_arg)),
                variant: None,
            };
        }

        if Path::new(model_arg).exists() {
            return ModelSpec {
                source: Self::local_source(model_arg),
                variant: None,
            };
        }

        match model_arg.rsplit_once(':') {
            Some((base, variant)) if !base.is_empty() && !variant.is_empty() => {
                let source = if Path::new(base).exists() {
                    Self::local_source(base)
                } else {
                    ModelSource::Downloaded(base.to_string())
                };
                ModelSpec {
                    source,
                    variant: Some(variant.to_string()),
                }
            },
            _ => ModelSpec {
                source: ModelSource::Downloaded(model_arg.to_string()),
                variant: None,
            },
        }
    }

    /// Whether the argument names a remote model
    #[must_use]
    pub fn is_url(model_arg: &str) -> bool {
        model_arg.starts_with("https://") || model_arg.starts_with("http://")
    }

    fn local_source(path: &str) -> ModelSource {
        let path = PathBuf::from(path);
        if path.is_dir() {
            ModelSource::Directory(path)
        } else {
            ModelSource::File(path)
        }
    }

    /// Check a specification before the model is loaded
    ///
    /// # Errors
    /// - Local path missing
    /// - Cached id empty or with characters outside `[A-Za-z0-9_-]`
    /// - Empty or malformed variant
    pub fn validate(model_spec: &ModelSpec) -> Result<()> {
        match &model_spec.source {
            ModelSource::File(path) | ModelSource::Directory(path) => {
                if !path.exists() {
                    return Err(BgRemovalError::invalid_config(format!(
                        "Model path does not exist: {}",
                        path.display()
                    )));
                }
            },
            ModelSource::Downloaded(model_id) => {
                if model_id.is_empty() {
                    return Err(BgRemovalError::invalid_config("Downloaded model ID cannot be empty"));
                }
                if !Self::is_identifier(model_id) {
                    return Err(BgRemovalError::invalid_config(format!(
                        "Invalid characters in downloaded model ID: {model_id}"
                    )));
                }
            },
        }

        if let Some(variant) = &model_spec.variant {
            if variant.is_empty() || !Self::is_identifier(variant) {
                return Err(BgRemovalError::invalid_config(format!(
                    "Invalid model variant: '{variant}'"
                )));
            }
        }

        Ok(())
    }

    fn is_identifier(value: &str) -> bool {
        value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_cached_id() {
        let spec = ModelSpecParser::parse("imgly--isnet-general-onnx");
        assert_eq!(spec.source, ModelSource::Downloaded("imgly--isnet-general-onnx".to_string()));
        assert!(spec.variant.is_none());
    }

    #[test]
    fn test_parse_local_paths() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("inspyrenet.onnx");
        std::fs::write(&file, b"onnx").unwrap();

        let spec = ModelSpecParser::parse(file.to_str().unwrap());
        assert_eq!(spec.source, ModelSource::File(file.clone()));

        let spec = ModelSpecParser::parse(temp.path().to_str().unwrap());
        assert_eq!(spec.source, ModelSource::Directory(temp.path().to_path_buf()));

        let with_variant = format!("{}:fp32", temp.path().display());
        let spec = ModelSpecParser::parse(&with_variant);
        assert_eq!(spec.source, ModelSource::Directory(temp.path().to_path_buf()));
        assert_eq!(spec.variant.as_deref(), Some("fp32"));
    }

    #[test]
    fn test_parse_url() {
        assert!(ModelSpecParser::is_url("https://huggingface.co/imgly/isnet-general-onnx"));
        assert!(!ModelSpecParser::is_url("imgly--isnet-general-onnx"));

        let spec = ModelSpecParser::parse("https://huggingface.co/imgly/isnet-general-onnx/");
        assert_eq!(spec.source, ModelSource::Downloaded("imgly--isnet-general-onnx".to_string()));
    }

    #[test]
    fn test_validate() {
        assert!(ModelSpecParser::validate(&ModelSpecParser::parse("imgly--isnet-general-onnx:fp16")).is_ok());
        assert!(ModelSpecParser::validate(&ModelSpec {
            source: ModelSource::Downloaded("bad id!".to_string()),
            variant: None,
        })
        .is_err());
        assert!(ModelSpecParser::validate(&ModelSpec {
            source: ModelSource::File(PathBuf::from("/definitely/missing.onnx")),
            variant: None,
        })
        .is_err());
        assert!(ModelSpecParser::validate(&ModelSpec {
            source: ModelSource::Downloaded("imgly--isnet-general-onnx".to_string()),
            variant: Some("fp 16".to_string()),
        })
        .is_err());
    }
}
