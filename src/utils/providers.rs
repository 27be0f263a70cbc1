//! Execution provider parsing and discovery
//!
//! Providers are named `backend:provider`, e.g. `onnx:auto` or `tract:cpu`.

use crate::{
    config::{BackendType, ExecutionProvider},
    error::{BgRemovalError, Result},
};

/// Information about an execution provider
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub execution_provider: ExecutionProvider,
    pub available: bool,
    pub description: String,
}

/// Utility for parsing and listing execution providers
pub struct ExecutionProviderManager;

impl ExecutionProviderManager {
    /// Parse a provider string in `backend:provider` or bare `backend` form
    ///
    /// # Examples
    /// ```rust
    /// use bgremove_server::config::{BackendType, ExecutionProvider};
    /// use bgremove_server::utils::ExecutionProviderManager;
    ///
    /// let (backend, provider) = ExecutionProviderManager::parse_provider_string("onnx:cuda").unwrap();
    /// assert_eq!((backend, provider), (BackendType::Onnx, ExecutionProvider::Cuda));
    /// ```
    ///
    /// # Errors
    /// - Unknown backend or provider name
    pub fn parse_provider_string(provider_str: &str) -> Result<(BackendType, ExecutionProvider)> {
        let normalized = provider_str.trim().to_lowercase();
        let (backend, provider) = match normalized.split_once(':') {
            Some((backend, provider)) => (backend, Some(provider)),
            None => (normalized.as_str(), None),
        };

        match backend {
            "onnx" => {
                let execution_provider = match provider.unwrap_or("auto") {
                    "auto" => ExecutionProvider::Auto,
                    "cpu" => ExecutionProvider::Cpu,
                    "cuda" => ExecutionProvider::Cuda,
                    "coreml" => ExecutionProvider::CoreMl,
                    other => {
                        return Err(BgRemovalError::invalid_config(format!(
                            "Unknown ONNX provider: {other}. Supported: auto, cpu, cuda, coreml"
                        )));
                    },
                };
                Ok((BackendType::Onnx, execution_provider))
            },
            "tract" => match provider.unwrap_or("cpu") {
                "cpu" => Ok((BackendType::Tract, ExecutionProvider::Cpu)),
                other => Err(BgRemovalError::invalid_config(format!(
                    "Unknown Tract provider: {other}. Tract only supports 'cpu'"
                ))),
            },
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown backend: {other}. Use backend:provider (e.g. onnx:auto, tract:cpu)"
            ))),
        }
    }

    /// All provider combinations with their availability on this machine
    #[must_use]
    pub fn list_all_providers() -> Vec<ProviderInfo> {
        let mut providers = Vec::new();

        #[cfg(feature = "onnx")]
        let onnx_availability: Vec<(String, bool)> = crate::backends::OnnxBackend::list_providers()
            .into_iter()
            .map(|(name, available, _)| (name.to_lowercase(), available))
            .collect();
        #[cfg(not(feature = "onnx"))]
        let onnx_availability: Vec<(String, bool)> = Vec::new();

        let onnx_available = |name: &str| {
            onnx_availability
                .iter()
                .any(|(provider, available)| provider == name && *available)
        };

        let onnx_entries = [
            (ExecutionProvider::Auto, onnx_available("cpu"), "ONNX Runtime with auto-selected provider"),
            (ExecutionProvider::Cpu, onnx_available("cpu"), "ONNX Runtime CPU execution"),
            (ExecutionProvider::Cuda, onnx_available("cuda"), "ONNX Runtime CUDA GPU acceleration"),
            (
                ExecutionProvider::CoreMl,
                onnx_available("coreml"),
                "ONNX Runtime CoreML (Apple Silicon) acceleration",
            ),
        ];
        for (execution_provider, available, description) in onnx_entries {
            providers.push(ProviderInfo {
                name: Self::provider_to_string(BackendType::Onnx, execution_provider),
                backend_type: BackendType::Onnx,
                execution_provider,
                available,
                description: Self::describe(description, cfg!(feature = "onnx")),
            });
        }

        providers.push(ProviderInfo {
            name: Self::provider_to_string(BackendType::Tract, ExecutionProvider::Cpu),
            backend_type: BackendType::Tract,
            execution_provider: ExecutionProvider::Cpu,
            available: cfg!(feature = "tract"),
            description: Self::describe("Pure Rust CPU inference via Tract", cfg!(feature = "tract")),
        });

        providers
    }

    fn describe(description: &str, compiled: bool) -> String {
        if compiled {
            description.to_string()
        } else {
            format!("{description} (feature disabled)")
        }
    }

    /// Format a backend/provider pair as `backend:provider`
    #[must_use]
    pub fn provider_to_string(backend_type: BackendType, provider: ExecutionProvider) -> String {
        format!("{backend_type}:{provider}")
    }
}
