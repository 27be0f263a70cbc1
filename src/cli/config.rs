//! Conversion from command line arguments to library configuration

use crate::cli::main_impl::Cli;
use crate::{
    config::{RemovalConfig, ServerConfig},
    models::ModelSpec,
    utils::ExecutionProviderManager,
};
use anyhow::{Context, Result};

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the pipeline configuration for an already resolved model
    pub(crate) fn removal_config(cli: &Cli, model_spec: ModelSpec) -> Result<RemovalConfig> {
        let (backend_type, execution_provider) =
            ExecutionProviderManager::parse_provider_string(&cli.execution_provider)
                .context("Invalid --execution-provider")?;

        RemovalConfig::builder()
            .model_spec(model_spec)
            .backend_type(backend_type)
            .execution_provider(execution_provider)
            .mode(cli.mode.into())
            .resize(cli.resize.into())
            .dynamic_max_side(cli.dynamic_max_side)
            .normalize_mask(!cli.no_normalize_mask)
            .num_threads(cli.threads)
            .debug(cli.verbose >= 2)
            .build()
            .context("Invalid pipeline configuration")
    }

    pub(crate) fn server_config(cli: &Cli) -> Result<ServerConfig> {
        let config = ServerConfig {
            bind: cli.bind,
            max_upload_bytes: cli.max_upload_bytes,
            upload_field: cli.upload_field.clone(),
        };
        config.validate().context("Invalid server configuration")?;
        Ok(config)
    }
}
