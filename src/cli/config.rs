//! Conversion of command-line arguments into library configuration

use crate::cli::main_impl::Cli;
use crate::config::{BatchConfig, ProviderConfig, ReadinessPolicy, SizeEstimate};
use anyhow::{Context, Result};

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Provider configuration from CLI arguments
    pub(crate) fn provider_config(cli: &Cli) -> Result<ProviderConfig> {
        let mut builder = ProviderConfig::builder()
            .prefer_gpu(!cli.no_gpu)
            .precision(cli.precision)
            .track_progress(!cli.no_progress)
            .num_threads(cli.threads);

        if let Some(model) = &cli.model {
            builder = builder.model_id(model.as_str());
        }
        if let Some(url) = &cli.registry_url {
            builder = builder.registry_url(url.as_str());
        }
        if let Some(dir) = &cli.cache_dir {
            builder = builder.cache_dir(dir.as_path());
        }
        if let Some(digest) = &cli.weights_sha256 {
            builder = builder.weights_sha256(digest.as_str());
        }

        builder.build().context("Invalid model configuration")
    }

    /// Batch configuration from CLI arguments
    ///
    /// The CLI always waits for the model: it shows loading progress first.
    pub(crate) fn batch_config(cli: &Cli) -> Result<BatchConfig> {
        let size_estimate = if cli.exact_size {
            SizeEstimate::Exact
        } else {
            SizeEstimate::Approximate
        };

        BatchConfig::builder()
            .readiness(ReadinessPolicy::Wait)
            .concurrency(cli.concurrency)
            .size_estimate(size_estimate)
            .build()
            .context("Invalid batch configuration")
    }
}
