//! Configuration types for the model provider and the batch processor

use crate::error::{BgRemovalError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Registry id of the segmentation model loaded by default
pub const DEFAULT_MODEL_ID: &str = "briaai/RMBG-1.4";

/// Base URL of the remote model registry
pub const DEFAULT_REGISTRY_URL: &str = "https://huggingface.co";

/// Environment variable overriding the registry base URL
pub const REGISTRY_URL_ENV: &str = "RMBG_BATCH_REGISTRY_URL";

/// Execution target requested from the inference backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Device {
    /// Default CPU backend
    #[default]
    Default,
    /// GPU-accelerated backend (CUDA or `CoreML` when available)
    GpuAccelerated,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::GpuAccelerated => write!(f, "gpu-accelerated"),
        }
    }
}

/// Numeric precision of the model weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Precision {
    /// Backend default (quantized weights)
    #[default]
    Default,
    /// Full fp32 weights
    High,
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::High => write!(f, "high"),
        }
    }
}

impl FromStr for Precision {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "default" | "q8" | "quantized" => Ok(Self::Default),
            "high" | "fp32" => Ok(Self::High),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown precision '{other}'. Expected 'default' or 'high'"
            ))),
        }
    }
}

/// Options handed to the model loader once the capability probe has run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Execution target
    pub device: Device,
    /// Weight precision
    pub precision: Precision,
    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,
    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,
}

impl LoadOptions {
    /// Options for the default backend
    #[must_use]
    pub fn default_backend() -> Self {
        Self::default()
    }

    /// Options for the GPU-accelerated backend
    #[must_use]
    pub fn gpu(precision: Precision) -> Self {
        Self {
            device: Device::GpuAccelerated,
            precision,
            ..Self::default()
        }
    }
}

/// Configuration of the model provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Registry id of the model (`owner/name`)
    pub model_id: String,

    /// Request GPU execution when the capability probe allows it
    pub prefer_gpu: bool,

    /// Precision used on the GPU-accelerated path
    pub precision: Precision,

    /// Forward loader progress events into the provider's progress state
    pub track_progress: bool,

    /// Base URL of the remote model registry
    pub registry_url: String,

    /// Override for the download cache directory
    pub cache_dir: Option<PathBuf>,

    /// Expected SHA-256 hex digest of the weight file
    pub weights_sha256: Option<String>,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            prefer_gpu: true,
            precision: Precision::High,
            track_progress: true,
            registry_url: std::env::var(REGISTRY_URL_ENV)
                .unwrap_or_else(|_| DEFAULT_REGISTRY_URL.to_string()),
            cache_dir: None,
            weights_sha256: None,
            intra_threads: 0,
            inter_threads: 0,
        }
    }
}

impl ProviderConfig {
    /// Create a new configuration builder
    ///
    /// ```rust
    /// use rmbg_batch::{Precision, ProviderConfig};
    ///
    /// let config = ProviderConfig::builder()
    ///     .prefer_gpu(false)
    ///     .precision(Precision::Default)
    ///     .build()
    ///     .unwrap();
    /// assert!(!config.prefer_gpu);
    /// ```
    #[must_use]
    pub fn builder() -> ProviderConfigBuilder {
        ProviderConfigBuilder::default()
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// - Model id is not a registry id (`owner/name`)
    /// - Registry URL is not an http(s) URL
    /// - Weight digest is not 64 hex characters
    pub fn validate(&self) -> Result<()> {
        crate::download::validate_model_id(&self.model_id)?;

        if !(self.registry_url.starts_with("https://") || self.registry_url.starts_with("http://"))
        {
            return Err(BgRemovalError::invalid_config(format!(
                "Registry URL must start with http:// or https://, got '{}'",
                self.registry_url
            )));
        }

        if let Some(digest) = &self.weights_sha256 {
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(BgRemovalError::invalid_config(format!(
                    "Weight digest must be 64 hex characters, got '{digest}'"
                )));
            }
        }

        Ok(())
    }
}

/// Builder for `ProviderConfig`
#[derive(Debug, Default)]
pub struct ProviderConfigBuilder {
    config: ProviderConfig,
}

impl ProviderConfigBuilder {
    /// Set the registry model id
    #[must_use]
    pub fn model_id<S: Into<String>>(mut self, model_id: S) -> Self {
        self.config.model_id = model_id.into();
        self
    }

    /// Prefer GPU execution when available
    #[must_use]
    pub fn prefer_gpu(mut self, prefer_gpu: bool) -> Self {
        self.config.prefer_gpu = prefer_gpu;
        self
    }

    /// Set the precision used on the GPU path
    #[must_use]
    pub fn precision(mut self, precision: Precision) -> Self {
        self.config.precision = precision;
        self
    }

    /// Enable or disable load progress tracking
    #[must_use]
    pub fn track_progress(mut self, track_progress: bool) -> Self {
        self.config.track_progress = track_progress;
        self
    }

    /// Set the registry base URL
    #[must_use]
    pub fn registry_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.registry_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set a custom download cache directory
    #[must_use]
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    /// Require the weight file to match a SHA-256 hex digest
    #[must_use]
    pub fn weights_sha256<S: Into<String>>(mut self, digest: S) -> Self {
        self.config.weights_sha256 = Some(digest.into());
        self
    }

    /// Set both intra and inter threads (`threads/2` inter-op, minimum 1)
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self.config.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Validation errors from [`ProviderConfig::validate`]
    pub fn build(self) -> Result<ProviderConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// What the processor does when a batch arrives before the model is ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadinessPolicy {
    /// Wait until the provider is ready or failed
    #[default]
    Wait,
    /// Fail each file with a not-ready error
    Reject,
}

/// How `converted_size` is computed for finished records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SizeEstimate {
    /// Three quarters of the data URL length
    #[default]
    Approximate,
    /// Exact PNG byte length
    Exact,
}

/// Configuration of the batch image processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Readiness gate behaviour
    pub readiness: ReadinessPolicy,
    /// Number of files in flight at once (1 = sequential)
    pub concurrency: usize,
    /// Output size computation
    pub size_estimate: SizeEstimate,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            readiness: ReadinessPolicy::Wait,
            concurrency: 1,
            size_estimate: SizeEstimate::Approximate,
        }
    }
}

impl BatchConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder::default()
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// - `concurrency` is zero
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(BgRemovalError::invalid_config(
                "Batch concurrency must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Builder for `BatchConfig`
#[derive(Debug, Default)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    /// Set the readiness policy
    #[must_use]
    pub fn readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.config.readiness = readiness;
        self
    }

    /// Set the number of files processed concurrently
    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Set how converted sizes are computed
    #[must_use]
    pub fn size_estimate(mut self, size_estimate: SizeEstimate) -> Self {
        self.config.size_estimate = size_estimate;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Validation errors from [`BatchConfig::validate`]
    pub fn build(self) -> Result<BatchConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_config_defaults() {
        let config = ProviderConfig::default();
        assert_eq!(config.model_id, DEFAULT_MODEL_ID);
        assert!(config.prefer_gpu);
        assert_eq!(config.precision, Precision::High);
        assert!(config.track_progress);
        assert!(config.cache_dir.is_none());
    }

    #[test]
    fn test_provider_config_builder() {
        let config = ProviderConfig::builder()
            .model_id("owner/segmenter")
            .prefer_gpu(false)
            .precision(Precision::Default)
            .track_progress(false)
            .registry_url("https://mirror.example.com/")
            .num_threads(8)
            .build()
            .unwrap();

        assert_eq!(config.model_id, "owner/segmenter");
        assert!(!config.prefer_gpu);
        assert!(!config.track_progress);
        assert_eq!(config.registry_url, "https://mirror.example.com");
        assert_eq!(config.intra_threads, 8);
        assert_eq!(config.inter_threads, 4);
    }

    #[test]
    fn test_provider_config_rejects_local_paths() {
        assert!(ProviderConfig::builder()
            .model_id("/models/rmbg.onnx")
            .build()
            .is_err());
        assert!(ProviderConfig::builder()
            .model_id("./rmbg")
            .build()
            .is_err());
    }

    #[test]
    fn test_provider_config_rejects_bad_registry() {
        assert!(ProviderConfig::builder()
            .registry_url("ftp://registry")
            .build()
            .is_err());
    }

    #[test]
    fn test_provider_config_weight_digest() {
        let digest = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        let config = ProviderConfig::builder()
            .weights_sha256(digest)
            .build()
            .unwrap();
        assert_eq!(config.weights_sha256.as_deref(), Some(digest));

        assert!(ProviderConfig::builder()
            .weights_sha256("not-a-digest")
            .build()
            .is_err());
    }

    #[test]
    fn test_precision_parsing() {
        assert_eq!("high".parse::<Precision>().unwrap(), Precision::High);
        assert_eq!("FP32".parse::<Precision>().unwrap(), Precision::High);
        assert_eq!("default".parse::<Precision>().unwrap(), Precision::Default);
        assert!("fp64".parse::<Precision>().is_err());
    }

    #[test]
    fn test_batch_config_validation() {
        assert!(BatchConfig::default().validate().is_ok());
        assert!(BatchConfig::builder().concurrency(0).build().is_err());

        let config = BatchConfig::builder()
            .concurrency(4)
            .readiness(ReadinessPolicy::Reject)
            .size_estimate(SizeEstimate::Exact)
            .build()
            .unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.readiness, ReadinessPolicy::Reject);
    }

    #[test]
    fn test_config_serialization() {
        let json = serde_json::to_string(&LoadOptions::gpu(Precision::High)).unwrap();
        assert!(json.contains("\"gpu-accelerated\""));
        assert!(json.contains("\"high\""));

        let parsed: BatchConfig =
            serde_json::from_str(r#"{"readiness":"reject","concurrency":2,"size_estimate":"exact"}"#)
                .unwrap();
        assert_eq!(parsed.size_estimate, SizeEstimate::Exact);
    }
}
