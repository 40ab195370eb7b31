//! Model loader backed by the remote registry

use crate::backends::build_model;
use crate::cache::ModelCache;
use crate::config::{LoadOptions, ProviderConfig};
use crate::download::{weight_candidates, ModelDownloader, PREPROCESSOR_FILE};
use crate::error::{BgRemovalError, Result};
use crate::inference::{
    emit_progress, ImageTransform, LoadProgress, ModelLoader, ProgressCallback, SegmentationModel,
};
use crate::utils::preprocessing::{ImagePreprocessor, PreprocessorConfig};
use async_trait::async_trait;
use std::path::Path;
use tracing::{info, instrument};

/// Loads weights and processor configuration from the registry and
/// instantiates them on the compiled-in execution backend
#[derive(Debug, Clone)]
pub struct RegistryLoader {
    downloader: ModelDownloader,
    weights_sha256: Option<String>,
}

impl RegistryLoader {
    #[must_use]
    pub fn new(downloader: ModelDownloader) -> Self {
        Self {
            downloader,
            weights_sha256: None,
        }
    }

    /// Reject weight files whose SHA-256 digest differs from `digest`
    #[must_use]
    pub fn with_weights_sha256<S: Into<String>>(mut self, digest: S) -> Self {
        self.weights_sha256 = Some(digest.into());
        self
    }

    /// Loader for the registry and cache named in `config`
    ///
    /// # Errors
    /// - Cache directory cannot be created
    /// - HTTP client construction failures
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let cache = match &config.cache_dir {
            Some(dir) => ModelCache::with_custom_cache_dir(dir)?,
            None => ModelCache::new()?,
        };
        let loader = Self::new(ModelDownloader::new(&config.registry_url, cache)?);
        Ok(match &config.weights_sha256 {
            Some(digest) => loader.with_weights_sha256(digest.as_str()),
            None => loader,
        })
    }

    #[must_use]
    pub fn downloader(&self) -> &ModelDownloader {
        &self.downloader
    }

    /// Check the weights against the configured digest, evicting them from
    /// the cache on mismatch
    async fn verify_weights(&self, path: &Path) -> Result<()> {
        let Some(expected) = self.weights_sha256.clone() else {
            return Ok(());
        };

        let file = path.to_path_buf();
        let matches = tokio::task::spawn_blocking(move || {
            ModelDownloader::verify_file_integrity(&file, Some(&expected))
        })
        .await
        .map_err(|e| BgRemovalError::internal(format!("Verification task failed: {e}")))??;

        if matches {
            return Ok(());
        }
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| BgRemovalError::file_io_error("remove corrupt weights", path, &e))?;
        Err(BgRemovalError::model(format!(
            "Weight file {} does not match the expected SHA-256 digest",
            path.display()
        )))
    }
}

#[async_trait]
impl ModelLoader for RegistryLoader {
    #[instrument(skip(self, progress), fields(device = %options.device, precision = %options.precision))]
    async fn load_model(
        &self,
        model_id: &str,
        options: LoadOptions,
        progress: Option<ProgressCallback>,
    ) -> Result<Box<dyn SegmentationModel>> {
        let (file, path) = self
            .downloader
            .fetch_first(model_id, weight_candidates(options.precision), progress.as_ref())
            .await?;
        self.verify_weights(&path).await?;

        let model_data = tokio::fs::read(&path)
            .await
            .map_err(|e| BgRemovalError::file_io_error("read model weights", &path, &e))?;
        info!(file = %file, bytes = model_data.len(), "Model weights available");

        let name = format!("{model_id}/{file}");
        let model = tokio::task::spawn_blocking(move || build_model(&model_data, &options, &name))
            .await
            .map_err(|e| BgRemovalError::internal(format!("Model construction task failed: {e}")))??;

        emit_progress(progress.as_ref(), LoadProgress::ready());
        Ok(model)
    }

    #[instrument(skip(self, progress))]
    async fn load_processor(
        &self,
        model_id: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<Box<dyn ImageTransform>> {
        let path = self
            .downloader
            .fetch_file(model_id, PREPROCESSOR_FILE, progress.as_ref())
            .await?;

        let json = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| BgRemovalError::file_io_error("read processor config", &path, &e))?;
        let config = PreprocessorConfig::from_json(&json)?;
        info!(
            width = config.size.width,
            height = config.size.height,
            "Processor configuration loaded"
        );

        emit_progress(progress.as_ref(), LoadProgress::ready());
        Ok(Box::new(ImagePreprocessor::new(config)))
    }
}
