//! Remote model registry client
//!
//! Files are addressed as `<registry>/<owner>/<name>/resolve/main/<path>` and
//! streamed into the [`ModelCache`] through a temporary file that is renamed
//! into place once complete.

use crate::cache::ModelCache;
use crate::config::Precision;
use crate::error::{BgRemovalError, Result};
use crate::inference::{emit_progress, LoadProgress, ProgressCallback};
use futures_util::stream::TryStreamExt;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

/// Processor configuration file published next to the weights
pub const PREPROCESSOR_FILE: &str = "preprocessor_config.json";

/// Full-precision weights
pub const FP32_WEIGHTS: &str = "onnx/model.onnx";

/// Quantized weights used by the default backend
pub const QUANTIZED_WEIGHTS: &str = "onnx/model_quantized.onnx";

/// Weight files to try, in order, for a precision
#[must_use]
pub fn weight_candidates(precision: Precision) -> &'static [&'static str] {
    match precision {
        Precision::High => &[FP32_WEIGHTS],
        Precision::Default => &[QUANTIZED_WEIGHTS, FP32_WEIGHTS],
    }
}

/// Check that `model_id` is a registry id of the form `owner/name`
///
/// Filesystem paths, URLs and traversal segments are rejected.
///
/// # Errors
/// - The id is not exactly two non-empty segments of `[A-Za-z0-9._-]`
pub fn validate_model_id(model_id: &str) -> Result<()> {
    let invalid = || {
        BgRemovalError::invalid_config(format!(
            "Invalid model id '{model_id}': expected a registry id like 'owner/name'"
        ))
    };

    let (owner, name) = model_id.split_once('/').ok_or_else(invalid)?;
    for segment in [owner, name] {
        let valid_chars = segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if segment.is_empty() || !valid_chars || segment == "." || segment == ".." {
            return Err(invalid());
        }
    }
    Ok(())
}

/// Registry client backed by the download cache
#[derive(Debug, Clone)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
    registry_url: String,
}

impl ModelDownloader {
    /// Create a downloader for `registry_url`
    ///
    /// # Errors
    /// - Failed to create the HTTP client
    pub fn new(registry_url: &str, cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| BgRemovalError::network_error("Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            cache,
            registry_url: registry_url.trim_end_matches('/').to_string(),
        })
    }

    /// URL of one registry file
    #[must_use]
    pub fn file_url(&self, model_id: &str, file: &str) -> String {
        format!("{}/{model_id}/resolve/main/{file}", self.registry_url)
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Fetch one file, serving it from the cache when present
    ///
    /// # Errors
    /// - Invalid model id
    /// - HTTP or transfer errors
    /// - Cache write errors
    pub async fn fetch_file(
        &self,
        model_id: &str,
        file: &str,
        progress: Option<&ProgressCallback>,
    ) -> Result<PathBuf> {
        validate_model_id(model_id)?;

        if let Some(path) = self.cache.cached_file(model_id, file) {
            log::debug!("Using cached {model_id}/{file}");
            emit_progress(progress, LoadProgress::done(file));
            return Ok(path);
        }

        let url = self.file_url(model_id, file);
        let path = self.cache.file_path(model_id, file);
        emit_progress(progress, LoadProgress::initiate(file));
        self.download_file(&url, &path, file, progress).await?;
        emit_progress(progress, LoadProgress::done(file));
        Ok(path)
    }

    /// Fetch the first available file of `candidates`
    ///
    /// Only a missing file (HTTP 404) moves on to the next candidate.
    ///
    /// # Errors
    /// - None of the candidates exist
    /// - Any other transfer error
    pub async fn fetch_first(
        &self,
        model_id: &str,
        candidates: &[&str],
        progress: Option<&ProgressCallback>,
    ) -> Result<(String, PathBuf)> {
        for file in candidates {
            match self.fetch_file(model_id, file, progress).await {
                Ok(path) => return Ok(((*file).to_string(), path)),
                Err(BgRemovalError::Network(message)) if message.contains("404") => {
                    log::debug!("{model_id}/{file} not published, trying next candidate");
                },
                Err(e) => return Err(e),
            }
        }

        Err(BgRemovalError::model(format!(
            "None of {candidates:?} are published for {model_id}"
        )))
    }

    async fn download_file(
        &self,
        url: &str,
        local_path: &Path,
        file: &str,
        progress: Option<&ProgressCallback>,
    ) -> Result<()> {
        log::info!("Downloading {url}");

        let parent = local_path.parent().ok_or_else(|| {
            BgRemovalError::internal(format!("No parent directory for {}", local_path.display()))
        })?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BgRemovalError::file_io_error("create directory", parent, &e))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BgRemovalError::network_error(format!("Failed to download {url}"), e))?;

        let status = response.status();
        if !status.is_success() {
            let reason = if status == StatusCode::NOT_FOUND {
                "404 not found"
            } else {
                "request rejected"
            };
            return Err(BgRemovalError::network_error(
                format!("HTTP error {status} for {url}"),
                reason,
            ));
        }

        let total_size = response.content_length();

        // Stream into a temp file in the target directory so the final rename is atomic
        let temp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| BgRemovalError::file_io_error("create temp file", parent, &e))?;
        let std_file = temp
            .reopen()
            .map_err(|e| BgRemovalError::file_io_error("open temp file", temp.path(), &e))?;
        let mut output = tokio::fs::File::from_std(std_file);

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0; 8192];
        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| BgRemovalError::network_error("Failed to read download stream", e))?;
            if bytes_read == 0 {
                break;
            }

            output
                .write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| BgRemovalError::file_io_error("write to file", temp.path(), &e))?;
            downloaded += bytes_read as u64;

            if let Some(total) = total_size.filter(|total| *total > 0) {
                emit_progress(
                    progress,
                    LoadProgress::progress(file, downloaded as f32 / total as f32),
                );
            }
        }

        output
            .flush()
            .await
            .map_err(|e| BgRemovalError::file_io_error("flush file", temp.path(), &e))?;
        drop(output);

        temp.persist(local_path).map_err(|e| {
            BgRemovalError::file_io_error("move download into cache", local_path, &e.error)
        })?;

        log::debug!("Downloaded {downloaded} bytes to {}", local_path.display());
        Ok(())
    }

    /// Verify a file against an expected SHA-256 hex digest
    ///
    /// Returns `true` when no digest is given.
    ///
    /// # Errors
    /// - Failed to read the file
    pub fn verify_file_integrity(file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
        let Some(expected) = expected_hash else {
            return Ok(true);
        };

        let contents = std::fs::read(file_path).map_err(|e| {
            BgRemovalError::file_io_error("read file for verification", file_path, &e)
        })?;
        let actual = format!("{:x}", Sha256::digest(&contents));

        if actual.eq_ignore_ascii_case(expected) {
            Ok(true)
        } else {
            log::warn!(
                "File integrity check failed for {}: expected {expected}, got {actual}",
                file_path.display()
            );
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::LoadStatus;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn downloader(temp: &TempDir) -> ModelDownloader {
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        ModelDownloader::new("https://registry.invalid/", cache).unwrap()
    }

    #[test]
    fn test_validate_model_id() {
        assert!(validate_model_id("briaai/RMBG-1.4").is_ok());
        assert!(validate_model_id("owner/name_v2.1").is_ok());

        for invalid in [
            "",
            "RMBG-1.4",
            "/abs/path",
            "owner/",
            "../secret",
            "owner/name/extra",
            "C:\\models\\rmbg",
            "https://huggingface.co/briaai/RMBG-1.4",
        ] {
            assert!(validate_model_id(invalid).is_err(), "{invalid} accepted");
        }
    }

    #[test]
    fn test_weight_candidates() {
        assert_eq!(weight_candidates(Precision::High), &[FP32_WEIGHTS]);
        assert_eq!(
            weight_candidates(Precision::Default),
            &[QUANTIZED_WEIGHTS, FP32_WEIGHTS]
        );
    }

    #[test]
    fn test_file_url() {
        let temp = TempDir::new().unwrap();
        assert_eq!(
            downloader(&temp).file_url("briaai/RMBG-1.4", FP32_WEIGHTS),
            "https://registry.invalid/briaai/RMBG-1.4/resolve/main/onnx/model.onnx"
        );
    }

    #[tokio::test]
    async fn test_fetch_file_served_from_cache() {
        let temp = TempDir::new().unwrap();
        let downloader = downloader(&temp);
        let cached = downloader.cache().file_path("briaai/RMBG-1.4", PREPROCESSOR_FILE);
        std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
        std::fs::write(&cached, b"{}").unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback: ProgressCallback = Arc::new(move |event| sink.lock().unwrap().push(event));

        let path = downloader
            .fetch_file("briaai/RMBG-1.4", PREPROCESSOR_FILE, Some(&callback))
            .await
            .unwrap();

        assert_eq!(path, cached);
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, LoadStatus::Done);
    }

    #[tokio::test]
    async fn test_fetch_rejects_local_paths() {
        let temp = TempDir::new().unwrap();
        let result = downloader(&temp)
            .fetch_file("/etc/models", FP32_WEIGHTS, None)
            .await;
        assert!(matches!(result, Err(BgRemovalError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_fetch_first_prefers_earlier_candidate() {
        let temp = TempDir::new().unwrap();
        let downloader = downloader(&temp);
        for file in [QUANTIZED_WEIGHTS, FP32_WEIGHTS] {
            let path = downloader.cache().file_path("a/b", file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, file.as_bytes()).unwrap();
        }

        let (file, _) = downloader
            .fetch_first("a/b", weight_candidates(Precision::Default), None)
            .await
            .unwrap();
        assert_eq!(file, QUANTIZED_WEIGHTS);
    }

    #[test]
    fn test_verify_file_integrity() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("weights.bin");
        std::fs::write(&path, b"abc").unwrap();

        let digest = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        assert!(ModelDownloader::verify_file_integrity(&path, Some(digest)).unwrap());
        assert!(!ModelDownloader::verify_file_integrity(&path, Some("00")).unwrap());
        assert!(ModelDownloader::verify_file_integrity(&path, None).unwrap());
    }
}
