//! On-disk cache of files fetched from the model registry
//!
//! Files are stored per registry id under an XDG-compliant cache directory:
//! `<cache>/rmbg-batch/models/<owner>--<name>/<registry path>`. Only files the
//! downloader wrote are ever read back; arbitrary local model paths are not
//! accepted anywhere in the crate.

use crate::error::{BgRemovalError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "RMBG_BATCH_CACHE_DIR";

/// Information about a cached model
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Registry id (`owner/name`)
    pub model_id: String,
    /// Path to the cached model directory
    pub path: PathBuf,
    /// Whether the processor configuration is cached
    pub has_preprocessor: bool,
    /// Cached weight variants (`fp32`, `quantized`, ...)
    pub variants: Vec<String>,
    /// Size of the model directory in bytes
    pub size_bytes: u64,
}

/// Registry download cache
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Open the default cache, creating it if needed
    ///
    /// Location: `$RMBG_BATCH_CACHE_DIR/models` when set, otherwise
    /// `~/.cache/rmbg-batch/models` (platform equivalent on macOS and Windows).
    ///
    /// # Errors
    /// - No cache directory can be determined
    /// - The directory cannot be created
    pub fn new() -> Result<Self> {
        let cache_dir = Self::default_cache_dir()?;
        Self::open(cache_dir)
    }

    /// Open a cache rooted at a custom directory (`<dir>/models`)
    ///
    /// # Errors
    /// - The directory cannot be created
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        Self::open(cache_dir.join("models"))
    }

    fn open(cache_dir: PathBuf) -> Result<Self> {
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).map_err(|e| {
                BgRemovalError::file_io_error("create cache directory", &cache_dir, &e)
            })?;
        }
        Ok(Self { cache_dir })
    }

    fn default_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV} environment variable."
                ))
            })?
            .join("rmbg-batch")
            .join("models"))
    }

    /// Filesystem-safe directory name for a registry id
    ///
    /// ```
    /// use rmbg_batch::cache::ModelCache;
    ///
    /// assert_eq!(ModelCache::model_dir_name("briaai/RMBG-1.4"), "briaai--RMBG-1.4");
    /// ```
    #[must_use]
    pub fn model_dir_name(model_id: &str) -> String {
        model_id.replace('/', "--")
    }

    /// Cache directory of a model (may not exist)
    #[must_use]
    pub fn model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(Self::model_dir_name(model_id))
    }

    /// Cache location of one registry file (may not exist)
    #[must_use]
    pub fn file_path(&self, model_id: &str, file: &str) -> PathBuf {
        file.split('/')
            .fold(self.model_path(model_id), |path, part| path.join(part))
    }

    /// Path of a registry file when it is cached and non-empty
    #[must_use]
    pub fn cached_file(&self, model_id: &str, file: &str) -> Option<PathBuf> {
        let path = self.file_path(model_id, file);
        let populated = fs::metadata(&path).is_ok_and(|meta| meta.is_file() && meta.len() > 0);
        populated.then_some(path)
    }

    /// Root directory of this cache
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// List cached models sorted by id
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

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if let Some(info) = Self::analyze_model_directory(&path) {
                    models.push(info);
                }
            }
        }

        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    fn analyze_model_directory(model_path: &Path) -> Option<CachedModelInfo> {
        let dir_name = model_path.file_name()?.to_str()?;
        let model_id = dir_name.replacen("--", "/", 1);

        let mut variants: Vec<String> = fs::read_dir(model_path.join("onnx"))
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
                    .filter_map(|name| {
                        let stem = name.strip_suffix(".onnx")?;
                        Some(match stem {
                            "model" => "fp32".to_string(),
                            other => other.strip_prefix("model_").unwrap_or(other).to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        variants.sort();

        if variants.is_empty() {
            log::debug!("Skipping model directory without weights: {}", model_path.display());
            return None;
        }

        Some(CachedModelInfo {
            model_id,
            path: model_path.to_path_buf(),
            has_preprocessor: model_path.join("preprocessor_config.json").is_file(),
            variants,
            size_bytes: directory_size(model_path),
        })
    }

    /// Remove every cached model, returning the removed ids
    ///
    /// # Errors
    /// - Failed to read or remove cache directories
    pub fn clear_all_models(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        if !self.cache_dir.exists() {
            return Ok(removed);
        }

        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            BgRemovalError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                fs::remove_dir_all(&path).map_err(|e| {
                    BgRemovalError::file_io_error("remove cached model directory", &path, &e)
                })?;
                let name = entry.file_name().to_string_lossy().replacen("--", "/", 1);
                log::info!("Removed cached model: {name}");
                removed.push(name);
            }
        }

        removed.sort();
        Ok(removed)
    }

    /// Remove one cached model; `false` when it was not cached
    ///
    /// # Errors
    /// - Failed to remove the model directory
    pub fn clear_specific_model(&self, model_id: &str) -> Result<bool> {
        let model_path = self.model_path(model_id);
        if !model_path.exists() {
            return Ok(false);
        }

        fs::remove_dir_all(&model_path).map_err(|e| {
            BgRemovalError::file_io_error("remove cached model directory", &model_path, &e)
        })?;
        log::info!("Removed cached model: {model_id}");
        Ok(true)
    }
}

fn directory_size(dir: &Path) -> u64 {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|entry| {
                    let path = entry.path();
                    if path.is_dir() {
                        directory_size(&path)
                    } else {
                        entry.metadata().map(|meta| meta.len()).unwrap_or(0)
                    }
                })
                .sum()
        })
        .unwrap_or(0)
}

/// Format a byte count for display
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    let label = UNITS.get(unit).copied().unwrap_or("B");
    if unit == 0 {
        format!("{bytes} {label}")
    } else {
        format!("{size:.1} {label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, contents: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_file_paths() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();

        let path = cache.file_path("briaai/RMBG-1.4", "onnx/model.onnx");
        assert!(path.ends_with("models/briaai--RMBG-1.4/onnx/model.onnx"));
        assert_eq!(cache.cache_dir(), temp.path().join("models"));
    }

    #[test]
    fn test_cached_file_requires_content() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        let path = cache.file_path("a/b", "preprocessor_config.json");

        assert!(cache.cached_file("a/b", "preprocessor_config.json").is_none());
        write(&path, b"");
        assert!(cache.cached_file("a/b", "preprocessor_config.json").is_none());
        write(&path, b"{}");
        assert_eq!(cache.cached_file("a/b", "preprocessor_config.json"), Some(path));
    }

    #[test]
    fn test_scan_cached_models() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();

        write(&cache.file_path("z/model", "onnx/model.onnx"), b"1234");
        write(&cache.file_path("a/model", "onnx/model_quantized.onnx"), b"12");
        write(&cache.file_path("a/model", "onnx/model.onnx"), b"1234");
        write(&cache.file_path("a/model", "preprocessor_config.json"), b"{}");
        fs::create_dir_all(cache.model_path("empty/model")).unwrap();

        let models = cache.scan_cached_models().unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].model_id, "a/model");
        assert_eq!(models[0].variants, vec!["fp32", "quantized"]);
        assert!(models[0].has_preprocessor);
        assert_eq!(models[0].size_bytes, 8);
        assert!(!models[1].has_preprocessor);
    }

    #[test]
    fn test_clear_models() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        write(&cache.file_path("a/one", "onnx/model.onnx"), b"1");
        write(&cache.file_path("b/two", "onnx/model.onnx"), b"1");

        assert!(cache.clear_specific_model("a/one").unwrap());
        assert!(!cache.clear_specific_model("a/one").unwrap());
        assert_eq!(cache.clear_all_models().unwrap(), vec!["b/two"]);
        assert!(cache.scan_cached_models().unwrap().is_empty());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(176 * 1024 * 1024), "176.0 MB");
    }
}
