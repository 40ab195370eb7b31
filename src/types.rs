//! Input files, per-image result records and batch summaries

use crate::error::{BgRemovalError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// One submitted image file
#[derive(Debug, Clone)]
pub struct InputFile {
    /// Display name of the file
    pub filename: String,
    /// Raw file bytes
    pub data: Arc<[u8]>,
}

impl InputFile {
    #[must_use]
    pub fn new(filename: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }

    /// Byte size of the file
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Read a file from disk, named by its final path component
    ///
    /// # Errors
    /// - The file cannot be read
    pub async fn from_path(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| BgRemovalError::file_io_error("read input image", path, &e))?;
        let filename = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned());
        Ok(Self::new(filename, data))
    }
}

/// Status of a processed image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Loading,
    Done,
    Error,
}

impl RecordStatus {
    /// True once the record reached `Done` or `Error`
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Loading)
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Loading => "loading",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Tracked state of one image through the pipeline
///
/// A record starts in `Loading` and moves to `Done` or `Error` exactly once.
/// The transition methods are no-ops on a record that already settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedImageRecord {
    pub status: RecordStatus,
    /// Byte size of the source file
    pub original_size: u64,
    /// Data URL shown while and after processing
    pub preview_url: String,
    /// Size of the output in bytes (approximate unless exact sizing is configured)
    pub converted_size: u64,
    /// Unix epoch milliseconds when processing started
    pub start_time: i64,
    /// Processing duration in milliseconds
    pub duration: u64,
    /// Output PNG data URL, empty until done
    pub download_url: String,
    pub filename: String,
    /// Completion percentage (0-100)
    pub progress: u8,
}

impl ProcessedImageRecord {
    /// New `Loading` record previewing the raw input
    #[must_use]
    pub fn loading(filename: &str, original_size: u64, preview_url: String, start_time: i64) -> Self {
        Self {
            status: RecordStatus::Loading,
            original_size,
            preview_url,
            converted_size: 0,
            start_time,
            duration: 0,
            download_url: String::new(),
            filename: filename.to_string(),
            progress: 0,
        }
    }

    /// Advance the progress percentage; never decreases
    pub fn advance(&mut self, progress: u8) {
        if self.status == RecordStatus::Loading {
            self.progress = self.progress.max(progress.min(100));
        }
    }

    /// Settle as `Done` with the output data URL
    pub fn complete(&mut self, data_url: String, converted_size: u64, duration: u64) {
        if self.status.is_terminal() {
            return;
        }
        self.status = RecordStatus::Done;
        self.preview_url.clone_from(&data_url);
        self.download_url = data_url;
        self.converted_size = converted_size;
        self.duration = duration;
        self.progress = 100;
    }

    /// Settle as `Error`, keeping output fields at their defaults
    pub fn fail(&mut self, duration: u64) {
        if self.status.is_terminal() {
            return;
        }
        self.status = RecordStatus::Error;
        self.duration = duration;
    }
}

/// Timing breakdown of one processed image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Image decoding time
    pub image_decode_ms: u64,
    /// Processor transform time
    pub preprocessing_ms: u64,
    /// Model forward pass time
    pub inference_ms: u64,
    /// Mask generation and compositing time
    pub compositing_ms: u64,
    /// PNG and data URL encoding time
    pub encode_ms: u64,
    /// End-to-end time
    pub total_ms: u64,
}

impl ProcessingTimings {
    /// Share of total time spent in inference (0.0-1.0)
    #[must_use]
    pub fn inference_ratio(&self) -> f64 {
        if self.total_ms == 0 {
            0.0
        } else {
            self.inference_ms as f64 / self.total_ms as f64
        }
    }
}

/// Outcome of one `process_images` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    /// Indices of this batch's records within the processor's record list
    pub first_index: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Wall-clock duration of the batch in milliseconds
    pub elapsed_ms: u64,
}

impl BatchSummary {
    /// Index range of this batch's records
    #[must_use]
    pub fn indices(&self) -> std::ops::Range<usize> {
        self.first_index..self.first_index + self.total
    }
}
