#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

//! # rmbg-batch
//!
//! Batch background removal with a locally executed segmentation model.
//!
//! Two components cooperate:
//!
//! - [`ModelProvider`] loads a segmentation model and its processor once, in
//!   the background, and publishes readiness and loading progress. Loading
//!   picks GPU-accelerated or default execution from a [`CapabilityProbe`].
//! - [`BatchImageProcessor`] runs each submitted file through
//!   decode → transform → infer → mask → composite → encode and tracks one
//!   [`ProcessedImageRecord`] per file, plus batch-level flags.
//!
//! Models are always fetched from a remote registry (`owner/name` ids) and
//! cached on disk; local model paths are not supported.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rmbg_batch::{
//!     BatchConfig, BatchImageProcessor, InputFile, ModelProvider, ProviderConfig,
//!     RegistryLoader, SystemCapabilityProbe,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ProviderConfig::default();
//! let loader = RegistryLoader::from_config(&config)?;
//! let provider = Arc::new(ModelProvider::new(
//!     config,
//!     Arc::new(loader),
//!     Arc::new(SystemCapabilityProbe),
//! )?);
//!
//! let processor = BatchImageProcessor::new(provider, BatchConfig::default())?;
//! let file = InputFile::from_path("photo.jpg".as_ref()).await?;
//! processor.process_images(vec![file]).await;
//!
//! for record in processor.processed_images() {
//!     println!("{}: {} ({} bytes)", record.filename, record.status, record.converted_size);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with CUDA and `CoreML` acceleration
//! - `tract` (default): pure Rust CPU backend, used when `onnx` is disabled
//! - `cli` (default): the `rmbg-batch` command-line frontend
//! - `webp-support` (default): WebP input decoding
//! - `tracing-json`: JSON log output for the CLI

pub mod backends;
pub mod cache;
pub mod capability;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositing;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod loader;
pub mod processor;
pub mod provider;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

pub use backends::{list_all_providers, ProviderInfo};
pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use capability::{
    select_load_options, CapabilityProbe, GpuTier, StaticCapabilityProbe, SystemCapabilityProbe,
};
pub use config::{
    BatchConfig, Device, LoadOptions, Precision, ProviderConfig, ReadinessPolicy, SizeEstimate,
};
pub use download::ModelDownloader;
pub use error::{BgRemovalError, Result};
pub use inference::{
    ImageTransform, LoadProgress, LoadStatus, ModelLoader, ProgressCallback, SegmentationModel,
};
pub use loader::RegistryLoader;
pub use processor::BatchImageProcessor;
pub use provider::{LoadingProgress, ModelHandle, ModelProvider, ModelStatus};
pub use services::{
    BatchProcessingStats, ConsoleProgressReporter, NoOpProgressReporter, ProcessingStage,
    ProgressReporter, ProgressUpdate,
};
pub use types::{
    BatchSummary, InputFile, ProcessedImageRecord, ProcessingTimings, RecordStatus,
};
pub use utils::{ImagePreprocessor, PreprocessorConfig};
