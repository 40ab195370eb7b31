//! Batch background removal processor
//!
//! [`BatchImageProcessor`] runs every submitted file through
//! decode → transform → infer → mask → composite → encode and keeps one
//! [`ProcessedImageRecord`] per file. Records are appended in submission order
//! and never removed; each settles as `done` or `error` exactly once. A failing
//! file never aborts the batch.
//!
//! Batch-level state consists of two flags updated together under one lock:
//! `is_processing` is true exactly while a submission is handled, and
//! `is_download_ready` becomes true when it finishes.

use crate::{
    compositing::{
        apply_alpha_mask, bytes_to_data_url, encode_png, estimate_encoded_size, png_data_url,
        tensor_to_mask,
    },
    config::{BatchConfig, ReadinessPolicy, SizeEstimate},
    error::{BgRemovalError, Result},
    provider::{ModelHandle, ModelProvider},
    services::{
        BatchProcessingStats, NoOpProgressReporter, ProcessingStage, ProgressReporter,
        ProgressTracker,
    },
    types::{BatchSummary, InputFile, ProcessedImageRecord, ProcessingTimings, RecordStatus},
};
use futures::stream::{self, StreamExt};
use instant::Instant;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, instrument, Instrument};

#[derive(Debug, Default)]
struct BatchState {
    records: Vec<ProcessedImageRecord>,
    is_processing: bool,
    is_download_ready: bool,
}

/// Output of a successful pipeline run
struct PipelineOutput {
    data_url: String,
    png_len: usize,
    timings: ProcessingTimings,
}

/// Processes batches of images against a shared [`ModelProvider`]
pub struct BatchImageProcessor {
    provider: Arc<ModelProvider>,
    config: BatchConfig,
    reporter: Arc<dyn ProgressReporter>,
    state: Mutex<BatchState>,
    version: watch::Sender<u64>,
    batch_gate: tokio::sync::Mutex<()>,
}

impl BatchImageProcessor {
    /// Create a processor and start loading the provider's model
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - Invalid batch configuration
    /// - No Tokio runtime is available to load the model
    pub fn new(provider: Arc<ModelProvider>, config: BatchConfig) -> Result<Self> {
        config.validate()?;
        provider.initialize()?;
        let (version, _) = watch::channel(0);

        Ok(Self {
            provider,
            config,
            reporter: Arc::new(NoOpProgressReporter),
            state: Mutex::new(BatchState::default()),
            version,
            batch_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// Replace the progress reporter
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<ModelProvider> {
        &self.provider
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Process a batch of files, appending one record per file
    ///
    /// Concurrent calls are serialized. Per-file failures are recorded on the
    /// file's record and never abort the batch.
    #[instrument(skip_all, fields(files = files.len()))]
    pub async fn process_images(&self, files: Vec<InputFile>) -> BatchSummary {
        let _batch = self.batch_gate.lock().await;
        let batch_start = Instant::now();

        let first_index = self.update(|state| {
            state.is_processing = true;
            state.is_download_ready = false;
            state.records.len()
        });

        let total = files.len();
        info!(total, first_index, "Processing batch");

        let mut outcomes = stream::iter(files)
            .map(|file| {
                let index = self.begin_record(&file);
                let span = info_span!("image", index, filename = %file.filename);
                self.process_item(index, file).instrument(span)
            })
            .buffered(self.config.concurrency);

        let mut summary = BatchSummary {
            first_index,
            total,
            ..BatchSummary::default()
        };
        while let Some((filename, status)) = outcomes.next().await {
            match status {
                RecordStatus::Done => summary.succeeded += 1,
                _ => summary.failed += 1,
            }
            self.reporter.report_batch_progress(BatchProcessingStats::new(
                summary.succeeded + summary.failed,
                total,
                summary.failed,
                &filename,
                batch_start.elapsed().as_millis() as u64,
            ));
        }
        drop(outcomes);

        summary.elapsed_ms = batch_start.elapsed().as_millis() as u64;
        self.update(|state| {
            state.is_processing = false;
            state.is_download_ready = true;
        });

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            elapsed_ms = summary.elapsed_ms,
            "Batch finished"
        );
        summary
    }

    /// Append the `loading` record of a file, returning its index
    fn begin_record(&self, file: &InputFile) -> usize {
        let record = ProcessedImageRecord::loading(
            &file.filename,
            file.size(),
            bytes_to_data_url(&file.data),
            chrono::Utc::now().timestamp_millis(),
        );
        self.update(|state| {
            state.records.push(record);
            state.records.len() - 1
        })
    }

    async fn process_item(&self, index: usize, file: InputFile) -> (String, RecordStatus) {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(Arc::clone(&self.reporter), &file.filename);

        let status = match self.run_pipeline(index, &file, &mut tracker).await {
            Ok(output) => {
                let converted_size = match self.config.size_estimate {
                    SizeEstimate::Approximate => estimate_encoded_size(&output.data_url),
                    SizeEstimate::Exact => output.png_len as u64,
                };
                let duration = elapsed_ms(start);
                self.update(|state| {
                    if let Some(record) = state.records.get_mut(index) {
                        record.complete(output.data_url, converted_size, duration);
                    }
                });
                debug!(duration, converted_size, "Image processed");
                tracker.complete(output.timings);
                RecordStatus::Done
            },
            Err(e) => {
                error!(error = %e, "Error processing image");
                tracker.fail(&e.to_string());
                let duration = elapsed_ms(start);
                self.update(|state| {
                    if let Some(record) = state.records.get_mut(index) {
                        record.fail(duration);
                    }
                });
                RecordStatus::Error
            },
        };

        (file.filename, status)
    }

    async fn run_pipeline(
        &self,
        index: usize,
        file: &InputFile,
        tracker: &mut ProgressTracker,
    ) -> Result<PipelineOutput> {
        let handle = self.acquire_model().await?;
        let mut timings = ProcessingTimings::default();
        let total_start = Instant::now();

        self.enter_stage(index, tracker, ProcessingStage::ImageLoading);
        let stage_start = Instant::now();
        let data = Arc::clone(&file.data);
        let image = Arc::new(
            run_blocking("decode", move || {
                image::load_from_memory(&data).map_err(BgRemovalError::from)
            })
            .await?,
        );
        let dimensions = (image.width(), image.height());
        timings.image_decode_ms = elapsed_ms(stage_start);

        self.enter_stage(index, tracker, ProcessingStage::Preprocessing);
        let stage_start = Instant::now();
        let input = handle.preprocess(Arc::clone(&image)).await?;
        timings.preprocessing_ms = elapsed_ms(stage_start);

        self.enter_stage(index, tracker, ProcessingStage::Inference);
        let stage_start = Instant::now();
        let matte = handle.infer(input).await?;
        timings.inference_ms = elapsed_ms(stage_start);

        self.enter_stage(index, tracker, ProcessingStage::MaskGeneration);
        let stage_start = Instant::now();
        let mask = run_blocking("mask", move || tensor_to_mask(&matte, dimensions)).await?;

        self.enter_stage(index, tracker, ProcessingStage::BackgroundRemoval);
        let rgba = run_blocking("composite", move || apply_alpha_mask(&image, &mask)).await?;
        timings.compositing_ms = elapsed_ms(stage_start);

        self.enter_stage(index, tracker, ProcessingStage::FormatConversion);
        let stage_start = Instant::now();
        let (data_url, png_len) = run_blocking("encode", move || {
            let png = encode_png(&rgba)?;
            Ok((png_data_url(&png), png.len()))
        })
        .await?;
        timings.encode_ms = elapsed_ms(stage_start);
        timings.total_ms = elapsed_ms(total_start);

        Ok(PipelineOutput {
            data_url,
            png_len,
            timings,
        })
    }

    /// Readiness gate in front of every inference
    async fn acquire_model(&self) -> Result<ModelHandle> {
        match self.config.readiness {
            ReadinessPolicy::Wait => self.provider.wait_ready().await,
            ReadinessPolicy::Reject => self.provider.handle(),
        }
    }

    fn enter_stage(&self, index: usize, tracker: &mut ProgressTracker, stage: ProcessingStage) {
        let progress = tracker.enter(stage);
        self.update(|state| {
            if let Some(record) = state.records.get_mut(index) {
                record.advance(progress);
            }
        });
    }

    fn lock_state(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate batch state under the lock and notify subscribers
    fn update<T>(&self, mutate: impl FnOnce(&mut BatchState) -> T) -> T {
        let result = mutate(&mut self.lock_state());
        self.version.send_modify(|version| *version += 1);
        result
    }

    /// Snapshot of all records in submission order
    #[must_use]
    pub fn processed_images(&self) -> Vec<ProcessedImageRecord> {
        self.lock_state().records.clone()
    }

    /// Snapshot of one record
    #[must_use]
    pub fn record(&self, index: usize) -> Option<ProcessedImageRecord> {
        self.lock_state().records.get(index).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_state().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True exactly while a submission is being handled
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.lock_state().is_processing
    }

    /// True once the latest submission finished
    #[must_use]
    pub fn is_download_ready(&self) -> bool {
        self.lock_state().is_download_ready
    }

    /// Receiver of a counter bumped on every record or flag change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

async fn run_blocking<T, F>(stage: &str, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| BgRemovalError::internal(format!("{stage} task failed: {e}")))?
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
