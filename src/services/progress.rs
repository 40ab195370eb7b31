//! Progress reporting service
//!
//! Separates progress reporting from the pipeline so frontends can render
//! per-image stages and batch statistics in their own way.

use crate::types::ProcessingTimings;
use instant::Instant;
use std::sync::Arc;

/// Pipeline stages of one image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Decoding the input bytes
    ImageLoading,
    /// Running the processor transform
    Preprocessing,
    /// Running the model forward pass
    Inference,
    /// Scaling and resizing the matte
    MaskGeneration,
    /// Writing the mask into the alpha channel
    BackgroundRemoval,
    /// Encoding the PNG data URL
    FormatConversion,
    Completed,
}

impl ProcessingStage {
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            ProcessingStage::ImageLoading => "Loading input image",
            ProcessingStage::Preprocessing => "Preprocessing image",
            ProcessingStage::Inference => "Running inference",
            ProcessingStage::MaskGeneration => "Generating segmentation mask",
            ProcessingStage::BackgroundRemoval => "Removing background",
            ProcessingStage::FormatConversion => "Encoding output",
            ProcessingStage::Completed => "Processing completed",
        }
    }

    /// Record progress reached once this stage has started
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            ProcessingStage::ImageLoading => 10,
            ProcessingStage::Preprocessing => 25,
            ProcessingStage::Inference => 70,
            ProcessingStage::MaskGeneration => 85,
            ProcessingStage::BackgroundRemoval => 95,
            ProcessingStage::FormatConversion => 98,
            ProcessingStage::Completed => 100,
        }
    }
}

/// Stage change of one image
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub filename: String,
    pub stage: ProcessingStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    pub description: String,
    /// Elapsed time since the image started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(filename: &str, stage: ProcessingStage, start_time: Instant) -> Self {
        Self {
            filename: filename.to_string(),
            progress: stage.progress_percentage(),
            description: stage.description().to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
        }
    }
}

/// Running statistics of a batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProcessingStats {
    /// Items settled so far (done or error)
    pub items_completed: usize,
    pub items_total: usize,
    pub items_failed: usize,
    /// Name of the item that settled last
    pub current_item_name: String,
    /// Items per second
    pub processing_rate: f64,
    /// Estimated time remaining in seconds
    pub eta_seconds: Option<u64>,
}

impl BatchProcessingStats {
    /// Statistics after `items_completed` of `items_total` items in `elapsed_ms`
    #[must_use]
    pub fn new(
        items_completed: usize,
        items_total: usize,
        items_failed: usize,
        current_item_name: &str,
        elapsed_ms: u64,
    ) -> Self {
        let processing_rate = if elapsed_ms == 0 {
            0.0
        } else {
            items_completed as f64 * 1000.0 / elapsed_ms as f64
        };
        let remaining = items_total.saturating_sub(items_completed);
        let eta_seconds = (processing_rate > 0.0)
            .then(|| (remaining as f64 / processing_rate).round() as u64);

        Self {
            items_completed,
            items_total,
            items_failed,
            current_item_name: current_item_name.to_string(),
            processing_rate,
            eta_seconds,
        }
    }

    /// Overall percentage (0-100)
    #[must_use]
    pub fn percentage(&self) -> u8 {
        if self.items_total == 0 {
            return 100;
        }
        ((self.items_completed.min(self.items_total) * 100) / self.items_total) as u8
    }
}

/// Receives progress events from the batch processor
pub trait ProgressReporter: Send + Sync {
    /// An image entered a new stage
    fn report_progress(&self, update: ProgressUpdate);

    /// An image finished successfully
    fn report_completion(&self, filename: &str, timings: ProcessingTimings);

    /// An image failed in `stage`
    fn report_error(&self, filename: &str, stage: ProcessingStage, error: &str);

    /// An item settled; called once per item with updated batch statistics
    fn report_batch_progress(&self, stats: BatchProcessingStats) {
        drop(stats);
    }
}

/// Reporter that discards all events
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _filename: &str, _timings: ProcessingTimings) {}

    fn report_error(&self, _filename: &str, _stage: ProcessingStage, _error: &str) {}
}

/// Reporter that writes events to the log
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// `verbose` adds elapsed times and per-stage timings
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{}%] {}: {} ({}ms elapsed)",
                update.progress,
                update.filename,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::debug!("[{}%] {}: {}", update.progress, update.filename, update.description);
        }
    }

    fn report_completion(&self, filename: &str, timings: ProcessingTimings) {
        log::info!("✅ {filename} completed in {}ms", timings.total_ms);

        if self.verbose {
            log::info!("    • Image decode: {}ms", timings.image_decode_ms);
            log::info!("    • Preprocessing: {}ms", timings.preprocessing_ms);
            log::info!(
                "    • Inference: {}ms ({:.0}% of total)",
                timings.inference_ms,
                timings.inference_ratio() * 100.0
            );
            log::info!("    • Compositing: {}ms", timings.compositing_ms);
            log::info!("    • Encoding: {}ms", timings.encode_ms);
        }
    }

    fn report_error(&self, filename: &str, stage: ProcessingStage, error: &str) {
        log::error!("❌ {filename}: error during {}: {error}", stage.description());
    }

    fn report_batch_progress(&self, stats: BatchProcessingStats) {
        match stats.eta_seconds {
            Some(eta) if self.verbose => log::info!(
                "📁 {}/{} images ({} failed, {:.1}/sec, ~{eta}s remaining)",
                stats.items_completed,
                stats.items_total,
                stats.items_failed,
                stats.processing_rate
            ),
            _ => log::info!(
                "📁 {}/{} images ({} failed)",
                stats.items_completed,
                stats.items_total,
                stats.items_failed
            ),
        }
    }
}

/// Tracks stage timing of one image and forwards stage changes to a reporter
pub struct ProgressTracker {
    reporter: Arc<dyn ProgressReporter>,
    filename: String,
    start_time: Instant,
    current_stage: Option<ProcessingStage>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(reporter: Arc<dyn ProgressReporter>, filename: &str) -> Self {
        Self {
            reporter,
            filename: filename.to_string(),
            start_time: Instant::now(),
            current_stage: None,
        }
    }

    /// Tracker with a no-op reporter
    #[must_use]
    pub fn no_op(filename: &str) -> Self {
        Self::new(Arc::new(NoOpProgressReporter), filename)
    }

    /// Enter `stage`, returning its progress percentage
    pub fn enter(&mut self, stage: ProcessingStage) -> u8 {
        self.current_stage = Some(stage);
        self.reporter
            .report_progress(ProgressUpdate::new(&self.filename, stage, self.start_time));
        stage.progress_percentage()
    }

    /// Stage most recently entered
    #[must_use]
    pub fn current_stage(&self) -> Option<ProcessingStage> {
        self.current_stage
    }

    pub fn complete(&mut self, timings: ProcessingTimings) {
        self.enter(ProcessingStage::Completed);
        self.reporter.report_completion(&self.filename, timings);
    }

    /// Report a failure in the current stage
    pub fn fail(&self, error: &str) {
        let stage = self.current_stage.unwrap_or(ProcessingStage::ImageLoading);
        self.reporter.report_error(&self.filename, stage, error);
    }

    /// Milliseconds since the tracker was created
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct TestProgressReporter {
        events: Mutex<Vec<String>>,
    }

    impl TestProgressReporter {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ProgressReporter for TestProgressReporter {
        fn report_progress(&self, update: ProgressUpdate) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{} {}", update.filename, update.progress));
        }

        fn report_completion(&self, filename: &str, _timings: ProcessingTimings) {
            self.events.lock().unwrap().push(format!("{filename} completed"));
        }

        fn report_error(&self, filename: &str, stage: ProcessingStage, error: &str) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{filename} {stage:?} {error}"));
        }
    }

    #[test]
    fn test_stage_percentages_increase() {
        let stages = [
            ProcessingStage::ImageLoading,
            ProcessingStage::Preprocessing,
            ProcessingStage::Inference,
            ProcessingStage::MaskGeneration,
            ProcessingStage::BackgroundRemoval,
            ProcessingStage::FormatConversion,
            ProcessingStage::Completed,
        ];
        let percentages: Vec<u8> = stages.iter().map(ProcessingStage::progress_percentage).collect();
        assert!(percentages.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(percentages.last(), Some(&100));
    }

    #[test]
    fn test_tracker_reports_stages() {
        let reporter = Arc::new(TestProgressReporter::default());
        let mut tracker = ProgressTracker::new(reporter.clone(), "a.png");

        assert_eq!(tracker.enter(ProcessingStage::ImageLoading), 10);
        assert_eq!(tracker.enter(ProcessingStage::Inference), 70);
        tracker.complete(ProcessingTimings::default());

        assert_eq!(
            reporter.events(),
            vec!["a.png 10", "a.png 70", "a.png 100", "a.png completed"]
        );
    }

    #[test]
    fn test_tracker_reports_failure_stage() {
        let reporter = Arc::new(TestProgressReporter::default());
        let mut tracker = ProgressTracker::new(reporter.clone(), "b.png");
        tracker.fail("early");
        tracker.enter(ProcessingStage::Preprocessing);
        tracker.fail("bad tensor");

        let events = reporter.events();
        assert_eq!(events[0], "b.png ImageLoading early");
        assert_eq!(events[2], "b.png Preprocessing bad tensor");
        assert_eq!(tracker.current_stage(), Some(ProcessingStage::Preprocessing));
    }

    #[test]
    fn test_batch_stats() {
        let stats = BatchProcessingStats::new(2, 4, 1, "x.png", 1000);
        assert!((stats.processing_rate - 2.0).abs() < f64::EPSILON);
        assert_eq!(stats.eta_seconds, Some(1));
        assert_eq!(stats.percentage(), 50);

        let idle = BatchProcessingStats::new(0, 3, 0, "", 0);
        assert_eq!(idle.eta_seconds, None);
        assert_eq!(BatchProcessingStats::new(0, 0, 0, "", 0).percentage(), 100);
    }
}
