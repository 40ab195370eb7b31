//! Frontend-facing services

pub mod progress;

pub use progress::{
    BatchProcessingStats, ConsoleProgressReporter, NoOpProgressReporter, ProcessingStage,
    ProgressReporter, ProgressTracker, ProgressUpdate,
};
