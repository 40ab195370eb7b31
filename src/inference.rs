//! Inference collaborator abstractions
//!
//! The provider never talks to an execution engine directly. It goes through
//! three seams:
//! - [`ModelLoader`] resolves a registry id into a model and its processor
//! - [`ImageTransform`] turns a decoded image into the model's input tensor
//! - [`SegmentationModel`] runs the forward pass and returns the alpha matte

use crate::{config::LoadOptions, error::Result};
use async_trait::async_trait;
use image::DynamicImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A segmentation model producing a single-channel alpha matte
pub trait SegmentationModel: Send {
    /// Run the forward pass
    ///
    /// The input is an NCHW tensor produced by the matching [`ImageTransform`];
    /// the output is a `[1, 1, H, W]` matte with values in `[0, 1]`.
    ///
    /// # Errors
    /// - Model inference failures
    /// - Tensor conversion errors or unexpected output shapes
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Short identifier used in logs
    fn name(&self) -> &str;
}

/// Pre-processing transform that pairs with a [`SegmentationModel`]
pub trait ImageTransform: Send + Sync {
    /// Convert a decoded image into model input (`pixel_values`)
    ///
    /// # Errors
    /// - Image dimensions the transform cannot handle
    fn preprocess(&self, image: &DynamicImage) -> Result<Array4<f32>>;
}

/// Phase of a load progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    /// A file transfer is about to start
    Initiate,
    /// Bytes arrived for a file
    Progress,
    /// A file is available locally
    Done,
    /// The resource has been constructed and is usable
    Ready,
}

/// Progress event emitted while a model or processor is loading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadProgress {
    /// Event phase
    pub status: LoadStatus,
    /// Registry file the event refers to
    pub file: Option<String>,
    /// Fractional completion in `[0, 1]`, when known
    pub progress: Option<f32>,
}

impl LoadProgress {
    #[must_use]
    pub fn initiate(file: &str) -> Self {
        Self {
            status: LoadStatus::Initiate,
            file: Some(file.to_string()),
            progress: Some(0.0),
        }
    }

    #[must_use]
    pub fn progress(file: &str, fraction: f32) -> Self {
        Self {
            status: LoadStatus::Progress,
            file: Some(file.to_string()),
            progress: Some(fraction.clamp(0.0, 1.0)),
        }
    }

    #[must_use]
    pub fn done(file: &str) -> Self {
        Self {
            status: LoadStatus::Done,
            file: Some(file.to_string()),
            progress: Some(1.0),
        }
    }

    #[must_use]
    pub fn ready() -> Self {
        Self {
            status: LoadStatus::Ready,
            file: None,
            progress: Some(1.0),
        }
    }

    /// Whether this event marks the end of loading for the resource
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.status, LoadStatus::Done | LoadStatus::Ready)
    }
}

/// Callback receiving load progress events
pub type ProgressCallback = Arc<dyn Fn(LoadProgress) + Send + Sync>;

/// Forward an event to an optional callback
pub fn emit_progress(callback: Option<&ProgressCallback>, event: LoadProgress) {
    if let Some(callback) = callback {
        callback(event);
    }
}

/// Loads models and processors from the remote registry
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Load the segmentation model for `model_id`
    ///
    /// # Errors
    /// - Registry or network failures
    /// - The requested device or precision is not available
    /// - Model deserialization failures
    async fn load_model(
        &self,
        model_id: &str,
        options: LoadOptions,
        progress: Option<ProgressCallback>,
    ) -> Result<Box<dyn SegmentationModel>>;

    /// Load the processor transform for `model_id`
    ///
    /// # Errors
    /// - Registry or network failures
    /// - Invalid processor configuration
    async fn load_processor(
        &self,
        model_id: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<Box<dyn ImageTransform>>;
}
