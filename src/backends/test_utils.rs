//! Mock collaborators for testing the provider and the batch processor
//!
//! These stand in for the registry loader and execution backends so the
//! lifecycle and pipeline can be exercised without model files or network.

use crate::{
    config::LoadOptions,
    error::{BgRemovalError, Result},
    inference::{
        emit_progress, ImageTransform, LoadProgress, ModelLoader, ProgressCallback,
        SegmentationModel,
    },
};
use async_trait::async_trait;
use image::DynamicImage;
use ndarray::Array4;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Model returning a constant matte
#[derive(Debug, Clone)]
pub struct MockModel {
    output_size: (usize, usize),
    value: f32,
    should_fail: bool,
    call_history: Arc<Mutex<Vec<String>>>,
}

impl MockModel {
    #[must_use]
    pub fn new(output_size: (usize, usize), value: f32) -> Self {
        Self {
            output_size,
            value,
            should_fail: false,
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::new((8, 8), 1.0)
        }
    }

    pub fn call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }
}

impl SegmentationModel for MockModel {
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.call_history
            .lock()
            .unwrap()
            .push(format!("infer {:?}", input.dim()));
        if self.should_fail {
            return Err(BgRemovalError::inference("Mock inference failure"));
        }
        let (height, width) = self.output_size;
        Ok(Array4::from_elem((1, 1, height, width), self.value))
    }

    fn name(&self) -> &str {
        "mock-model"
    }
}

/// Transform producing a zero tensor, failing for images of a chosen width
#[derive(Debug, Clone, Default)]
pub struct MockTransform {
    fail_on_width: Option<u32>,
}

impl MockTransform {
    #[must_use]
    pub fn failing_on_width(width: u32) -> Self {
        Self {
            fail_on_width: Some(width),
        }
    }
}

impl ImageTransform for MockTransform {
    fn preprocess(&self, image: &DynamicImage) -> Result<Array4<f32>> {
        if self.fail_on_width == Some(image.width()) {
            return Err(BgRemovalError::processing("Mock preprocessing failure"));
        }
        Ok(Array4::zeros((1, 3, 8, 8)))
    }
}

/// Loader handing out mock models, with optional failure and a release gate
#[derive(Clone)]
pub struct MockLoader {
    model: MockModel,
    transform: MockTransform,
    model_error: Option<String>,
    processor_error: Option<String>,
    gate: Option<Arc<Notify>>,
    call_history: Arc<Mutex<Vec<String>>>,
    options_seen: Arc<Mutex<Vec<LoadOptions>>>,
}

impl MockLoader {
    #[must_use]
    pub fn new(model: MockModel) -> Self {
        Self {
            model,
            transform: MockTransform::default(),
            model_error: None,
            processor_error: None,
            gate: None,
            call_history: Arc::new(Mutex::new(Vec::new())),
            options_seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn with_transform(mut self, transform: MockTransform) -> Self {
        self.transform = transform;
        self
    }

    #[must_use]
    pub fn failing_model(mut self, message: &str) -> Self {
        self.model_error = Some(message.to_string());
        self
    }

    #[must_use]
    pub fn failing_processor(mut self, message: &str) -> Self {
        self.processor_error = Some(message.to_string());
        self
    }

    /// Block `load_model` until the returned handle is notified
    #[must_use]
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }

    pub fn options_seen(&self) -> Vec<LoadOptions> {
        self.options_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelLoader for MockLoader {
    async fn load_model(
        &self,
        model_id: &str,
        options: LoadOptions,
        progress: Option<ProgressCallback>,
    ) -> Result<Box<dyn SegmentationModel>> {
        self.call_history
            .lock()
            .unwrap()
            .push(format!("load_model {model_id}"));
        self.options_seen.lock().unwrap().push(options);

        emit_progress(progress.as_ref(), LoadProgress::initiate("onnx/model.onnx"));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        emit_progress(
            progress.as_ref(),
            LoadProgress::progress("onnx/model.onnx", 0.5),
        );

        if let Some(message) = &self.model_error {
            return Err(BgRemovalError::model(message.clone()));
        }
        emit_progress(progress.as_ref(), LoadProgress::done("onnx/model.onnx"));
        Ok(Box::new(self.model.clone()))
    }

    async fn load_processor(
        &self,
        model_id: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<Box<dyn ImageTransform>> {
        self.call_history
            .lock()
            .unwrap()
            .push(format!("load_processor {model_id}"));

        emit_progress(
            progress.as_ref(),
            LoadProgress::initiate("preprocessor_config.json"),
        );
        if let Some(message) = &self.processor_error {
            return Err(BgRemovalError::model(message.clone()));
        }
        emit_progress(
            progress.as_ref(),
            LoadProgress::done("preprocessor_config.json"),
        );
        Ok(Box::new(self.transform.clone()))
    }
}

/// PNG bytes of a solid RGB image
#[must_use]
pub fn png_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut buffer = std::io::Cursor::new(Vec::new());
    image.write_to(&mut buffer, image::ImageFormat::Png).unwrap();
    buffer.into_inner()
}
