//! Test doubles built on the public API

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::Array4;
use rmbg_batch::{
    BgRemovalError, ImageTransform, LoadOptions, LoadProgress, ModelLoader, ModelProvider,
    ProgressCallback, ProviderConfig, Result, SegmentationModel, StaticCapabilityProbe,
};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Model producing a fixed matte at model resolution
pub struct ConstantModel {
    pub height: usize,
    pub width: usize,
    pub value: f32,
}

impl SegmentationModel for ConstantModel {
    fn infer(&mut self, _input: &Array4<f32>) -> Result<Array4<f32>> {
        Ok(Array4::from_elem((1, 1, self.height, self.width), self.value))
    }

    fn name(&self) -> &str {
        "constant"
    }
}

/// Transform producing a fixed-size zero tensor
pub struct ZeroTransform;

impl ImageTransform for ZeroTransform {
    fn preprocess(&self, _image: &DynamicImage) -> Result<Array4<f32>> {
        Ok(Array4::zeros((1, 3, 16, 16)))
    }
}

/// Loader with scripted behaviour and recorded calls
#[derive(Clone, Default)]
pub struct ScriptedLoader {
    pub matte_value: f32,
    pub fail_with: Option<String>,
    pub gate: Option<Arc<Notify>>,
    pub calls: Arc<Mutex<Vec<LoadOptions>>>,
}

impl ScriptedLoader {
    pub fn ready(matte_value: f32) -> Self {
        Self {
            matte_value,
            ..Self::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn gated(matte_value: f32) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let loader = Self {
            matte_value,
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (loader, gate)
    }

    pub fn load_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelLoader for ScriptedLoader {
    async fn load_model(
        &self,
        _model_id: &str,
        options: LoadOptions,
        progress: Option<ProgressCallback>,
    ) -> Result<Box<dyn SegmentationModel>> {
        self.calls.lock().unwrap().push(options);
        if let Some(callback) = &progress {
            callback(LoadProgress::initiate("onnx/model.onnx"));
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(message) = &self.fail_with {
            return Err(BgRemovalError::model(message.clone()));
        }
        if let Some(callback) = &progress {
            callback(LoadProgress::progress("onnx/model.onnx", 0.4));
            callback(LoadProgress::done("onnx/model.onnx"));
        }
        Ok(Box::new(ConstantModel {
            height: 8,
            width: 8,
            value: self.matte_value,
        }))
    }

    async fn load_processor(
        &self,
        _model_id: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<Box<dyn ImageTransform>> {
        if let Some(callback) = &progress {
            callback(LoadProgress::done("preprocessor_config.json"));
        }
        Ok(Box::new(ZeroTransform))
    }
}

pub fn provider(loader: ScriptedLoader, probe: StaticCapabilityProbe) -> Arc<ModelProvider> {
    Arc::new(ModelProvider::new(ProviderConfig::default(), Arc::new(loader), Arc::new(probe)).unwrap())
}

/// Encoded bytes of a solid RGB image
pub fn encoded_image(width: u32, height: u32, rgb: [u8; 3], format: ImageFormat) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb(rgb));
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format).unwrap();
    buffer.into_inner()
}
