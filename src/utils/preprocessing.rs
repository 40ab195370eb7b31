//! Image processor transform driven by the registry's `preprocessor_config.json`

use crate::{
    error::{BgRemovalError, Result},
    inference::ImageTransform,
};
use image::{imageops::FilterType, DynamicImage};
use ndarray::Array4;
use serde::{Deserialize, Serialize};

/// Target size of the processor resize step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl Default for TargetSize {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
        }
    }
}

/// Processor configuration as published next to the model weights
///
/// Unknown keys are ignored; missing keys fall back to the values used by
/// the default segmentation model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessorConfig {
    pub do_resize: bool,
    pub size: TargetSize,
    /// PIL resampling filter id (0 nearest, 1 lanczos, 2 bilinear, 3 bicubic)
    pub resample: u8,
    pub do_rescale: bool,
    pub rescale_factor: f32,
    pub do_normalize: bool,
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            do_resize: true,
            size: TargetSize::default(),
            resample: 2,
            do_rescale: true,
            rescale_factor: 1.0 / 255.0,
            do_normalize: true,
            image_mean: [0.5, 0.5, 0.5],
            image_std: [1.0, 1.0, 1.0],
        }
    }
}

impl PreprocessorConfig {
    /// Parse a `preprocessor_config.json` document
    ///
    /// # Errors
    /// - Malformed JSON
    /// - Zero target size or zero standard deviation
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            BgRemovalError::model(format!("Failed to parse preprocessor config: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// - Zero target size or zero standard deviation
    pub fn validate(&self) -> Result<()> {
        if self.size.width == 0 || self.size.height == 0 {
            return Err(BgRemovalError::model(format!(
                "Preprocessor target size must be non-zero, got {}x{}",
                self.size.width, self.size.height
            )));
        }
        if self.image_std.iter().any(|std| *std == 0.0) {
            return Err(BgRemovalError::model(
                "Preprocessor image_std must not contain zero",
            ));
        }
        Ok(())
    }

    /// Resize filter matching the configured resample id
    #[must_use]
    pub fn filter(&self) -> FilterType {
        match self.resample {
            0 => FilterType::Nearest,
            1 => FilterType::Lanczos3,
            3 => FilterType::CatmullRom,
            _ => FilterType::Triangle,
        }
    }
}

/// Converts decoded images into normalized NCHW tensors
#[derive(Debug, Clone, Default)]
pub struct ImagePreprocessor {
    config: PreprocessorConfig,
}

impl ImagePreprocessor {
    #[must_use]
    pub fn new(config: PreprocessorConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &PreprocessorConfig {
        &self.config
    }

    fn normalize(&self, value: u8, channel: usize) -> f32 {
        let mut value = f32::from(value);
        if self.config.do_rescale {
            value *= self.config.rescale_factor;
        }
        if self.config.do_normalize {
            if let (Some(mean), Some(std)) = (
                self.config.image_mean.get(channel),
                self.config.image_std.get(channel),
            ) {
                value = (value - mean) / std;
            }
        }
        value
    }
}

impl ImageTransform for ImagePreprocessor {
    fn preprocess(&self, image: &DynamicImage) -> Result<Array4<f32>> {
        if image.width() == 0 || image.height() == 0 {
            return Err(BgRemovalError::processing(
                "Cannot preprocess an image with zero width or height",
            ));
        }

        let rgb = image.to_rgb8();
        let rgb = if self.config.do_resize {
            image::imageops::resize(
                &rgb,
                self.config.size.width,
                self.config.size.height,
                self.config.filter(),
            )
        } else {
            rgb
        };

        let (width, height) = rgb.dimensions();
        let tensor = Array4::from_shape_fn(
            (1, 3, height as usize, width as usize),
            |(_, channel, y, x)| {
                let pixel = rgb.get_pixel(x as u32, y as u32);
                self.normalize(pixel.0.get(channel).copied().unwrap_or(0), channel)
            },
        );

        Ok(tensor)
    }
}
