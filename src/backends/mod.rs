//! Execution backends for segmentation models
//!
//! - ONNX Runtime backend (CPU, CUDA, `CoreML`)
//! - Tract backend (pure Rust, CPU only)

use crate::config::LoadOptions;
use crate::error::Result;
use crate::inference::SegmentationModel;
use serde::Serialize;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

#[cfg(test)]
pub mod test_utils;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxModel;

#[cfg(feature = "tract")]
pub use self::tract::TractModel;

/// Availability of one execution provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub available: bool,
    pub description: String,
}

impl ProviderInfo {
    #[must_use]
    pub fn new(name: &str, available: bool, description: &str) -> Self {
        Self {
            name: name.to_string(),
            available,
            description: description.to_string(),
        }
    }
}

/// Execution providers across all compiled-in backends, prefixed with the backend name
#[must_use]
pub fn list_all_providers() -> Vec<ProviderInfo> {
    #[allow(unused_mut)]
    let mut providers = Vec::new();

    #[cfg(feature = "onnx")]
    providers.extend(OnnxModel::list_providers().into_iter().map(|p| ProviderInfo {
        name: format!("onnx:{}", p.name.to_lowercase()),
        ..p
    }));

    #[cfg(feature = "tract")]
    providers.extend(TractModel::list_providers().into_iter().map(|p| ProviderInfo {
        name: format!("tract:{}", p.name.to_lowercase()),
        ..p
    }));

    providers
}

/// Instantiate serialized ONNX weights on the backend matching `options`
///
/// GPU-accelerated execution needs ONNX Runtime. The default device prefers
/// ONNX Runtime on CPU and falls back to Tract.
///
/// # Errors
/// - Backend construction failures
#[cfg(feature = "onnx")]
pub fn build_model(
    model_data: &[u8],
    options: &LoadOptions,
    name: &str,
) -> Result<Box<dyn SegmentationModel>> {
    Ok(Box::new(OnnxModel::from_bytes(model_data, options, name)?))
}

/// Instantiate serialized ONNX weights on Tract
///
/// # Errors
/// - Backend construction failures
#[cfg(all(feature = "tract", not(feature = "onnx")))]
pub fn build_model(
    model_data: &[u8],
    options: &LoadOptions,
    name: &str,
) -> Result<Box<dyn SegmentationModel>> {
    if options.device == crate::config::Device::GpuAccelerated {
        log::warn!("GPU execution requires the onnx feature, using Tract on CPU");
    }
    Ok(Box::new(TractModel::from_bytes(model_data, name)?))
}

/// No backend compiled in
///
/// # Errors
/// - Always; enable the `onnx` or `tract` feature
#[cfg(not(any(feature = "onnx", feature = "tract")))]
pub fn build_model(
    _model_data: &[u8],
    options: &LoadOptions,
    _name: &str,
) -> Result<Box<dyn SegmentationModel>> {
    Err(crate::error::BgRemovalError::invalid_config(format!(
        "No execution backend compiled in for the {} device; enable the onnx or tract feature",
        options.device
    )))
}
