//! Device capability probing and backend selection

use crate::config::{LoadOptions, ProviderConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Result of a capability probe
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuTier {
    /// Benchmark frame rate of the GPU; absent when no usable GPU was found
    pub fps: Option<f64>,
    /// Whether the device is mobile-class
    pub is_mobile: Option<bool>,
    /// Accelerator name, for diagnostics
    pub gpu: Option<String>,
}

impl GpuTier {
    /// Tier of a device with no usable GPU
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Tier of a desktop-class device with a GPU
    #[must_use]
    pub fn desktop_gpu(fps: f64) -> Self {
        Self {
            fps: Some(fps),
            is_mobile: Some(false),
            gpu: None,
        }
    }

    /// GPU execution is worthwhile: a frame rate was reported and the device is not mobile
    #[must_use]
    pub fn supports_gpu(&self) -> bool {
        self.fps.is_some() && !self.is_mobile.unwrap_or(false)
    }
}

/// Strategy that inspects the host before the model is loaded
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    async fn probe(&self) -> GpuTier;
}

/// Pick load options from a probe result and the provider configuration
///
/// GPU execution with the configured precision is requested only when the
/// configuration prefers the GPU and the tier supports it; every other case
/// uses the default backend with default precision.
#[must_use]
pub fn select_load_options(tier: &GpuTier, config: &ProviderConfig) -> LoadOptions {
    let mut options = if config.prefer_gpu && tier.supports_gpu() {
        LoadOptions::gpu(config.precision)
    } else {
        LoadOptions::default_backend()
    };
    options.intra_threads = config.intra_threads;
    options.inter_threads = config.inter_threads;

    debug!(
        device = %options.device,
        precision = %options.precision,
        fps = ?tier.fps,
        is_mobile = ?tier.is_mobile,
        "Selected load options"
    );
    options
}

/// Probe returning a fixed tier
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilityProbe {
    tier: GpuTier,
}

impl StaticCapabilityProbe {
    #[must_use]
    pub fn new(tier: GpuTier) -> Self {
        Self { tier }
    }

    /// Always report a desktop GPU
    #[must_use]
    pub fn force_gpu() -> Self {
        Self::new(GpuTier::desktop_gpu(60.0))
    }

    /// Always report no GPU
    #[must_use]
    pub fn cpu_only() -> Self {
        Self::new(GpuTier::none())
    }
}

#[async_trait]
impl CapabilityProbe for StaticCapabilityProbe {
    async fn probe(&self) -> GpuTier {
        self.tier.clone()
    }
}

/// Probe that inspects the execution providers available on this host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCapabilityProbe;

impl SystemCapabilityProbe {
    fn is_mobile_target() -> bool {
        cfg!(any(target_os = "android", target_os = "ios"))
    }

    #[cfg(feature = "onnx")]
    fn detect_accelerator() -> Option<(String, f64)> {
        // Nominal frame rates; the probe does not benchmark the device
        const CUDA_NOMINAL_FPS: f64 = 60.0;
        const COREML_NOMINAL_FPS: f64 = 30.0;

        crate::backends::onnx::OnnxModel::list_providers()
            .into_iter()
            .filter(|provider| provider.available)
            .find_map(|provider| match provider.name.as_str() {
                "CUDA" => Some((provider.name, CUDA_NOMINAL_FPS)),
                "CoreML" => Some((provider.name, COREML_NOMINAL_FPS)),
                _ => None,
            })
    }

    #[cfg(not(feature = "onnx"))]
    fn detect_accelerator() -> Option<(String, f64)> {
        None
    }
}

#[async_trait]
impl CapabilityProbe for SystemCapabilityProbe {
    async fn probe(&self) -> GpuTier {
        let accelerator = tokio::task::spawn_blocking(Self::detect_accelerator)
            .await
            .unwrap_or(None);

        let tier = match accelerator {
            Some((gpu, fps)) => GpuTier {
                fps: Some(fps),
                is_mobile: Some(Self::is_mobile_target()),
                gpu: Some(gpu),
            },
            None => GpuTier {
                fps: None,
                is_mobile: Some(Self::is_mobile_target()),
                gpu: None,
            },
        };
        debug!(?tier, "Capability probe finished");
        tier
    }
}
