//! ONNX Runtime execution backend

use crate::backends::ProviderInfo;
use crate::config::{Device, LoadOptions};
use crate::error::{BgRemovalError, Result};
use crate::inference::SegmentationModel;
use instant::Instant;
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::value::Value;

/// Segmentation model running on an ONNX Runtime session
#[derive(Debug)]
pub struct OnnxModel {
    session: Session,
    name: String,
}

impl OnnxModel {
    /// List ONNX Runtime execution providers with availability status
    #[must_use]
    pub fn list_providers() -> Vec<ProviderInfo> {
        log::debug!(
            "Checking execution providers on {os}/{arch}",
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH
        );

        let cuda_available =
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available =
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                .unwrap_or(false);

        vec![
            ProviderInfo::new("CPU", true, "Always available, uses CPU for inference"),
            ProviderInfo::new(
                "CUDA",
                cuda_available,
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)",
            ),
            ProviderInfo::new(
                "CoreML",
                coreml_available,
                "Apple Silicon GPU acceleration (macOS only)",
            ),
        ]
    }

    /// Build a session from serialized ONNX weights
    ///
    /// # Errors
    /// - Session builder or execution provider configuration failures
    /// - Invalid model data
    pub fn from_bytes(model_data: &[u8], options: &LoadOptions, name: &str) -> Result<Self> {
        let load_start = Instant::now();

        let session_builder = Session::builder()
            .map_err(|e| {
                BgRemovalError::inference(format!("Failed to create session builder: {e}"))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                BgRemovalError::inference(format!("Failed to set optimization level: {e}"))
            })?;

        let session_builder = match options.device {
            Device::GpuAccelerated => Self::with_accelerators(session_builder)?,
            Device::Default => {
                log::debug!("Using CPU execution provider");
                session_builder
            },
        };

        let available = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(8);
        let intra_threads = if options.intra_threads > 0 {
            options.intra_threads
        } else {
            available
        };
        let inter_threads = if options.inter_threads > 0 {
            options.inter_threads
        } else {
            (available / 4).max(1)
        };

        let session = session_builder
            .with_parallel_execution(true)
            .map_err(|e| {
                BgRemovalError::inference(format!("Failed to enable parallel execution: {e}"))
            })?
            .with_intra_threads(intra_threads)
            .map_err(|e| BgRemovalError::inference(format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(inter_threads)
            .map_err(|e| BgRemovalError::inference(format!("Failed to set inter threads: {e}")))?
            .commit_from_memory(model_data)
            .map_err(|e| {
                BgRemovalError::model(format!("Failed to create session from model data: {e}"))
            })?;

        log::info!(
            "ONNX Runtime session for {name} ready in {:.2}ms ({} device, {intra_threads} intra / {inter_threads} inter threads)",
            load_start.elapsed().as_secs_f64() * 1000.0,
            options.device
        );

        Ok(Self {
            session,
            name: name.to_string(),
        })
    }

    /// Register CUDA and `CoreML` when available; CPU stays as the fallback
    fn with_accelerators(session_builder: SessionBuilder) -> Result<SessionBuilder> {
        let mut providers = Vec::new();

        let cuda_provider = CUDAExecutionProvider::default();
        if OrtExecutionProvider::is_available(&cuda_provider).unwrap_or(false) {
            log::info!("CUDA execution provider is available and will be used");
            providers.push(cuda_provider.build());
        }

        let coreml_provider = CoreMLExecutionProvider::default();
        if OrtExecutionProvider::is_available(&coreml_provider).unwrap_or(false) {
            log::info!("CoreML execution provider is available and will be used");
            providers.push(coreml_provider.with_subgraphs(true).build());
        }

        if providers.is_empty() {
            log::warn!("GPU execution requested but no accelerator is available, using CPU");
            return Ok(session_builder);
        }

        session_builder
            .with_execution_providers(providers)
            .map_err(|e| {
                BgRemovalError::inference(format!("Failed to set GPU execution providers: {e}"))
            })
    }
}

impl SegmentationModel for OnnxModel {
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let inference_start = Instant::now();

        let input_value = Value::from_array(input.clone()).map_err(|e| {
            BgRemovalError::processing(format!("Failed to convert input tensor: {e}"))
        })?;

        // Positional inputs: the exported graph names its input differently across variants
        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|e| BgRemovalError::inference(format!("ONNX inference failed: {e}")))?;

        let output_tensor = {
            let keys: Vec<_> = outputs.keys().collect();
            let first_key = keys
                .first()
                .ok_or_else(|| BgRemovalError::inference("No output tensors found"))?;
            outputs
                .get(first_key)
                .ok_or_else(|| BgRemovalError::inference("First output tensor not found"))?
                .try_extract_array::<f32>()
                .map_err(|e| {
                    BgRemovalError::inference(format!("Failed to extract output tensor: {e}"))
                })?
        };

        let output = to_matte(output_tensor.shape(), output_tensor.view().to_owned())?;

        log::debug!(
            "ONNX inference {:?} -> {:?} in {:.2}ms",
            input.dim(),
            output.dim(),
            inference_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(output)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Normalize a 3D `[1, H, W]` or 4D `[1, 1, H, W]` output into a 4D matte
fn to_matte<D: ndarray::Dimension>(
    shape: &[usize],
    data: ndarray::Array<f32, D>,
) -> Result<Array4<f32>> {
    let dims = match *shape {
        [n, c, h, w] => (n, c, h, w),
        [n, h, w] => (n, 1, h, w),
        _ => {
            return Err(BgRemovalError::inference(format!(
                "Expected 3D or 4D output tensor, got {}D",
                shape.len()
            )))
        },
    };

    Array4::from_shape_vec(dims, data.into_raw_vec_and_offset().0)
        .map_err(|e| BgRemovalError::inference(format!("Failed to reshape output tensor: {e}")))
}
