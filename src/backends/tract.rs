//! Pure Rust execution backend built on Tract
//!
//! CPU only. Used for the default device when ONNX Runtime is not compiled in.

use crate::backends::ProviderInfo;
use crate::error::{BgRemovalError, Result};
use crate::inference::SegmentationModel;
use instant::Instant;
use ndarray::Array4;
use tract_onnx::prelude::*;

type RunnableOnnx = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Segmentation model running on a Tract plan
#[derive(Debug)]
pub struct TractModel {
    model: RunnableOnnx,
    name: String,
}

impl TractModel {
    #[must_use]
    pub fn list_providers() -> Vec<ProviderInfo> {
        vec![ProviderInfo::new(
            "CPU",
            true,
            "Pure Rust CPU inference (no external dependencies)",
        )]
    }

    /// Parse, optimize and plan serialized ONNX weights
    ///
    /// # Errors
    /// - Invalid model data or unsupported operators
    pub fn from_bytes(model_data: &[u8], name: &str) -> Result<Self> {
        let load_start = Instant::now();

        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| BgRemovalError::model(format!("Failed to load ONNX model: {e}")))?
            .into_optimized()
            .map_err(|e| BgRemovalError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| BgRemovalError::model(format!("Failed to create runnable model: {e}")))?;

        log::info!(
            "Tract plan for {name} ready in {}ms",
            load_start.elapsed().as_millis()
        );

        Ok(Self {
            model,
            name: name.to_string(),
        })
    }
}

impl SegmentationModel for TractModel {
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let inference_start = Instant::now();

        let input_tensor = Tensor::from(input.clone());
        let outputs = self
            .model
            .run(tvec![input_tensor.into()])
            .map_err(|e| BgRemovalError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| BgRemovalError::inference("No output tensor found"))?
            .into_arc_tensor();

        let output_data = output_tensor.to_array_view::<f32>().map_err(|e| {
            BgRemovalError::inference(format!("Failed to convert output tensor: {e}"))
        })?;

        let dims = match *output_data.shape() {
            [n, c, h, w] => (n, c, h, w),
            [n, h, w] => (n, 1, h, w),
            ref other => {
                return Err(BgRemovalError::inference(format!(
                    "Expected 3D or 4D output tensor, got {}D",
                    other.len()
                )))
            },
        };

        let output = Array4::from_shape_vec(dims, output_data.to_owned().into_raw_vec_and_offset().0)
            .map_err(|e| {
                BgRemovalError::inference(format!("Failed to reshape output tensor: {e}"))
            })?;

        log::debug!(
            "Tract inference {:?} -> {:?} in {}ms",
            input.dim(),
            output.dim(),
            inference_start.elapsed().as_millis()
        );
        Ok(output)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
