#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{InferenceBackend, ModelInput};
use crate::detect::tensor::OutputTensor;

/// Tract-based ONNX backend.
///
/// Loads a local `.onnx` graph (weights are embedded in the graph file)
/// and runs CPU inference on NCHW f32 input.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    width: u32,
    height: u32,
}

impl TractBackend {
    pub fn load<P: AsRef<Path>>(
        graph_path: P,
        weights_path: Option<&Path>,
        width: u32,
        height: u32,
        use_acceleration: bool,
    ) -> Result<Self> {
        let graph_path = graph_path.as_ref();
        if let Some(weights) = weights_path {
            // ONNX embeds weights in the graph; a split weights file is a
            // config mismatch worth surfacing early.
            if !weights.exists() {
                return Err(anyhow!(
                    "weights file {} does not exist (ONNX models embed weights; \
                     drop the second model_path entry)",
                    weights.display()
                ));
            }
            log::debug!(
                "ignoring separate weights file {} for ONNX model",
                weights.display()
            );
        }
        if use_acceleration {
            log::warn!("tract backend has no GPU path; running on CPU");
        }

        let model = tract_onnx::onnx()
            .model_for_path(graph_path)
            .with_context(|| format!("failed to load ONNX model from {}", graph_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
        })
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn forward(&mut self, input: &ModelInput) -> Result<OutputTensor> {
        if input.width != self.width || input.height != self.height {
            return Err(anyhow!(
                "model input {}x{} does not match plan {}x{}",
                input.width,
                input.height,
                self.width,
                self.height
            ));
        }

        let tensor = Tensor::from_shape(
            &[1, 3, self.height as usize, self.width as usize],
            &input.data,
        )
        .context("build input tensor")?;

        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;

        // Expect [1, channels, proposals]; tolerate a squeezed leading dim.
        let shape = view.shape();
        let (channels, proposals) = match shape {
            [1, c, n] => (*c, *n),
            [c, n] => (*c, *n),
            other => {
                return Err(anyhow!(
                    "unexpected model output shape {:?} (want [1, channels, proposals])",
                    other
                ))
            }
        };

        let data: Vec<f32> = view.iter().copied().collect();
        OutputTensor::new(data, proposals, channels)
    }
}
