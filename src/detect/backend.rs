//! Inference backend seam.

use anyhow::Result;

use crate::detect::tensor::OutputTensor;

/// Preprocessed model input: normalized [0,1] f32 values in planar CHW
/// order (all R, then all G, then all B) at the model's fixed input size.
#[derive(Clone, Debug)]
pub struct ModelInput {
    pub data: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

/// A loaded detection model capable of one forward pass at a time.
///
/// Backends own the compiled model; preprocessing and output decoding are
/// shared by the engine, so a backend only maps `ModelInput` to a dense
/// `OutputTensor`.
pub trait InferenceBackend: Send {
    /// Backend identifier for logs.
    fn name(&self) -> &'static str;

    /// Run one forward pass.
    fn forward(&mut self, input: &ModelInput) -> Result<OutputTensor>;
}
