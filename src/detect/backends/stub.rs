//! Stub backend for testing.

use anyhow::{anyhow, Result};

use crate::detect::backend::{InferenceBackend, ModelInput};
use crate::detect::tensor::OutputTensor;

/// A proposal the stub backend will emit, in model-input coordinates.
#[derive(Clone, Copy, Debug)]
pub struct StubProposal {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    pub class_id: usize,
    pub score: f32,
}

/// Backend that returns a preset output tensor regardless of input.
///
/// Lets pipeline and decode tests run without a model file.
pub struct StubBackend {
    proposals: Vec<StubProposal>,
    classes: usize,
    fail_forward: bool,
}

impl StubBackend {
    pub fn new(proposals: Vec<StubProposal>, classes: usize) -> Self {
        Self {
            proposals,
            classes,
            fail_forward: false,
        }
    }

    /// Backend whose every forward pass errors, for failure-mode tests.
    pub fn failing() -> Self {
        Self {
            proposals: Vec::new(),
            classes: 1,
            fail_forward: true,
        }
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn forward(&mut self, _input: &ModelInput) -> Result<OutputTensor> {
        if self.fail_forward {
            return Err(anyhow!("stub backend configured to fail"));
        }
        let proposals = self.proposals.len();
        let channels = 4 + self.classes;
        let mut data = vec![0.0f32; proposals * channels];
        for (i, p) in self.proposals.iter().enumerate() {
            data[i] = p.cx;
            data[proposals + i] = p.cy;
            data[proposals * 2 + i] = p.w;
            data[proposals * 3 + i] = p.h;
            if p.class_id < self.classes {
                data[proposals * (4 + p.class_id) + i] = p.score;
            }
        }
        OutputTensor::new(data, proposals, channels)
    }
}
