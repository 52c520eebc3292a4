//! Typed view over a flat model output buffer.

use anyhow::{anyhow, Result};

/// Dense model output shaped `(channels, proposals)` in channel-major
/// order, i.e. `value(proposal, channel) = data[channel * proposals +
/// proposal]`. This matches YOLOv8-style `[1, 4 + classes, N]` output and
/// replaces raw offset arithmetic at decode sites with bounds-checked
/// `(proposal, channel)` indexing.
#[derive(Clone, Debug)]
pub struct OutputTensor {
    data: Vec<f32>,
    proposals: usize,
    channels: usize,
}

impl OutputTensor {
    pub fn new(data: Vec<f32>, proposals: usize, channels: usize) -> Result<Self> {
        let expected = proposals
            .checked_mul(channels)
            .ok_or_else(|| anyhow!("output tensor shape overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "output tensor has {} values, expected {} ({} proposals x {} channels)",
                data.len(),
                expected,
                proposals,
                channels
            ));
        }
        Ok(Self {
            data,
            proposals,
            channels,
        })
    }

    pub fn proposals(&self) -> usize {
        self.proposals
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Value at `(proposal, channel)`. Callers stay within the declared
    /// shape; both axes are asserted in debug builds.
    pub fn at(&self, proposal: usize, channel: usize) -> f32 {
        debug_assert!(proposal < self.proposals && channel < self.channels);
        self.data[channel * self.proposals + proposal]
    }

    /// Best-scoring class and its score for one proposal. Class channels
    /// start after the four box channels.
    pub fn best_class(&self, proposal: usize) -> (usize, f32) {
        let mut best_class = 0usize;
        let mut best_score = 0.0f32;
        for class in 0..self.channels.saturating_sub(4) {
            let score = self.at(proposal, 4 + class);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        (best_class, best_score)
    }
}
