//! Synthetic capture backends for `stub://` sources.
//!
//! Used by tests and hardware-free runs. The live variant generates an
//! endless moving gradient; the replay variant simulates a short clip that
//! loops at end-of-stream like a real replay file.

use std::path::Path;

use anyhow::{anyhow, Result};

use super::{CaptureBackend, CaptureParams, LiveRequest, PullOutcome};
use crate::frame::Frame;

/// Frames per loop of a synthetic replay "clip".
pub(crate) const STUB_CLIP_FRAMES: u64 = 25;
const STUB_CLIP_WIDTH: u32 = 320;
const STUB_CLIP_HEIGHT: u32 = 240;
const STUB_CLIP_FPS: f64 = 25.0;

pub(crate) fn probe_live(request: &LiveRequest) -> Result<Box<dyn CaptureBackend>> {
    if !request.device.starts_with("stub://") {
        return Err(anyhow!(
            "'{}' is not a synthetic device (expected stub:// prefix)",
            request.device
        ));
    }
    Ok(Box::new(SyntheticLive {
        params: CaptureParams {
            width: request.width,
            height: request.height,
            fps: request.fps as f64,
        },
        frame_count: 0,
    }))
}

pub(crate) fn open_replay(path: &Path) -> Result<Box<dyn CaptureBackend>> {
    log::info!("opening synthetic replay clip {}", path.display());
    Ok(Box::new(SyntheticReplay { position: 0 }))
}

struct SyntheticLive {
    params: CaptureParams,
    frame_count: u64,
}

impl CaptureBackend for SyntheticLive {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn read_frame(&mut self) -> Result<PullOutcome> {
        self.frame_count += 1;
        Ok(PullOutcome::Frame(gradient_frame(
            self.params.width,
            self.params.height,
            self.frame_count,
        )))
    }

    fn params(&self) -> CaptureParams {
        self.params
    }
}

struct SyntheticReplay {
    position: u64,
}

impl CaptureBackend for SyntheticReplay {
    fn name(&self) -> &'static str {
        "synthetic-replay"
    }

    fn read_frame(&mut self) -> Result<PullOutcome> {
        // Loop at end-of-clip, mirroring replay-file rewind.
        if self.position >= STUB_CLIP_FRAMES {
            self.position = 0;
        }
        let frame = gradient_frame(STUB_CLIP_WIDTH, STUB_CLIP_HEIGHT, self.position);
        self.position += 1;
        Ok(PullOutcome::Frame(frame))
    }

    fn params(&self) -> CaptureParams {
        CaptureParams {
            width: STUB_CLIP_WIDTH,
            height: STUB_CLIP_HEIGHT,
            fps: STUB_CLIP_FPS,
        }
    }
}

/// Deterministic moving-gradient content keyed on the frame index.
fn gradient_frame(width: u32, height: u32, index: u64) -> Frame {
    let mut frame = Frame::black(width, height);
    for (i, byte) in frame.pixels_mut().iter_mut().enumerate() {
        *byte = ((i as u64 + index * 7) % 256) as u8;
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_probe_rejects_real_device_paths() {
        let request = LiveRequest {
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
            fps: 30,
            buffer_depth: 1,
        };
        assert!(probe_live(&request).is_err());
    }

    #[test]
    fn gradient_frames_vary_by_index() {
        assert_ne!(gradient_frame(8, 8, 0), gradient_frame(8, 8, 1));
        assert_eq!(gradient_frame(8, 8, 3), gradient_frame(8, 8, 3));
    }
}
