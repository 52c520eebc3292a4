//! Frame acquisition with backend fallback.
//!
//! Live capture tries an ordered list of backend probes, most specialized
//! first. A probe only counts as usable once a non-empty trial frame has
//! been read from it; opening alone is not enough, since a backend can
//! open a device it cannot actually read. Replay capture decodes a
//! pre-recorded file and loops back to the first frame at end-of-stream,
//! so a file behaves like an endless source.
//!
//! Available backends:
//! - V4L2 devices (feature: capture-v4l2)
//! - ffmpeg file replay (feature: replay-ffmpeg)
//! - Synthetic sources for `stub://` paths (always available; tests and
//!   hardware-free runs)

#[cfg(feature = "capture-v4l2")]
mod normalize;
#[cfg(feature = "replay-ffmpeg")]
mod replay;
mod synthetic;
#[cfg(feature = "capture-v4l2")]
mod v4l2;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

/// Trial-read attempts per probed backend before moving on.
const TRIAL_READ_ATTEMPTS: u32 = 3;
/// Delay between trial-read attempts.
const TRIAL_READ_DELAY: Duration = Duration::from_millis(100);

/// Parameters requested for a live device.
#[derive(Clone, Debug)]
pub struct LiveRequest {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub buffer_depth: u32,
}

/// How to acquire frames.
#[derive(Clone, Debug)]
pub enum CaptureMode {
    Live(LiveRequest),
    Replay(PathBuf),
}

/// Actual negotiated capture parameters. Backends do not always honor the
/// requested values, so these are read back after opening.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CaptureParams {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Result of one frame pull.
#[derive(Debug)]
pub enum PullOutcome {
    Frame(Frame),
    /// Transient live-mode read miss; the source stays open.
    NoFrame,
}

/// A concrete opened capture strategy.
pub(crate) trait CaptureBackend: Send {
    fn name(&self) -> &'static str;

    /// Blocking read bounded by the backend's own latency. `Ok(NoFrame)`
    /// is a transient miss; `Err` is permanent.
    fn read_frame(&mut self) -> Result<PullOutcome>;

    fn params(&self) -> CaptureParams;

    fn close(&mut self) {}
}

/// One live-backend probe strategy: open the backend or explain why not.
struct BackendProbe {
    name: &'static str,
    probe: fn(&LiveRequest) -> Result<Box<dyn CaptureBackend>>,
}

/// Ordered probe list, most specialized first, most generic last.
fn live_probes() -> Vec<BackendProbe> {
    let mut probes = Vec::new();
    #[cfg(feature = "capture-v4l2")]
    probes.push(BackendProbe {
        name: "v4l2",
        probe: v4l2::probe,
    });
    probes.push(BackendProbe {
        name: "synthetic",
        probe: synthetic::probe_live,
    });
    probes
}

/// First-success-wins combinator over the probe list. A backend is only
/// accepted after a non-empty trial frame.
fn open_live(request: &LiveRequest) -> Result<Box<dyn CaptureBackend>> {
    for probe in live_probes() {
        log::info!("trying {} capture backend...", probe.name);
        let mut backend = match (probe.probe)(request) {
            Ok(backend) => backend,
            Err(err) => {
                log::info!("{} backend failed to open: {:#}", probe.name, err);
                continue;
            }
        };

        if trial_read(backend.as_mut()) {
            let params = backend.params();
            log::info!(
                "{} backend works: {}x{} @ {:.1} fps",
                probe.name,
                params.width,
                params.height,
                params.fps
            );
            return Ok(backend);
        }

        log::info!("{} backend opened but cannot read frames", probe.name);
        backend.close();
    }

    Err(anyhow!(
        "no capture backend produced a readable frame for device '{}'.\n\
         Check that the camera is connected, or run against a recording \
         with --file /path/to/video",
        request.device
    ))
}

fn trial_read(backend: &mut dyn CaptureBackend) -> bool {
    for attempt in 0..TRIAL_READ_ATTEMPTS {
        match backend.read_frame() {
            Ok(PullOutcome::Frame(frame)) if !frame.is_empty() => return true,
            Ok(_) => {}
            Err(err) => {
                log::debug!("trial read failed: {:#}", err);
            }
        }
        if attempt + 1 < TRIAL_READ_ATTEMPTS {
            std::thread::sleep(TRIAL_READ_DELAY);
        }
    }
    false
}

#[allow(unused_variables)]
fn open_replay(path: &PathBuf) -> Result<Box<dyn CaptureBackend>> {
    if path.to_string_lossy().starts_with("stub://") {
        return synthetic::open_replay(path);
    }
    #[cfg(feature = "replay-ffmpeg")]
    {
        replay::open(path)
    }
    #[cfg(not(feature = "replay-ffmpeg"))]
    {
        Err(anyhow!(
            "replay from {} requires the replay-ffmpeg feature",
            path.display()
        ))
    }
}

/// A frame source, either a live device (with backend fallback) or a
/// looping replay file. Constructed once at startup and owned exclusively
/// by the pipeline.
pub struct CaptureSource {
    backend: Box<dyn CaptureBackend>,
    params: CaptureParams,
    replay: bool,
}

impl CaptureSource {
    pub fn open(mode: CaptureMode) -> Result<Self> {
        let (backend, replay) = match &mode {
            CaptureMode::Live(request) => {
                log::info!(
                    "initializing camera: {}x{} @ {} fps (buffer depth {})",
                    request.width,
                    request.height,
                    request.fps,
                    request.buffer_depth
                );
                (open_live(request)?, false)
            }
            CaptureMode::Replay(path) => {
                log::info!("initializing from video file: {}", path.display());
                (open_replay(path)?, true)
            }
        };
        let params = backend.params();
        if replay {
            log::info!(
                "video opened: {}x{} @ {:.1} fps",
                params.width,
                params.height,
                params.fps
            );
        }
        Ok(Self {
            backend,
            params,
            replay,
        })
    }

    /// Pull the next frame. In live mode a read failure is transient
    /// (`Ok(NoFrame)`); in replay mode the backend rewinds at end-of-stream
    /// and only a failure after the rewind attempt is permanent.
    pub fn pull_frame(&mut self) -> Result<PullOutcome> {
        self.backend.read_frame()
    }

    /// Actual width/height/fps negotiated at open time.
    pub fn negotiated(&self) -> CaptureParams {
        self.params
    }

    pub fn is_replay(&self) -> bool {
        self.replay
    }

    pub fn close(&mut self) {
        self.backend.close();
        log::info!("capture source released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_stub_device_opens_via_fallback() {
        let mut source = CaptureSource::open(CaptureMode::Live(LiveRequest {
            device: "stub://camera".into(),
            width: 320,
            height: 240,
            fps: 15,
            buffer_depth: 1,
        }))
        .expect("open stub device");

        assert!(!source.is_replay());
        assert_eq!(source.negotiated().width, 320);
        match source.pull_frame().expect("pull") {
            PullOutcome::Frame(frame) => {
                assert_eq!(frame.width, 320);
                assert_eq!(frame.height, 240);
            }
            PullOutcome::NoFrame => panic!("stub device must always produce frames"),
        }
    }

    #[test]
    fn unusable_live_device_fails_with_replay_hint() {
        let err = CaptureSource::open(CaptureMode::Live(LiveRequest {
            device: "/dev/null-camera".into(),
            width: 640,
            height: 480,
            fps: 30,
            buffer_depth: 1,
        }))
        .err()
        .expect("no backend should accept a bogus device");
        assert!(err.to_string().contains("--file"));
    }

    #[test]
    fn replay_stub_loops_back_to_first_frame() {
        let mut source =
            CaptureSource::open(CaptureMode::Replay(PathBuf::from("stub://clip"))).unwrap();
        assert!(source.is_replay());

        let clip_len = synthetic::STUB_CLIP_FRAMES;
        let first = match source.pull_frame().unwrap() {
            PullOutcome::Frame(frame) => frame,
            PullOutcome::NoFrame => panic!("replay must produce a frame"),
        };
        for _ in 1..clip_len {
            source.pull_frame().unwrap();
        }
        // Past the last frame: the source rewinds instead of failing.
        let looped = match source.pull_frame().unwrap() {
            PullOutcome::Frame(frame) => frame,
            PullOutcome::NoFrame => panic!("replay must rewind, not fail"),
        };
        assert_eq!(looped, first);
    }
}
