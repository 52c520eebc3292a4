#![cfg(feature = "capture-v4l2")]

//! V4L2 live-device backend.
//!
//! Opens a local device node, negotiates format and frame rate
//! best-effort, and reads frames through an mmap stream. Requested
//! parameters are applied where the driver allows; the actual negotiated
//! values are what the probe reports upward.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CaptureBackend, CaptureParams, LiveRequest, PullOutcome};
use crate::frame::Frame;

pub(crate) fn probe(request: &LiveRequest) -> Result<Box<dyn CaptureBackend>> {
    if request.device.starts_with("stub://") {
        return Err(anyhow!("synthetic devices are not v4l2 devices"));
    }
    Ok(Box::new(V4l2Backend::open(request)?))
}

struct V4l2Backend {
    state: Option<V4l2State>,
    params: CaptureParams,
    format: PixelFormat,
    device: String,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Backend {
    fn open(request: &LiveRequest) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&request.device)
            .with_context(|| format!("open v4l2 device {}", request.device))?;

        let mut format = device.format().context("read v4l2 format")?;
        format.width = request.width;
        format.height = request.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("failed to set format on {}: {}", request.device, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        let pixel_format = match &format.fourcc.repr {
            b"RGB3" => PixelFormat::Rgb24,
            b"YUYV" => PixelFormat::Yuyv,
            other => {
                return Err(anyhow!(
                    "device {} negotiated unsupported pixel format {}",
                    request.device,
                    String::from_utf8_lossy(other)
                ))
            }
        };

        let mut actual_fps = request.fps as f64;
        if request.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(request.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("failed to set fps on {}: {}", request.device, err);
            }
        }
        if let Ok(params) = device.params() {
            let interval = params.interval;
            if interval.numerator > 0 {
                actual_fps = interval.denominator as f64 / interval.numerator as f64;
            }
        }

        let buffers = request.buffer_depth.max(1);
        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, buffers)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        Ok(Self {
            state: Some(state),
            params: CaptureParams {
                width: format.width,
                height: format.height,
                fps: actual_fps,
            },
            format: pixel_format,
            device: request.device.clone(),
        })
    }
}

impl CaptureBackend for V4l2Backend {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn read_frame(&mut self) -> Result<PullOutcome> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Err(anyhow!("v4l2 device {} already closed", self.device));
        };

        let raw = match state.with_stream_mut(|stream| stream.next().map(|(buf, _)| buf.to_vec()))
        {
            Ok(raw) => raw,
            Err(err) => {
                // A single failed read is transient; the device stays open.
                log::debug!("v4l2 read miss on {}: {}", self.device, err);
                return Ok(PullOutcome::NoFrame);
            }
        };

        let rgb = match normalize_to_rgb(&raw, self.params.width, self.params.height, self.format)
        {
            Ok(rgb) => rgb,
            Err(err) => {
                log::debug!("v4l2 frame normalization failed: {:#}", err);
                return Ok(PullOutcome::NoFrame);
            }
        };

        let frame = Frame::from_rgb8(self.params.width, self.params.height, rgb)?;
        Ok(PullOutcome::Frame(frame))
    }

    fn params(&self) -> CaptureParams {
        self.params
    }

    fn close(&mut self) {
        self.state = None;
    }
}
