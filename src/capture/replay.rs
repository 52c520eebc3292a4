#![cfg(feature = "replay-ffmpeg")]

//! Video-file replay backend using FFmpeg.
//!
//! Frames are decoded to RGB24 at the file's native resolution. When the
//! file runs out of packets the demuxer and decoder are reopened so the
//! clip loops forever; a second consecutive failure is treated as
//! permanent.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::{CaptureBackend, CaptureParams, PullOutcome};
use crate::frame::Frame;

pub(crate) fn open(path: &Path) -> Result<Box<dyn CaptureBackend>> {
    Ok(Box::new(ReplayBackend::open(path.to_path_buf())?))
}

struct ReplayBackend {
    path: PathBuf,
    decode: Option<DecodeState>,
    params: CaptureParams,
}

struct DecodeState {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    fps: f64,
}

impl ReplayBackend {
    fn open(path: PathBuf) -> Result<Self> {
        let decode = DecodeState::open(&path)?;
        let params = CaptureParams {
            width: decode.decoder.width(),
            height: decode.decoder.height(),
            fps: decode.fps,
        };

        Ok(Self {
            path,
            decode: Some(decode),
            params,
        })
    }

    /// Reopen the demuxer and decoder from the start of the file.
    fn rewind(&mut self) -> Result<()> {
        log::debug!("replay reached end of {}, rewinding", self.path.display());
        self.decode = Some(DecodeState::open(&self.path)?);
        Ok(())
    }
}

impl DecodeState {
    fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("open replay file '{}'", path.display()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("replay file has no video track"))?;
        let stream_index = input_stream.index();
        let rate = input_stream.avg_frame_rate();
        let fps = if rate.denominator() > 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            fps,
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        let mut rgb_frame = ffmpeg::frame::Video::empty();

        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }

            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;

            while self.decoder.receive_frame(&mut decoded).is_ok() {
                self.scaler
                    .run(&decoded, &mut rgb_frame)
                    .context("scale frame to RGB")?;
                let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
                return Ok(Some(Frame::from_rgb8(width, height, pixels)?));
            }
        }

        // Demuxer is exhausted.
        Ok(None)
    }
}

impl CaptureBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "ffmpeg-replay"
    }

    fn read_frame(&mut self) -> Result<PullOutcome> {
        let Some(decode) = self.decode.as_mut() else {
            return Err(anyhow!("replay file {} already closed", self.path.display()));
        };

        if let Some(frame) = decode.next_frame()? {
            return Ok(PullOutcome::Frame(frame));
        }

        self.rewind()?;
        let decode = self
            .decode
            .as_mut()
            .ok_or_else(|| anyhow!("replay decoder missing after rewind"))?;
        match decode.next_frame()? {
            Some(frame) => Ok(PullOutcome::Frame(frame)),
            // Empty straight after a rewind means the file itself is bad.
            None => Err(anyhow!(
                "replay file {} yields no frames",
                self.path.display()
            )),
        }
    }

    fn params(&self) -> CaptureParams {
        self.params
    }

    fn close(&mut self) {
        self.decode = None;
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0) as usize;
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
