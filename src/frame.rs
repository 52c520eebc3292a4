//! Decoded video frames.
//!
//! A `Frame` is an owned RGB8 raster. Frames are always copied, never
//! aliased, when handed across the capture -> orchestrator -> live-state
//! boundary, so each component is free to mutate its own buffer.

use anyhow::{anyhow, Result};
use image::RgbImage;

/// Bytes per pixel for the RGB8 layout used throughout the pipeline.
pub const BYTES_PER_PIXEL: usize = 3;

/// An owned, decoded raster image in RGB8 row-major layout.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pixels: Vec<u8>,
}

impl Frame {
    /// Wrap raw RGB8 bytes. Fails when the buffer does not match the
    /// declared dimensions.
    pub fn from_rgb8(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(BYTES_PER_PIXEL))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// An all-black frame of the given dimensions.
    pub fn black(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// View as an `image::RgbImage` copy for resize/encode operations.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        RgbImage::from_vec(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            pixels: image.into_raw(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb8_rejects_mismatched_buffer() {
        assert!(Frame::from_rgb8(4, 4, vec![0u8; 4 * 4 * 3]).is_ok());
        assert!(Frame::from_rgb8(4, 4, vec![0u8; 7]).is_err());
    }

    #[test]
    fn rgb_image_round_trip() {
        let mut frame = Frame::black(3, 2);
        frame.pixels_mut()[0] = 200;
        let image = frame.to_rgb_image().unwrap();
        let back = Frame::from_rgb_image(image);
        assert_eq!(back, frame);
    }
}
