//! Object detection engine.
//!
//! The engine owns a compiled model behind the [`InferenceBackend`] seam
//! and turns frames into labeled, scored bounding boxes:
//! resize -> normalize -> forward pass -> decode -> same-class NMS.
//!
//! A failed inference never crashes the pipeline: every runtime failure
//! degrades to an empty detection list and a log line.

mod backend;
mod backends;
mod result;
mod tensor;

use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};

use crate::frame::Frame;

pub use backend::{InferenceBackend, ModelInput};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use backends::StubProposal;
pub use result::{iou, non_max_suppression, BoundingBox, Detection, DetectionWire};
pub use tensor::OutputTensor;

/// Detection model wrapper: preprocessing, decoding, and NMS around a
/// loaded backend.
pub struct Detector {
    backend: Box<dyn InferenceBackend>,
    input_width: u32,
    input_height: u32,
    confidence_threshold: f32,
    nms_iou_threshold: f32,
    class_names: Vec<String>,
    last_inference_ms: f64,
}

impl Detector {
    /// Wrap an already-constructed backend. Used by tests and by `load`.
    pub fn with_backend(
        backend: Box<dyn InferenceBackend>,
        input_size: [u32; 2],
        confidence_threshold: f32,
        nms_iou_threshold: f32,
    ) -> Self {
        Self {
            backend,
            input_width: input_size[0],
            input_height: input_size[1],
            confidence_threshold,
            nms_iou_threshold,
            class_names: Vec::new(),
            last_inference_ms: 0.0,
        }
    }

    /// Load a detection model from disk.
    ///
    /// `model_path` holds the graph file first, optionally followed by a
    /// separate weights file for split-format models.
    #[allow(unused_variables)]
    pub fn load(
        model_path: &[std::path::PathBuf],
        input_size: [u32; 2],
        confidence_threshold: f32,
        nms_iou_threshold: f32,
        use_acceleration: bool,
    ) -> Result<Self> {
        let graph = model_path
            .first()
            .ok_or_else(|| anyhow!("detection.model_path is empty; need a model graph file"))?;
        let weights = model_path.get(1).map(|p| p.as_path());

        #[cfg(feature = "backend-tract")]
        {
            let backend = backends::TractBackend::load(
                graph,
                weights,
                input_size[0],
                input_size[1],
                use_acceleration,
            )?;
            log::info!(
                "detector initialized: backend=tract model={} input={}x{} conf={} nms_iou={}",
                graph.display(),
                input_size[0],
                input_size[1],
                confidence_threshold,
                nms_iou_threshold
            );
            Ok(Self::with_backend(
                Box::new(backend),
                input_size,
                confidence_threshold,
                nms_iou_threshold,
            ))
        }
        #[cfg(not(feature = "backend-tract"))]
        {
            Err(anyhow!(
                "no inference backend compiled in; rebuild with --features backend-tract \
                 or run with --no-detect"
            ))
        }
    }

    /// Load class labels, one per line. Missing labels fall back to
    /// numeric class ids at detect time.
    pub fn load_labels(&mut self, path: &Path) -> Result<usize> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to open labels file {}", path.display()))?;
        self.class_names = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        log::info!("loaded {} class names", self.class_names.len());
        Ok(self.class_names.len())
    }

    /// Wall-clock duration of the most recent `detect` call.
    pub fn last_inference_ms(&self) -> f64 {
        self.last_inference_ms
    }

    /// Run detection on a frame.
    ///
    /// Empty frames and backend failures yield an empty list.
    pub fn detect(&mut self, frame: &Frame) -> Vec<Detection> {
        if frame.is_empty() {
            return Vec::new();
        }

        let start = Instant::now();
        let detections = match self.detect_inner(frame) {
            Ok(detections) => detections,
            Err(err) => {
                log::warn!("inference failed, returning no detections: {:#}", err);
                Vec::new()
            }
        };
        self.last_inference_ms = start.elapsed().as_secs_f64() * 1000.0;
        detections
    }

    fn detect_inner(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.preprocess(frame)?;
        let output = self.backend.forward(&input)?;
        let decoded = self.decode(&output, frame.width, frame.height);
        Ok(non_max_suppression(decoded, self.nms_iou_threshold))
    }

    /// Resize to the model input size and normalize RGB8 into planar CHW
    /// f32 values in [0, 1].
    fn preprocess(&self, frame: &Frame) -> Result<ModelInput> {
        let image = frame.to_rgb_image()?;
        let resized = if frame.width == self.input_width && frame.height == self.input_height {
            image
        } else {
            imageops::resize(
                &image,
                self.input_width,
                self.input_height,
                FilterType::Triangle,
            )
        };

        let plane = (self.input_width * self.input_height) as usize;
        let mut data = vec![0.0f32; plane * 3];
        for (i, pixel) in resized.pixels().enumerate() {
            data[i] = pixel.0[0] as f32 / 255.0;
            data[plane + i] = pixel.0[1] as f32 / 255.0;
            data[plane * 2 + i] = pixel.0[2] as f32 / 255.0;
        }

        Ok(ModelInput {
            data,
            width: self.input_width,
            height: self.input_height,
        })
    }

    /// Decode the dense output tensor into thresholded, frame-space boxes.
    fn decode(&self, output: &OutputTensor, frame_width: u32, frame_height: u32) -> Vec<Detection> {
        let scale_x = frame_width as f32 / self.input_width as f32;
        let scale_y = frame_height as f32 / self.input_height as f32;
        let max_x = frame_width as i32 - 1;
        let max_y = frame_height as i32 - 1;

        let mut detections = Vec::new();
        for proposal in 0..output.proposals() {
            let (class_id, confidence) = output.best_class(proposal);
            if confidence < self.confidence_threshold {
                continue;
            }

            let cx = output.at(proposal, 0);
            let cy = output.at(proposal, 1);
            let w = output.at(proposal, 2);
            let h = output.at(proposal, 3);

            let x1 = (((cx - w / 2.0) * scale_x) as i32).clamp(0, max_x);
            let y1 = (((cy - h / 2.0) * scale_y) as i32).clamp(0, max_y);
            let x2 = (((cx + w / 2.0) * scale_x) as i32).clamp(0, max_x);
            let y2 = (((cy + h / 2.0) * scale_y) as i32).clamp(0, max_y);

            detections.push(Detection {
                class_id,
                class_name: self.class_name(class_id),
                confidence,
                bbox: BoundingBox {
                    x: x1,
                    y: y1,
                    width: x2 - x1,
                    height: y2 - y1,
                },
            });
        }
        detections
    }

    fn class_name(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| class_id.to_string())
    }
}
