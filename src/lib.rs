//! Signwatch
//!
//! This crate implements an edge detection pipeline for traffic signs:
//! frames are captured from a local camera (or a replayed video file),
//! run through an object-detection model, annotated, and served over HTTP
//! as an MJPEG stream alongside JSON snapshots of detections and status.
//!
//! # Module Structure
//!
//! - `capture`: Frame sources (V4L2 devices, video-file replay) with
//!   backend fallback
//! - `detect`: Inference backends, output decoding, and non-maximum
//!   suppression
//! - `live`: Latest-value store shared between the pipeline and the server
//! - `annotate`: Bounding-box and label overlay drawing
//! - `metrics`: CSV performance recorder and resource sampling
//! - `server`: MJPEG streaming and JSON snapshot HTTP server
//! - `orchestrator`: State machine driving the whole pipeline

pub mod annotate;
pub mod capture;
pub mod config;
pub mod detect;
pub mod frame;
pub mod live;
pub mod metrics;
pub mod orchestrator;
pub mod server;

pub use capture::{CaptureMode, CaptureSource, LiveRequest};
pub use detect::{Detection, Detector};
pub use frame::Frame;
pub use live::{LiveState, StatusSnapshot};
pub use orchestrator::{Orchestrator, PipelineState, RunOptions};
pub use server::{ServerConfig, ServerHandle, VideoServer};
