//! Pipeline orchestrator.
//!
//! Owns the capture source, the detector, the shared live state, the
//! metrics recorder, and the HTTP server, and drives them through a
//! single-threaded frame loop. All mutation of the pipeline happens here;
//! other threads only read through `LiveState`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::annotate::draw_detections;
use crate::capture::{CaptureMode, CaptureSource, LiveRequest, PullOutcome};
use crate::config::AppConfig;
use crate::detect::Detector;
use crate::live::{LiveState, StatusSnapshot};
use crate::metrics::{MetricsRecorder, MetricsRow, ResourceSampler};
use crate::server::{self, ServerConfig, VideoServer};

/// Sleep after a transient read miss so a stalled camera does not spin.
const MISS_BACKOFF: Duration = Duration::from_millis(10);
/// Baseline pacing between loop iterations.
const LOOP_PACE: Duration = Duration::from_millis(1);
/// Width of the sliding FPS measurement window.
const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Lifecycle of the pipeline. Transitions are strictly forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Initializing,
    Running,
    Draining,
    Stopped,
}

/// Startup choices taken from the command line.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Replay this file instead of opening a live device.
    pub replay_file: Option<PathBuf>,
    /// Skip model loading and publish empty detections.
    pub disable_detection: bool,
}

pub struct Orchestrator {
    cfg: AppConfig,
    options: RunOptions,
    running: Arc<AtomicBool>,
    state: PipelineState,
    live: LiveState,
    detector: Option<Detector>,
}

impl Orchestrator {
    pub fn new(cfg: AppConfig, options: RunOptions, running: Arc<AtomicBool>) -> Self {
        Self {
            cfg,
            options,
            running,
            state: PipelineState::Initializing,
            live: LiveState::new(),
            detector: None,
        }
    }

    /// Run with a pre-built detector instead of loading one from the
    /// configured model files. Ignored when detection is disabled.
    pub fn with_detector(mut self, detector: Detector) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Handle to the shared live state, readable while `run` is active.
    pub fn live(&self) -> LiveState {
        self.live.clone()
    }

    /// Bring the pipeline up, run the frame loop until the shutdown flag
    /// clears, then tear everything down in order.
    pub fn run(&mut self) -> Result<()> {
        let mut capture = self.open_capture()?;
        let mut detector = self.load_detector()?;
        let recorder =
            MetricsRecorder::create(&self.cfg.log_dir).context("create metrics recorder")?;
        log::info!("recording metrics to {}", recorder.path().display());
        let server = VideoServer::new(
            ServerConfig {
                port: self.cfg.server_port,
                jpeg_quality: self.cfg.detection.jpeg_quality,
            },
            self.live.clone(),
        )
        .spawn()
        .context("start video server")?;

        self.state = PipelineState::Running;
        log::info!("pipeline running");
        let loop_result =
            self.frame_loop(&mut capture, detector.as_mut(), &recorder);

        self.state = PipelineState::Draining;
        log::info!("pipeline draining");
        self.publish_final_status(&capture);

        // Teardown order: stop serving first, then release the device,
        // then close the metrics file.
        if let Err(err) = server.stop() {
            log::warn!("video server shutdown: {:#}", err);
        }
        capture.close();
        recorder.close();

        self.state = PipelineState::Stopped;
        log::info!("pipeline stopped");
        loop_result
    }

    fn open_capture(&self) -> Result<CaptureSource> {
        let mode = match &self.options.replay_file {
            Some(path) => CaptureMode::Replay(path.clone()),
            None => CaptureMode::Live(LiveRequest {
                device: self.cfg.camera.device.clone(),
                width: self.cfg.camera.width,
                height: self.cfg.camera.height,
                fps: self.cfg.camera.fps,
                buffer_depth: self.cfg.camera.buffer_size,
            }),
        };
        CaptureSource::open(mode)
    }

    fn load_detector(&mut self) -> Result<Option<Detector>> {
        if self.options.disable_detection {
            log::info!("detection disabled; streaming raw frames");
            return Ok(None);
        }
        if let Some(detector) = self.detector.take() {
            log::info!("detector initialized: backend=preloaded");
            return Ok(Some(detector));
        }
        let mut detector = Detector::load(
            &self.cfg.detection.model_path,
            self.cfg.detection.input_size,
            self.cfg.detection.confidence_threshold,
            self.cfg.detection.nms_iou_threshold,
            self.cfg.use_acceleration,
        )?;
        if let Some(labels) = &self.cfg.detection.labels_path {
            detector.load_labels(labels)?;
        }
        Ok(Some(detector))
    }

    fn frame_loop(
        &mut self,
        capture: &mut CaptureSource,
        mut detector: Option<&mut Detector>,
        recorder: &MetricsRecorder,
    ) -> Result<()> {
        let params = capture.negotiated();
        let mut sampler = ResourceSampler::new();
        let mut total_detections: u64 = 0;
        let mut dropped_frames: u64 = 0;
        let mut fps = 0.0;
        let mut window_frames: u32 = 0;
        let mut window_started = Instant::now();
        let mut last_metrics_at = Instant::now();
        let metrics_interval = Duration::from_millis(self.cfg.metrics_interval_ms);

        while self.running.load(Ordering::SeqCst) {
            let pull_started = Instant::now();
            let frame = match capture.pull_frame()? {
                PullOutcome::Frame(frame) => frame,
                PullOutcome::NoFrame => {
                    dropped_frames += 1;
                    std::thread::sleep(MISS_BACKOFF);
                    continue;
                }
            };
            let camera_frame_time_ms = pull_started.elapsed().as_secs_f64() * 1000.0;

            let (detections, inference_time_ms) = match detector.as_deref_mut() {
                Some(detector) => {
                    let detections = detector.detect(&frame);
                    (detections, detector.last_inference_ms())
                }
                None => (Vec::new(), 0.0),
            };
            total_detections += detections.len() as u64;

            let mut annotated = frame;
            draw_detections(&mut annotated, &detections);

            let encode_started = Instant::now();
            let _ = server::encode_jpeg(&annotated, self.cfg.detection.jpeg_quality)?;
            let jpeg_encode_time_ms = encode_started.elapsed().as_secs_f64() * 1000.0;

            window_frames += 1;
            if window_started.elapsed() >= FPS_WINDOW {
                fps = window_frames as f64 / window_started.elapsed().as_secs_f64();
                window_frames = 0;
                window_started = Instant::now();
            }

            let status = StatusSnapshot {
                fps,
                inference_time_ms,
                detections_count: detections.len(),
                total_detections,
                cpu_usage_percent: sampler.cpu_percent(),
                ram_usage_mb: sampler.ram_used_mb(),
                camera_width: params.width,
                camera_height: params.height,
                running: true,
            };

            self.live.publish_frame(annotated);
            self.live.publish_detections(detections);
            self.live.publish_status(status.clone());

            if last_metrics_at.elapsed() >= metrics_interval {
                last_metrics_at = Instant::now();
                let row = MetricsRow {
                    status,
                    camera_frame_time_ms,
                    jpeg_encode_time_ms,
                    dropped_frames,
                    queue_size: 0,
                };
                if let Err(err) = recorder.record(&row) {
                    log::warn!("failed to record metrics row: {:#}", err);
                }
            }

            std::thread::sleep(LOOP_PACE);
        }
        Ok(())
    }

    /// Leave a terminal status behind so `/api/status` reflects shutdown.
    fn publish_final_status(&self, capture: &CaptureSource) {
        let params = capture.negotiated();
        let mut status = self.live.status_snapshot().unwrap_or_default();
        status.running = false;
        status.fps = 0.0;
        status.camera_width = params.width;
        status.camera_height = params.height;
        self.live.publish_status(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(dir: &std::path::Path) -> AppConfig {
        let mut cfg = AppConfig::test_defaults();
        cfg.camera.device = "stub://test".to_string();
        cfg.log_dir = dir.to_path_buf();
        cfg.server_port = 0;
        cfg.metrics_interval_ms = 10;
        cfg
    }

    #[test]
    fn runs_and_stops_on_flag() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = stub_config(dir.path());
        let running = Arc::new(AtomicBool::new(true));
        let stopper = running.clone();
        let stop_thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            stopper.store(false, Ordering::SeqCst);
        });

        let mut orchestrator = Orchestrator::new(
            cfg,
            RunOptions {
                replay_file: None,
                disable_detection: true,
            },
            running,
        );
        assert_eq!(orchestrator.state(), PipelineState::Initializing);
        orchestrator.run().expect("pipeline run");
        assert_eq!(orchestrator.state(), PipelineState::Stopped);

        let status = orchestrator.live.status_snapshot().expect("final status");
        assert!(!status.running);
        stop_thread.join().expect("stop thread");
    }

    #[test]
    fn replay_mode_uses_stub_clip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = stub_config(dir.path());
        let running = Arc::new(AtomicBool::new(true));
        let stopper = running.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            stopper.store(false, Ordering::SeqCst);
        });

        let mut orchestrator = Orchestrator::new(
            cfg,
            RunOptions {
                replay_file: Some(PathBuf::from("stub://clip")),
                disable_detection: true,
            },
            running,
        );
        orchestrator.run().expect("pipeline run");

        let frame = orchestrator.live.frame_snapshot().expect("frame published");
        assert_eq!(frame.width, 320);
        assert_eq!(frame.height, 240);
    }
}
