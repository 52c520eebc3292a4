use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tempfile::tempdir;

use signwatch::config::AppConfig;
use signwatch::detect::{Detector, StubBackend, StubProposal};
use signwatch::orchestrator::{Orchestrator, RunOptions};
use signwatch::LiveState;

const CONFIG_JSON: &str = r#"{
    "camera": {"device": "stub://pipeline", "width": 320, "height": 240, "fps": 25},
    "server": {"port": 0},
    "logging": {"metrics_interval_ms": 20}
}"#;

struct RunningPipeline {
    dir: Option<tempfile::TempDir>,
    live: LiveState,
    running: Arc<AtomicBool>,
    join: Option<std::thread::JoinHandle<Result<()>>>,
}

impl RunningPipeline {
    fn start(options: RunOptions) -> Result<Self> {
        Self::start_with_detector(options, None)
    }

    fn start_with_detector(options: RunOptions, detector: Option<Detector>) -> Result<Self> {
        let dir = tempdir()?;
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, CONFIG_JSON)?;
        let mut cfg = AppConfig::load(Some(&config_path))?;
        cfg.log_dir = dir.path().join("logs");

        let running = Arc::new(AtomicBool::new(true));
        let mut orchestrator = Orchestrator::new(cfg, options, running.clone());
        if let Some(detector) = detector {
            orchestrator = orchestrator.with_detector(detector);
        }
        let live = orchestrator.live();
        let join = std::thread::spawn(move || orchestrator.run());

        Ok(Self {
            dir: Some(dir),
            live,
            running,
            join: Some(join),
        })
    }

    fn wait_for<T>(&self, mut probe: impl FnMut(&LiveState) -> Option<T>) -> T {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(value) = probe(&self.live) {
                return value;
            }
            assert!(Instant::now() < deadline, "pipeline produced no output");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn stop(mut self) -> Result<tempfile::TempDir> {
        self.running.store(false, Ordering::SeqCst);
        self.join
            .take()
            .expect("pipeline join handle")
            .join()
            .expect("pipeline thread panicked")?;
        Ok(self.dir.take().expect("pipeline tempdir"))
    }
}

impl Drop for RunningPipeline {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

#[test]
fn live_pipeline_publishes_frames_and_status() -> Result<()> {
    let pipeline = RunningPipeline::start(RunOptions {
        replay_file: None,
        disable_detection: true,
    })?;

    let frame = pipeline.wait_for(|live| live.frame_snapshot());
    assert_eq!(frame.width, 320);
    assert_eq!(frame.height, 240);

    let status = pipeline.wait_for(|live| live.status_snapshot());
    assert!(status.running);
    assert_eq!(status.camera_width, 320);
    assert_eq!(status.camera_height, 240);
    // Detection is disabled, so inference stays at zero.
    assert_eq!(status.inference_time_ms, 0.0);
    assert_eq!(status.total_detections, 0);
    assert!(pipeline.wait_for(|live| Some(live.detections_snapshot().is_empty())));

    pipeline.stop()?;
    Ok(())
}

#[test]
fn shutdown_leaves_terminal_status_and_metrics_file() -> Result<()> {
    let pipeline = RunningPipeline::start(RunOptions {
        replay_file: None,
        disable_detection: true,
    })?;
    // Let a couple of metrics intervals elapse.
    pipeline.wait_for(|live| live.status_snapshot());
    std::thread::sleep(Duration::from_millis(100));

    let live = pipeline.live.clone();
    let dir = pipeline.stop()?;

    let status = live.status_snapshot().expect("terminal status");
    assert!(!status.running);
    assert_eq!(status.fps, 0.0);

    let logs = dir.path().join("logs");
    let csv = std::fs::read_dir(&logs)?
        .filter_map(|entry| entry.ok())
        .find(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with("performance_") && name.ends_with(".csv")
        })
        .expect("metrics csv created");
    let contents = std::fs::read_to_string(csv.path())?;
    let mut lines = contents.lines();
    assert!(lines
        .next()
        .expect("header line")
        .starts_with("timestamp,fps,inference_time_ms"));
    assert!(lines.next().is_some(), "no metrics rows were recorded");

    Ok(())
}

#[test]
fn detection_pipeline_publishes_suppressed_detections() -> Result<()> {
    // Two heavily overlapping proposals of the same class: NMS must keep
    // exactly the higher-scoring one, and that survivor must flow through
    // the pipeline into the live state and the status counters.
    let proposals = vec![
        StubProposal {
            cx: 32.0,
            cy: 32.0,
            w: 20.0,
            h: 20.0,
            class_id: 0,
            score: 0.9,
        },
        StubProposal {
            cx: 34.0,
            cy: 32.0,
            w: 20.0,
            h: 20.0,
            class_id: 0,
            score: 0.7,
        },
    ];
    let detector =
        Detector::with_backend(Box::new(StubBackend::new(proposals, 1)), [64, 64], 0.5, 0.5);

    let pipeline = RunningPipeline::start_with_detector(
        RunOptions {
            replay_file: None,
            disable_detection: false,
        },
        Some(detector),
    )?;

    let detections = pipeline.wait_for(|live| {
        let detections = live.detections_snapshot();
        (!detections.is_empty()).then_some(detections)
    });
    assert_eq!(detections.len(), 1, "overlapping same-class box survived");
    assert_eq!(detections[0].confidence, 0.9);
    // Box is scaled to the 320x240 source frame and stays in bounds.
    assert!(detections[0].bbox.x >= 0 && detections[0].bbox.y >= 0);
    assert!(detections[0].bbox.x + detections[0].bbox.width < 320);
    assert!(detections[0].bbox.y + detections[0].bbox.height < 240);

    let status = pipeline.wait_for(|live| {
        live.status_snapshot()
            .filter(|status| status.detections_count > 0)
    });
    assert!(status.inference_time_ms >= 0.0);
    let first_total = status.total_detections;
    assert!(first_total > 0);

    // The running total keeps growing frame over frame.
    let later = pipeline.wait_for(|live| {
        live.status_snapshot()
            .filter(|status| status.total_detections > first_total)
    });
    assert!(later.total_detections > first_total);

    pipeline.stop()?;
    Ok(())
}

#[test]
fn replay_pipeline_loops_the_clip() -> Result<()> {
    let pipeline = RunningPipeline::start(RunOptions {
        replay_file: Some(PathBuf::from("stub://clip")),
        disable_detection: true,
    })?;

    // The synthetic clip is short; watching status long enough to exceed
    // its length proves the source rewound rather than stopping.
    let status = pipeline.wait_for(|live| {
        live.status_snapshot()
            .filter(|status| status.total_detections == 0 && status.running)
    });
    assert_eq!(status.camera_width, 320);
    std::thread::sleep(Duration::from_secs(2));
    let frame = pipeline.wait_for(|live| live.frame_snapshot());
    assert!(!frame.is_empty());

    pipeline.stop()?;
    Ok(())
}
