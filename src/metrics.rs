//! Session performance log and host resource sampling.
//!
//! One CSV file per process run, named from the start timestamp. Rows are
//! flushed as they are written since the process may be killed without a
//! clean shutdown. Access is serialized through one lock; logging cadence
//! is low relative to the capture loop, so contention is not a concern.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Local;

use crate::live::StatusSnapshot;

const CSV_HEADER: &str = "timestamp,fps,inference_time_ms,detections_count,\
cpu_usage_percent,ram_usage_mb,camera_frame_time_ms,\
jpeg_encode_time_ms,total_detections,dropped_frames,queue_size";

/// One performance record, sampled on the metrics interval.
#[derive(Clone, Debug, Default)]
pub struct MetricsRow {
    pub status: StatusSnapshot,
    pub camera_frame_time_ms: f64,
    pub jpeg_encode_time_ms: f64,
    pub dropped_frames: u64,
    pub queue_size: usize,
}

/// Append-only CSV recorder scoped to one process run.
pub struct MetricsRecorder {
    file: Mutex<Option<File>>,
    path: PathBuf,
}

impl MetricsRecorder {
    /// Create the log directory if needed and open this session's file,
    /// writing the header when the file is empty.
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;

        let name = format!("performance_{}.csv", Local::now().format("%Y%m%d_%H%M%S"));
        let path = dir.join(name);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open metrics log {}", path.display()))?;

        if file.metadata().map(|m| m.len()).unwrap_or(0) == 0 {
            writeln!(file, "{}", CSV_HEADER).context("write metrics header")?;
            file.flush().context("flush metrics header")?;
        }

        log::info!("metrics log: {}", path.display());
        Ok(Self {
            file: Mutex::new(Some(file)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row and flush immediately.
    pub fn record(&self, row: &MetricsRow) -> Result<()> {
        let mut guard = self
            .file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(file) = guard.as_mut() else {
            return Ok(()); // closed; late rows are dropped silently
        };
        let s = &row.status;
        writeln!(
            file,
            "{},{:.3},{:.3},{},{:.1},{:.1},{:.3},{:.3},{},{},{}",
            Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
            s.fps,
            s.inference_time_ms,
            s.detections_count,
            s.cpu_usage_percent,
            s.ram_usage_mb,
            row.camera_frame_time_ms,
            row.jpeg_encode_time_ms,
            s.total_detections,
            row.dropped_frames,
            row.queue_size,
        )
        .context("write metrics row")?;
        file.flush().context("flush metrics row")?;
        Ok(())
    }

    /// Flush and release the file handle.
    pub fn close(&self) {
        let mut guard = self
            .file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(mut file) = guard.take() {
            let _ = file.flush();
            log::info!("metrics log closed");
        }
    }
}

/// Host CPU and RAM sampling. Unavailable readings degrade to 0.0 rather
/// than failing the pipeline iteration.
pub struct ResourceSampler {
    system: sysinfo::System,
}

impl ResourceSampler {
    pub fn new() -> Self {
        Self {
            system: sysinfo::System::new(),
        }
    }

    /// Global CPU utilization percentage. The first sample after startup
    /// reads 0.0 until a second refresh establishes a delta.
    pub fn cpu_percent(&mut self) -> f64 {
        self.system.refresh_cpu_usage();
        self.system.global_cpu_info().cpu_usage() as f64
    }

    /// Used system memory in megabytes.
    pub fn ram_used_mb(&mut self) -> f64 {
        self.system.refresh_memory();
        self.system.used_memory() as f64 / 1024.0 / 1024.0
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fps: f64, dropped: u64) -> MetricsRow {
        MetricsRow {
            status: StatusSnapshot {
                fps,
                detections_count: 2,
                total_detections: 10,
                ..StatusSnapshot::default()
            },
            camera_frame_time_ms: 4.2,
            jpeg_encode_time_ms: 7.0,
            dropped_frames: dropped,
            queue_size: 0,
        }
    }

    #[test]
    fn creates_directory_and_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        let recorder = MetricsRecorder::create(&nested).unwrap();
        recorder.record(&row(15.0, 0)).unwrap();
        recorder.record(&row(14.0, 1)).unwrap();
        recorder.close();

        let contents = std::fs::read_to_string(recorder.path()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,fps,inference_time_ms"));
        assert!(lines[1].contains(",15.000,"));
        assert!(lines[2].ends_with(",10,1,0"));
    }

    #[test]
    fn record_after_close_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = MetricsRecorder::create(dir.path()).unwrap();
        recorder.close();
        assert!(recorder.record(&row(1.0, 0)).is_ok());
    }

    #[test]
    fn resource_sampler_returns_finite_values() {
        let mut sampler = ResourceSampler::new();
        assert!(sampler.cpu_percent().is_finite());
        assert!(sampler.ram_used_mb() >= 0.0);
    }

    #[test]
    fn file_name_is_session_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = MetricsRecorder::create(dir.path()).unwrap();
        let name = recorder.path().file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("performance_"));
        assert!(name.ends_with(".csv"));
    }
}
