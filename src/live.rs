//! Latest-value store shared between the pipeline and the HTTP server.
//!
//! Three independently locked fields: the newest annotated frame, the
//! newest detection list, and the newest status snapshot. Each publish
//! fully replaces the prior value; each read returns an owned copy so the
//! publisher can reuse its buffers immediately. Locks are per-field, so a
//! frame publish never blocks a detections read. The fields are not
//! synchronized with each other: a reader may pair a newer frame with
//! slightly older detections.
//!
//! Only the orchestrator writes; the server and metrics recorder read.

use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::detect::Detection;
use crate::frame::Frame;

/// Pipeline status, rebuilt wholesale every orchestrator iteration.
#[derive(Clone, Debug, Default, Serialize)]
pub struct StatusSnapshot {
    pub fps: f64,
    pub inference_time_ms: f64,
    pub detections_count: usize,
    pub total_detections: u64,
    pub cpu_usage_percent: f64,
    pub ram_usage_mb: f64,
    pub camera_width: u32,
    pub camera_height: u32,
    pub running: bool,
}

/// Concurrently readable holder of the latest frame/detections/status.
#[derive(Clone, Default)]
pub struct LiveState {
    frame: Arc<Mutex<Option<Frame>>>,
    detections: Arc<Mutex<Vec<Detection>>>,
    status: Arc<Mutex<Option<StatusSnapshot>>>,
}

impl LiveState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_frame(&self, frame: Frame) {
        *lock_recovering(&self.frame) = Some(frame);
    }

    pub fn frame_snapshot(&self) -> Option<Frame> {
        lock_recovering(&self.frame).clone()
    }

    pub fn publish_detections(&self, detections: Vec<Detection>) {
        *lock_recovering(&self.detections) = detections;
    }

    pub fn detections_snapshot(&self) -> Vec<Detection> {
        lock_recovering(&self.detections).clone()
    }

    pub fn publish_status(&self, status: StatusSnapshot) {
        *lock_recovering(&self.status) = Some(status);
    }

    pub fn status_snapshot(&self) -> Option<StatusSnapshot> {
        lock_recovering(&self.status).clone()
    }
}

/// Values here are whole-replaced on publish, so a panic mid-update cannot
/// leave a partially written value; recovering from poison is safe.
fn lock_recovering<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
