// src/pipeline/metrics.rs
//
// Lock-free counters for the detection loop and the persistence jobs.
// Cloned into every spawned job; summarized to the log periodically and at
// exit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub detector_runs: Arc<AtomicU64>,
    pub detector_failures: Arc<AtomicU64>,
    pub violations: Arc<AtomicU64>,
    pub sessions_closed: Arc<AtomicU64>,
    pub clips_persisted: Arc<AtomicU64>,
    pub clips_retained: Arc<AtomicU64>,
    pub alerts_sent: Arc<AtomicU64>,
    pub alerts_failed: Arc<AtomicU64>,
    pub detector_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            detector_runs: Arc::new(AtomicU64::new(0)),
            detector_failures: Arc::new(AtomicU64::new(0)),
            violations: Arc::new(AtomicU64::new(0)),
            sessions_closed: Arc::new(AtomicU64::new(0)),
            clips_persisted: Arc::new(AtomicU64::new(0)),
            clips_retained: Arc::new(AtomicU64::new(0)),
            alerts_sent: Arc::new(AtomicU64::new(0)),
            alerts_failed: Arc::new(AtomicU64::new(0)),
            detector_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            fps: self.fps(),
            detector_runs: self.detector_runs.load(Ordering::Relaxed),
            detector_failures: self.detector_failures.load(Ordering::Relaxed),
            violations: self.violations.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            clips_persisted: self.clips_persisted.load(Ordering::Relaxed),
            clips_retained: self.clips_retained.load(Ordering::Relaxed),
            alerts_sent: self.alerts_sent.load(Ordering::Relaxed),
            alerts_failed: self.alerts_failed.load(Ordering::Relaxed),
            last_detector_us: self.detector_time_us.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }

    pub fn log_summary(&self) {
        let s = self.summary();
        info!(
            "📊 frames={} ({:.1} fps) detector={} (fail {}, last {}µs) violations={} sessions={} persisted={} retained={} alerts={}/{}",
            s.total_frames,
            s.fps,
            s.detector_runs,
            s.detector_failures,
            s.last_detector_us,
            s.violations,
            s.sessions_closed,
            s.clips_persisted,
            s.clips_retained,
            s.alerts_sent,
            s.alerts_sent + s.alerts_failed,
        );
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub fps: f64,
    pub detector_runs: u64,
    pub detector_failures: u64,
    pub violations: u64,
    pub sessions_closed: u64,
    pub clips_persisted: u64,
    pub clips_retained: u64,
    pub alerts_sent: u64,
    pub alerts_failed: u64,
    pub last_detector_us: u64,
    pub elapsed_secs: f64,
}
